pub mod alert;
pub mod intent;
pub mod position;
pub mod routing;

pub use alert::{Alert, AlertAction, Direction, MarketData, PriceData, Signal, SignalKind, Trigger};
pub use intent::{IntentKind, OrderIntent, OrderReceipt};
pub use position::{LivePosition, PositionRecord, PositionSide, TrendColor};
pub use routing::{AssetClass, Broker, RoutingKey};
