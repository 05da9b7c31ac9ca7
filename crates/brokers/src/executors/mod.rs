pub mod flatten;
pub mod spot;

pub use flatten::FlattenExecutor;
pub use spot::SpotExecutor;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use common::errors::{AuthError, ExecutorError, OrderError, OrderStage};
use common::models::{Broker, IntentKind, LivePosition, OrderIntent, OrderReceipt, RoutingKey};

use crate::remote::VenueError;

/// One venue-specific order flow behind a common contract. `execute`
/// consumes exactly one intent; `live_position` answers what the venue
/// actually holds, for reconciliation.
#[async_trait]
pub trait OrderExecutor: Send + Sync {
    fn broker(&self) -> Broker;

    async fn execute(&self, intent: &OrderIntent) -> Result<OrderReceipt, ExecutorError>;

    async fn live_position(&self, key: &RoutingKey) -> Result<LivePosition, ExecutorError>;
}

/// Deterministic client order id: the same (symbol, signal time, intent
/// kind) always signs the same id, so a retried submission after a lost
/// response cannot create a second order on venues that honor the key.
pub fn client_order_id(symbol: &str, signal_time: DateTime<Utc>, kind: IntentKind) -> String {
    let mut hasher = Sha256::new();
    hasher.update(symbol.as_bytes());
    hasher.update(signal_time.timestamp_millis().to_be_bytes());
    hasher.update(kind.as_str().as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..32].to_string()
}

/// Venue-transport error to the executor taxonomy: timeouts are unknown
/// outcomes, auth failures are their own class, everything else is an
/// order failure at the stage the caller was in.
pub(crate) fn map_venue_error(
    broker: Broker,
    stage: OrderStage,
    err: VenueError,
) -> ExecutorError {
    match err {
        VenueError::Timeout => OrderError::new(broker, OrderStage::Timeout, "request timed out").into(),
        VenueError::Auth(cause) => AuthError::new(broker, cause).into(),
        VenueError::Rejected(message) | VenueError::Transport(message) => {
            OrderError::new(broker, stage, message).into()
        }
    }
}
