use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::alert::Direction;
use super::position::PositionSide;
use super::routing::{Broker, RoutingKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentKind {
    /// Flatten the existing position before (or without) re-entering.
    Close,
    /// Enter in the intent's direction.
    Open,
}

impl IntentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IntentKind::Close => "CLOSE",
            IntentKind::Open => "OPEN",
        }
    }
}

/// One venue-bound unit of work produced by the signal processor and
/// consumed exactly once by the matching executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub broker: Broker,
    /// Webhook symbol, kept for idempotency-key derivation and logging.
    pub symbol: String,
    /// Venue-native instrument id from the routing key.
    pub instrument: String,
    pub kind: IntentKind,
    pub direction: Direction,
    /// For Close intents: the side currently held, so position-based venues
    /// know which leg to flatten.
    pub closing_side: PositionSide,
    /// Base quantity hint. Executors may size themselves (spot buys size
    /// from quote balance); sells treat this as the upper bound.
    pub quantity: Option<f64>,
    /// Alert timestamp; part of the deterministic idempotency key.
    pub signal_time: DateTime<Utc>,
}

impl OrderIntent {
    pub fn open(key: &RoutingKey, symbol: &str, direction: Direction, at: DateTime<Utc>) -> Self {
        Self {
            broker: key.broker,
            symbol: symbol.to_string(),
            instrument: key.instrument.clone(),
            kind: IntentKind::Open,
            direction,
            closing_side: PositionSide::Flat,
            quantity: None,
            signal_time: at,
        }
    }

    pub fn close(
        key: &RoutingKey,
        symbol: &str,
        held: PositionSide,
        quantity: Option<f64>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            broker: key.broker,
            symbol: symbol.to_string(),
            instrument: key.instrument.clone(),
            kind: IntentKind::Close,
            // A close trades against the held side.
            direction: match held {
                PositionSide::Long | PositionSide::Flat => Direction::Short,
                PositionSide::Short => Direction::Long,
            },
            closing_side: held,
            quantity,
            signal_time: at,
        }
    }
}

/// Venue confirmation for one executed intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub broker: Broker,
    pub kind: IntentKind,
    /// Venue-assigned order id, when the venue returns one.
    pub order_id: Option<String>,
    /// Deterministic client order id the executor attached.
    pub client_order_id: String,
    /// Filled base quantity, when the venue reports it.
    pub filled_quantity: Option<f64>,
}
