use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertAction {
    #[serde(rename = "LONG_ENTRY")]
    LongEntry,
    #[serde(rename = "SHORT_ENTRY")]
    ShortEntry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "LONG")]
    Long,
    #[serde(rename = "SHORT")]
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    #[serde(rename = "TREND")]
    Trend,
    #[serde(rename = "MOMENTUM")]
    Momentum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trigger {
    #[serde(rename = "COLOR_CHANGE_BLUE")]
    ColorChangeBlue,
    #[serde(rename = "COLOR_CHANGE_RED")]
    ColorChangeRed,
    #[serde(rename = "DI_CROSS")]
    DiCross,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Signal {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    pub direction: Direction,
    pub trigger: Trigger,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarketData {
    pub symbol: String,
    pub exchange: String,
    pub timeframe: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PriceData {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Inbound TradingView webhook payload. Parsed strictly; anything the
/// schema does not name is rejected before it can reach decision logic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Alert {
    pub action: AlertAction,
    pub indicator: String,
    pub signal: Signal,
    pub market_data: MarketData,
    pub price_data: PriceData,
}

impl Alert {
    /// Cross-field consistency checks that serde cannot express:
    /// trigger color must agree with direction, action must agree with
    /// direction, and the trigger must belong to the signal kind.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match (self.signal.trigger, self.signal.direction) {
            (Trigger::ColorChangeBlue, Direction::Short) => {
                return Err(ValidationError::new(
                    "COLOR_CHANGE_BLUE must carry direction LONG",
                ));
            }
            (Trigger::ColorChangeRed, Direction::Long) => {
                return Err(ValidationError::new(
                    "COLOR_CHANGE_RED must carry direction SHORT",
                ));
            }
            _ => {}
        }

        let action_dir = match self.action {
            AlertAction::LongEntry => Direction::Long,
            AlertAction::ShortEntry => Direction::Short,
        };
        if action_dir != self.signal.direction {
            return Err(ValidationError::new(format!(
                "action {:?} disagrees with signal direction {:?}",
                self.action, self.signal.direction
            )));
        }

        match (self.signal.kind, self.signal.trigger) {
            (SignalKind::Trend, Trigger::DiCross) => Err(ValidationError::new(
                "DI_CROSS is a momentum trigger, not a trend trigger",
            )),
            (SignalKind::Momentum, Trigger::ColorChangeBlue | Trigger::ColorChangeRed) => Err(
                ValidationError::new("color-change triggers must carry signal type TREND"),
            ),
            _ => Ok(()),
        }
    }
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }
}
