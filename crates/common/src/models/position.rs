use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::alert::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    #[serde(rename = "NONE")]
    Flat,
    #[serde(rename = "LONG")]
    Long,
    #[serde(rename = "SHORT")]
    Short,
}

impl PositionSide {
    pub fn as_db_str(self) -> &'static str {
        match self {
            PositionSide::Flat => "NONE",
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "NONE" => Some(PositionSide::Flat),
            "LONG" => Some(PositionSide::Long),
            "SHORT" => Some(PositionSide::Short),
            _ => None,
        }
    }

    pub fn matches(self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (PositionSide::Long, Direction::Long) | (PositionSide::Short, Direction::Short)
        )
    }
}

impl From<Direction> for PositionSide {
    fn from(d: Direction) -> Self {
        match d {
            Direction::Long => PositionSide::Long,
            Direction::Short => PositionSide::Short,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendColor {
    #[serde(rename = "BLUE")]
    Blue,
    #[serde(rename = "RED")]
    Red,
    #[serde(rename = "UNSET")]
    Unset,
}

impl TrendColor {
    pub fn as_db_str(self) -> &'static str {
        match self {
            TrendColor::Blue => "BLUE",
            TrendColor::Red => "RED",
            TrendColor::Unset => "UNSET",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "BLUE" => Some(TrendColor::Blue),
            "RED" => Some(TrendColor::Red),
            "UNSET" => Some(TrendColor::Unset),
            _ => None,
        }
    }

    /// The trade direction a trend color implies (BLUE trends long, RED
    /// trends short).
    pub fn direction(self) -> Option<Direction> {
        match self {
            TrendColor::Blue => Some(Direction::Long),
            TrendColor::Red => Some(Direction::Short),
            TrendColor::Unset => None,
        }
    }
}

/// Durable per-symbol record. The local record is an advisory cache of the
/// venue's actual position; `suspect` marks it untrusted after an
/// unknown-outcome broker call until reconciliation rewrites it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub symbol: String,
    pub position: PositionSide,
    pub trend_color: TrendColor,
    pub waiting_for_reentry: bool,
    pub held_quantity: f64,
    pub suspect: bool,
    pub last_updated: DateTime<Utc>,
    /// CAS token. 0 means "never written"; every committed update
    /// increments it.
    #[serde(skip)]
    pub version: i64,
}

impl PositionRecord {
    /// Zero-value record returned for symbols that have never traded.
    pub fn empty(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            position: PositionSide::Flat,
            trend_color: TrendColor::Unset,
            waiting_for_reentry: false,
            held_quantity: 0.0,
            suspect: false,
            last_updated: Utc::now(),
            version: 0,
        }
    }
}

/// A venue's answer to "what do you actually hold for this instrument".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LivePosition {
    pub side: PositionSide,
    pub quantity: f64,
}

impl LivePosition {
    pub fn flat() -> Self {
        Self {
            side: PositionSide::Flat,
            quantity: 0.0,
        }
    }
}
