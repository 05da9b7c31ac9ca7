use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Broker {
    #[serde(rename = "OANDA")]
    Oanda,
    #[serde(rename = "TRADOVATE")]
    Tradovate,
    #[serde(rename = "COINBASE")]
    Coinbase,
}

impl Broker {
    pub fn as_str(self) -> &'static str {
        match self {
            Broker::Oanda => "OANDA",
            Broker::Tradovate => "TRADOVATE",
            Broker::Coinbase => "COINBASE",
        }
    }
}

impl std::fmt::Display for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetClass {
    #[serde(rename = "forex")]
    Forex,
    #[serde(rename = "future")]
    Future,
    #[serde(rename = "crypto")]
    Crypto,
}

/// Where an alert's (symbol, exchange) pair trades and under what
/// venue-native instrument id. Immutable within a contract-cache epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingKey {
    pub broker: Broker,
    /// Venue-native instrument id: "EUR_USD", "ESZ6", "BTC-USD".
    pub instrument: String,
    pub asset_class: AssetClass,
}
