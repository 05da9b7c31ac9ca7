use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use common::models::{AssetClass, Broker, RoutingKey};
use common::traits::{RefDataError, ReferenceDataFeed};

/// Webhook ticker to venue instrument for the forex broker. Fixed table;
/// these pairs trade around the clock and never roll.
const FOREX_TABLE: &[(&str, &str)] = &[
    ("EURUSD", "EUR_USD"),
    ("USDJPY", "USD_JPY"),
    ("GBPUSD", "GBP_USD"),
    ("USDCHF", "USD_CHF"),
    ("USDCAD", "USD_CAD"),
    ("AUDUSD", "AUD_USD"),
    ("NZDUSD", "NZD_USD"),
    ("EURJPY", "EUR_JPY"),
    ("GBPJPY", "GBP_JPY"),
    ("EURGBP", "EUR_GBP"),
    ("AUDJPY", "AUD_JPY"),
    ("EURAUD", "EUR_AUD"),
];

/// Futures roots this system routes (index, metal, energy, currency and
/// their micros). Anything else is unresolved rather than guessed.
const FUTURES_ROOTS: &[&str] = &[
    "ES", "NQ", "YM", "RTY", "NG", "GC", "CL", "SI", "HG", "6E", "MBT", "MES", "MNQ",
];

const FUTURES_EXCHANGES: &[&str] = &["CME", "CME_MINI", "CBOT", "COMEX", "NYMEX", "ICE"];

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no route for {symbol} on {exchange}")]
    Unresolved { symbol: String, exchange: String },
    #[error(transparent)]
    RefData(#[from] RefDataError),
}

#[derive(Debug, Clone)]
struct ContractEntry {
    contract: String,
    fetched_at: DateTime<Utc>,
}

/// Maps an alert's (ticker, exchange) to a broker and venue instrument.
///
/// Forex and crypto routes are static. Futures route through a TTL'd
/// front-contract cache: entries are immutable within an epoch, and an
/// expired entry is re-fetched before it is ever returned, because an
/// expired contract id is an order rejection, not merely stale data.
pub struct SymbolResolver {
    feed: Arc<dyn ReferenceDataFeed>,
    contracts: RwLock<HashMap<String, ContractEntry>>,
    ttl: Duration,
}

impl SymbolResolver {
    pub fn new(feed: Arc<dyn ReferenceDataFeed>, ttl: Duration) -> Self {
        Self {
            feed,
            contracts: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub async fn resolve(&self, ticker: &str, exchange: &str) -> Result<RoutingKey, ResolveError> {
        let exchange_norm = exchange.trim().to_uppercase();
        let ticker_norm: String = ticker
            .trim()
            .to_uppercase()
            .chars()
            .filter(|c| *c != '_')
            .collect();

        if exchange_norm == "OANDA" {
            if let Some((_, instrument)) =
                FOREX_TABLE.iter().find(|(from, _)| *from == ticker_norm)
            {
                return Ok(RoutingKey {
                    broker: Broker::Oanda,
                    instrument: (*instrument).to_string(),
                    asset_class: AssetClass::Forex,
                });
            }
            return Err(ResolveError::Unresolved {
                symbol: ticker.to_string(),
                exchange: exchange.to_string(),
            });
        }

        if exchange_norm == "COINBASE" {
            if let Some(product) = crypto_product(&ticker_norm) {
                return Ok(RoutingKey {
                    broker: Broker::Coinbase,
                    instrument: product,
                    asset_class: AssetClass::Crypto,
                });
            }
            return Err(ResolveError::Unresolved {
                symbol: ticker.to_string(),
                exchange: exchange.to_string(),
            });
        }

        if FUTURES_EXCHANGES.contains(&exchange_norm.as_str()) {
            // TradingView sends continuous symbols as "ES1!"; accept the
            // bare root too.
            let root = ticker_norm.trim_end_matches("1!");
            if FUTURES_ROOTS.contains(&root) {
                let contract = self.front_contract(root).await?;
                return Ok(RoutingKey {
                    broker: Broker::Tradovate,
                    instrument: contract,
                    asset_class: AssetClass::Future,
                });
            }
        }

        Err(ResolveError::Unresolved {
            symbol: ticker.to_string(),
            exchange: exchange.to_string(),
        })
    }

    /// Currently active contract for a root, from cache while the epoch
    /// lasts, otherwise from the feed.
    async fn front_contract(&self, root: &str) -> Result<String, RefDataError> {
        let now = Utc::now();
        {
            let cache = self.contracts.read().await;
            if let Some(entry) = cache.get(root)
                && now - entry.fetched_at < self.ttl
            {
                return Ok(entry.contract.clone());
            }
        }

        let contract = self.feed.lookup_active_contract(root).await?;
        let mut cache = self.contracts.write().await;
        cache.insert(
            root.to_string(),
            ContractEntry {
                contract: contract.clone(),
                fetched_at: now,
            },
        );
        Ok(contract)
    }

    /// Re-fetch every known root. Run on a schedule so contract rolls are
    /// picked up without waiting for a webhook-path cache miss.
    pub async fn refresh_all(&self) {
        for root in FUTURES_ROOTS {
            match self.feed.lookup_active_contract(root).await {
                Ok(contract) => {
                    let mut cache = self.contracts.write().await;
                    let replaced = cache.insert(
                        root.to_string(),
                        ContractEntry {
                            contract: contract.clone(),
                            fetched_at: Utc::now(),
                        },
                    );
                    match replaced {
                        Some(old) if old.contract != contract => {
                            info!("Contract roll: {} {} -> {}", root, old.contract, contract);
                        }
                        _ => {}
                    }
                }
                Err(e) => warn!("Contract refresh failed for {}: {}", root, e),
            }
        }
    }
}

/// "BTCUSD" -> "BTC-USD". Three-letter base and quote, per the venue's
/// product id convention.
fn crypto_product(ticker: &str) -> Option<String> {
    if let Some((base, quote)) = ticker.split_once('-') {
        if !base.is_empty() && !quote.is_empty() {
            return Some(format!("{base}-{quote}"));
        }
        return None;
    }
    if ticker.len() == 6 && ticker.chars().all(|c| c.is_ascii_alphabetic()) {
        return Some(format!("{}-{}", &ticker[..3], &ticker[3..]));
    }
    None
}
