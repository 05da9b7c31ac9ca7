use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;

/// OANDA practice environment; override for live trading.
const DEFAULT_OANDA_URL: &str = "https://api-fxpractice.oanda.com";
/// Tradovate demo environment; override for live trading.
const DEFAULT_TRADOVATE_URL: &str = "https://demo.tradovateapi.com/v1";
const DEFAULT_COINBASE_URL: &str = "https://api.coinbase.com";
const DEFAULT_REFDATA_URL: &str = "https://hist.databento.com";
const DEFAULT_REFDATA_DATASET: &str = "GLBX.MDP3";

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database_path: String,
    pub call_timeout: Duration,
    pub contract_refresh_hours: i64,
    pub oanda_base_url: String,
    pub tradovate_base_url: String,
    pub coinbase_base_url: String,
    pub refdata_base_url: String,
    pub refdata_dataset: String,
    pub tradovate_order_qty: f64,
    pub spot_risk_fraction: f64,
    pub spot_fee_buffer: f64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr = var_or("BIND_ADDR", "0.0.0.0:8080")
            .parse()
            .context("BIND_ADDR is not a valid socket address")?;

        Ok(Self {
            bind_addr,
            database_path: var_or("DATABASE_PATH", "data/router.db"),
            call_timeout: Duration::from_millis(parse_var("BROKER_CALL_TIMEOUT_MS", 5_000)?),
            contract_refresh_hours: parse_var("CONTRACT_REFRESH_HOURS", 12)?,
            oanda_base_url: var_or("OANDA_BASE_URL", DEFAULT_OANDA_URL),
            tradovate_base_url: var_or("TRADOVATE_BASE_URL", DEFAULT_TRADOVATE_URL),
            coinbase_base_url: var_or("COINBASE_BASE_URL", DEFAULT_COINBASE_URL),
            refdata_base_url: var_or("REFDATA_BASE_URL", DEFAULT_REFDATA_URL),
            refdata_dataset: var_or("REFDATA_DATASET", DEFAULT_REFDATA_DATASET),
            tradovate_order_qty: parse_var("TRADOVATE_ORDER_QTY", 1.0)?,
            spot_risk_fraction: parse_var("SPOT_RISK_FRACTION", 0.02)?,
            spot_fee_buffer: parse_var("SPOT_FEE_BUFFER", 0.995)?,
        })
    }
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{name} has an invalid value: {raw}")),
        Err(_) => Ok(default),
    }
}
