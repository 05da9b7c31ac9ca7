pub mod coinbase;
pub mod oanda;
pub mod refdata;
pub mod tradovate;

pub use coinbase::CoinbaseClient;
pub use oanda::OandaClient;
pub use refdata::RefDataClient;
pub use tradovate::{TradovateAuth, TradovateClient, TradovateCredentials};

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VenueError {
    #[error("authentication rejected: {0}")]
    Auth(String),
    /// The call may or may not have been applied by the venue.
    #[error("request timed out")]
    Timeout,
    #[error("venue rejected request: {0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for VenueError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            VenueError::Timeout
        } else {
            VenueError::Transport(err.to_string())
        }
    }
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().timeout(timeout).build()
}
