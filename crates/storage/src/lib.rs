pub mod db;
pub mod secrets;
pub mod state;
pub mod tokens;

pub use db::connect;
pub use secrets::{EnvSecrets, MemorySecrets};
pub use state::{StateError, StateStore};
pub use tokens::{BrokerToken, TokenStore};
