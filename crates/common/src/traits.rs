use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("secret {name} unavailable: {cause}")]
pub struct SecretError {
    pub name: String,
    pub cause: String,
}

impl SecretError {
    pub fn new(name: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cause: cause.into(),
        }
    }
}

/// Narrow key-value contract over whatever holds broker credentials. The
/// core depends only on get/put by name, not on the store behind it.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<String, SecretError>;

    async fn put(&self, name: &str, value: &str) -> Result<(), SecretError>;
}

#[derive(Debug, Clone, Error)]
#[error("reference data lookup for {root} failed: {cause}")]
pub struct RefDataError {
    pub root: String,
    pub cause: String,
}

impl RefDataError {
    pub fn new(root: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            cause: cause.into(),
        }
    }
}

/// Market reference-data feed answering "which contract is currently the
/// front month for this root". Futures contracts roll, so answers are only
/// valid for one cache epoch.
#[async_trait]
pub trait ReferenceDataFeed: Send + Sync {
    async fn lookup_active_contract(&self, root: &str) -> Result<String, RefDataError>;
}
