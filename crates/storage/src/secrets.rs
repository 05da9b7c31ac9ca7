use std::collections::HashMap;
use std::env;

use async_trait::async_trait;
use tokio::sync::RwLock;

use common::traits::{SecretError, SecretStore};

/// Environment-backed secret source (dotenv-friendly). Deployment injects
/// broker credentials as environment variables named after the secret.
pub struct EnvSecrets;

#[async_trait]
impl SecretStore for EnvSecrets {
    async fn get(&self, name: &str) -> Result<String, SecretError> {
        env::var(name).map_err(|_| SecretError::new(name, "environment variable not set"))
    }

    async fn put(&self, name: &str, _value: &str) -> Result<(), SecretError> {
        Err(SecretError::new(
            name,
            "environment-backed secrets are read-only",
        ))
    }
}

/// In-memory secret store for tests.
#[derive(Default)]
pub struct MemorySecrets {
    values: RwLock<HashMap<String, String>>,
}

impl MemorySecrets {
    pub fn with(pairs: &[(&str, &str)]) -> Self {
        let values = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            values: RwLock::new(values),
        }
    }
}

#[async_trait]
impl SecretStore for MemorySecrets {
    async fn get(&self, name: &str) -> Result<String, SecretError> {
        self.values
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| SecretError::new(name, "not present"))
    }

    async fn put(&self, name: &str, value: &str) -> Result<(), SecretError> {
        self.values
            .write()
            .await
            .insert(name.to_string(), value.to_string());
        Ok(())
    }
}
