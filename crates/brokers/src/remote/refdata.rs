use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use tracing::debug;

use common::traits::{RefDataError, ReferenceDataFeed};

use super::http_client;

/// Front-contract lookup against the market reference-data provider's
/// symbology endpoint: continuous root in, currently active raw contract
/// out.
pub struct RefDataClient {
    http: Client,
    base_url: String,
    api_key: String,
    dataset: String,
}

impl RefDataClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        dataset: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: base_url.into(),
            api_key: api_key.into(),
            dataset: dataset.into(),
        })
    }
}

#[async_trait]
impl ReferenceDataFeed for RefDataClient {
    async fn lookup_active_contract(&self, root: &str) -> Result<String, RefDataError> {
        let continuous = format!("{root}.n.0");
        let date = Utc::now().date_naive().to_string();

        let resp = self
            .http
            .get(format!("{}/v0/symbology.resolve", self.base_url))
            .basic_auth(&self.api_key, None::<&str>)
            .query(&[
                ("dataset", self.dataset.as_str()),
                ("symbols", continuous.as_str()),
                ("stype_in", "continuous"),
                ("stype_out", "raw_symbol"),
                ("start_date", date.as_str()),
            ])
            .send()
            .await
            .map_err(|e| RefDataError::new(root, e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(RefDataError::new(root, format!("status {status}: {text}")));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| RefDataError::new(root, e.to_string()))?;

        let contract = body["result"][&continuous]
            .as_array()
            .and_then(|mappings| mappings.first())
            .and_then(|m| m["s"].as_str())
            .map(str::to_string)
            .ok_or_else(|| RefDataError::new(root, "no mapping in symbology response"))?;

        debug!("Resolved {} -> {}", continuous, contract);
        Ok(contract)
    }
}
