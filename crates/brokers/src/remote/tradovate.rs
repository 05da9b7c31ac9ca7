use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info};

use common::errors::AuthError;
use common::models::{Broker, Direction, PositionSide};

use super::{VenueError, http_client};
use crate::auth::{TokenManager, TokenSource};
use crate::traits::PositionVenue;

#[derive(Debug, Clone)]
pub struct TradovateCredentials {
    pub username: String,
    pub password: String,
    pub device_id: String,
    pub cid: String,
    pub secret: String,
}

#[derive(Debug, Serialize)]
struct AccessTokenRequest<'a> {
    name: &'a str,
    password: &'a str,
    #[serde(rename = "appId")]
    app_id: &'static str,
    #[serde(rename = "appVersion")]
    app_version: &'static str,
    #[serde(rename = "deviceId")]
    device_id: &'a str,
    cid: &'a str,
    sec: &'a str,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    #[serde(rename = "accessToken")]
    access_token: String,
    #[serde(rename = "expirationTime")]
    expiration_time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct Account {
    id: i64,
}

#[derive(Debug, Deserialize)]
pub struct TradovatePosition {
    #[serde(rename = "contractId")]
    pub contract_id: i64,
    #[serde(rename = "netPos")]
    pub net_pos: f64,
}

#[derive(Debug, Deserialize)]
struct ContractItem {
    id: i64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    #[serde(rename = "orderId")]
    order_id: Option<i64>,
    #[serde(rename = "failureReason")]
    failure_reason: Option<String>,
    #[serde(rename = "failureText")]
    failure_text: Option<String>,
}

impl OrderResponse {
    fn into_order_id(self) -> Result<Option<String>, VenueError> {
        if let Some(reason) = self.failure_text.or(self.failure_reason) {
            return Err(VenueError::Rejected(reason));
        }
        Ok(self.order_id.map(|id| id.to_string()))
    }
}

/// The venue's login flow, kept separate from the order client so the
/// token manager can drive it without a reference cycle.
pub struct TradovateAuth {
    http: Client,
    base_url: String,
    creds: TradovateCredentials,
}

impl TradovateAuth {
    pub fn new(
        base_url: impl Into<String>,
        creds: TradovateCredentials,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: base_url.into(),
            creds,
        })
    }
}

#[async_trait]
impl TokenSource for TradovateAuth {
    async fn fetch(&self) -> Result<(String, DateTime<Utc>), AuthError> {
        let body = AccessTokenRequest {
            name: &self.creds.username,
            password: &self.creds.password,
            app_id: "Automation",
            app_version: "0.0.1",
            device_id: &self.creds.device_id,
            cid: &self.creds.cid,
            sec: &self.creds.secret,
        };

        let resp = self
            .http
            .post(format!("{}/auth/accesstokenrequest", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthError::new(Broker::Tradovate, e.to_string()))?;

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AuthError::new(Broker::Tradovate, text));
        }

        let parsed: AccessTokenResponse = resp
            .json()
            .await
            .map_err(|e| AuthError::new(Broker::Tradovate, format!("unexpected response: {e}")))?;
        Ok((parsed.access_token, parsed.expiration_time))
    }
}

/// Futures venue client. Every call rides on a session token from the
/// token manager; a 401 invalidates the session so the next call logs in
/// again.
pub struct TradovateClient {
    http: Client,
    base_url: String,
    account_spec: String,
    tokens: Arc<TokenManager>,
    account_id: RwLock<Option<i64>>,
}

impl TradovateClient {
    pub fn new(
        base_url: impl Into<String>,
        account_spec: impl Into<String>,
        tokens: Arc<TokenManager>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: base_url.into(),
            account_spec: account_spec.into(),
            tokens,
            account_id: RwLock::new(None),
        })
    }

    pub fn token_manager(&self) -> &TokenManager {
        &self.tokens
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<T, VenueError> {
        let token = self
            .tokens
            .get_valid_token()
            .await
            .map_err(|e| VenueError::Auth(e.cause))?;
        let resp = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&token)
            .send()
            .await?;
        self.decode(resp).await
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, VenueError> {
        let token = self
            .tokens
            .get_valid_token()
            .await
            .map_err(|e| VenueError::Auth(e.cause))?;
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&token)
            .json(body)
            .send()
            .await?;
        self.decode(resp).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        &self,
        resp: reqwest::Response,
    ) -> Result<T, VenueError> {
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate().await;
            let text = resp.text().await.unwrap_or_default();
            return Err(VenueError::Auth(text));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(VenueError::Rejected(format!("status {status}: {text}")));
        }
        Ok(resp.json::<T>().await?)
    }

    /// Default trading account, cached for the process lifetime.
    pub async fn account_id(&self) -> Result<i64, VenueError> {
        if let Some(id) = *self.account_id.read().await {
            return Ok(id);
        }
        let accounts: Vec<Account> = self.get_json("/account/list").await?;
        let id = accounts
            .first()
            .map(|a| a.id)
            .ok_or_else(|| VenueError::Rejected("no trading accounts".into()))?;
        *self.account_id.write().await = Some(id);
        Ok(id)
    }

    pub async fn positions(&self) -> Result<Vec<TradovatePosition>, VenueError> {
        self.get_json("/position/list").await
    }

    async fn contract_names(&self, ids: &[i64]) -> Result<Vec<(i64, String)>, VenueError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let joined = ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let items: Vec<ContractItem> = self
            .get_json(&format!("/contract/items?ids={joined}"))
            .await?;
        Ok(items.into_iter().map(|c| (c.id, c.name)).collect())
    }

    /// Position entry for one contract name, if any is held.
    async fn find_position(
        &self,
        instrument: &str,
    ) -> Result<Option<TradovatePosition>, VenueError> {
        let positions: Vec<TradovatePosition> = self
            .positions()
            .await?
            .into_iter()
            .filter(|p| p.net_pos != 0.0)
            .collect();
        let ids: Vec<i64> = positions.iter().map(|p| p.contract_id).collect();
        let names = self.contract_names(&ids).await?;

        for position in positions {
            if names
                .iter()
                .any(|(id, name)| *id == position.contract_id && name == instrument)
            {
                return Ok(Some(position));
            }
        }
        Ok(None)
    }

}

#[async_trait]
impl PositionVenue for TradovateClient {
    fn broker(&self) -> Broker {
        Broker::Tradovate
    }

    async fn net_position(&self, instrument: &str) -> Result<f64, VenueError> {
        Ok(self
            .find_position(instrument)
            .await?
            .map(|p| p.net_pos)
            .unwrap_or(0.0))
    }

    async fn close_position(
        &self,
        instrument: &str,
        _held: PositionSide,
    ) -> Result<Option<String>, VenueError> {
        let Some(position) = self.find_position(instrument).await? else {
            debug!("No open {} position to liquidate", instrument);
            return Ok(None);
        };
        let account_id = self.account_id().await?;

        info!("Liquidating {} (contract {})", instrument, position.contract_id);
        let resp: OrderResponse = self
            .post_json(
                "/order/liquidateposition",
                &json!({
                    "accountId": account_id,
                    "contractId": position.contract_id,
                    "admin": false,
                }),
            )
            .await?;
        resp.into_order_id()
    }

    async fn place_market_order(
        &self,
        instrument: &str,
        direction: Direction,
        quantity: f64,
        client_order_id: &str,
    ) -> Result<Option<String>, VenueError> {
        let account_id = self.account_id().await?;
        let action = match direction {
            Direction::Long => "Buy",
            Direction::Short => "Sell",
        };

        info!("Placing {} market order for {}", action, instrument);
        let resp: OrderResponse = self
            .post_json(
                "/order/placeorder",
                &json!({
                    "accountSpec": self.account_spec,
                    "accountId": account_id,
                    "action": action,
                    "symbol": instrument,
                    "orderQty": quantity as i64,
                    "orderType": "Market",
                    "isAutomated": true,
                    "customTag50": client_order_id,
                }),
            )
            .await?;
        resp.into_order_id()
    }
}
