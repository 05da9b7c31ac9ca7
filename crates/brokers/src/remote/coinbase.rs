use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tracing::info;

use common::models::Broker;

use super::{VenueError, http_client};
use crate::traits::SpotVenue;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
pub struct SpotAccount {
    pub uuid: String,
    pub currency: String,
    pub available_balance: AccountBalance,
}

#[derive(Debug, Deserialize)]
pub struct AccountBalance {
    pub value: String,
    pub currency: String,
}

#[derive(Debug, Deserialize)]
struct AccountsResponse {
    accounts: Vec<SpotAccount>,
}

#[derive(Debug, Deserialize)]
struct BestBidAskResponse {
    pricebooks: Vec<Pricebook>,
}

#[derive(Debug, Deserialize)]
struct Pricebook {
    #[serde(default)]
    bids: Vec<PriceLevel>,
    #[serde(default)]
    asks: Vec<PriceLevel>,
}

#[derive(Debug, Deserialize)]
struct PriceLevel {
    price: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    success: bool,
    #[serde(default)]
    success_response: Option<OrderSuccess>,
    #[serde(default)]
    error_response: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OrderSuccess {
    order_id: String,
}

/// Spot exchange client. Every request carries an HMAC-SHA256 signature
/// over (timestamp, method, path, body) in the CB-ACCESS headers.
pub struct CoinbaseClient {
    http: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

impl CoinbaseClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: base_url.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        })
    }

    fn sign(&self, timestamp: &str, method: &Method, path: &str, body: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(timestamp.as_bytes());
        mac.update(method.as_str().as_bytes());
        mac.update(path.as_bytes());
        mac.update(body.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, VenueError> {
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let body_str = body
            .as_ref()
            .map(|b| b.to_string())
            .unwrap_or_default();
        // The signature covers the path without the query string.
        let sign_path = path.split('?').next().unwrap_or(path);
        let signature = self.sign(&timestamp, &method, sign_path, &body_str);

        let mut req = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .header("CB-ACCESS-KEY", &self.api_key)
            .header("CB-ACCESS-SIGN", signature)
            .header("CB-ACCESS-TIMESTAMP", timestamp);
        if let Some(body) = &body {
            req = req.json(body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let text = resp.text().await.unwrap_or_default();
            return Err(VenueError::Auth(text));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(VenueError::Rejected(format!("status {status}: {text}")));
        }
        Ok(resp.json::<T>().await?)
    }

    /// First page of accounts, for the status endpoint.
    pub async fn list_accounts(&self) -> Result<Vec<SpotAccount>, VenueError> {
        let resp: AccountsResponse = self
            .request(Method::GET, "/api/v3/brokerage/accounts", None)
            .await?;
        Ok(resp.accounts)
    }

    async fn place_order(
        &self,
        product: &str,
        side: &str,
        base_size: f64,
        client_order_id: &str,
    ) -> Result<Option<String>, VenueError> {
        info!("Placing {} order for {} - Size: {}", side, product, base_size);
        let body = json!({
            "client_order_id": client_order_id,
            "product_id": product,
            "side": side,
            "order_configuration": {
                "market_market_ioc": { "base_size": format!("{base_size}") }
            }
        });

        let resp: OrderResponse = self
            .request(Method::POST, "/api/v3/brokerage/orders", Some(body))
            .await?;
        if !resp.success {
            let detail = resp
                .error_response
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error in order response".into());
            return Err(VenueError::Rejected(detail));
        }
        Ok(resp.success_response.map(|s| s.order_id))
    }
}

#[async_trait]
impl SpotVenue for CoinbaseClient {
    fn broker(&self) -> Broker {
        Broker::Coinbase
    }

    async fn available_balance(&self, currency: &str) -> Result<f64, VenueError> {
        for account in self.list_accounts().await? {
            if account.currency == currency {
                // The balance object carries its own currency tag; a
                // mismatch means we are reading the wrong book.
                if account.available_balance.currency != currency {
                    return Err(VenueError::Rejected(format!(
                        "currency mismatch: requested {currency}, got {}",
                        account.available_balance.currency
                    )));
                }
                return Ok(account.available_balance.value.parse().unwrap_or(0.0));
            }
        }
        Err(VenueError::Rejected(format!(
            "no account found for currency {currency}"
        )))
    }

    async fn best_ask(&self, product: &str) -> Result<f64, VenueError> {
        let resp: BestBidAskResponse = self
            .request(
                Method::GET,
                &format!("/api/v3/brokerage/best_bid_ask?product_ids={product}"),
                None,
            )
            .await?;
        let ask = resp
            .pricebooks
            .first()
            .and_then(|pb| pb.asks.first())
            .and_then(|level| level.price.parse::<f64>().ok());
        // Bids must exist too or the book is one-sided and unusable.
        let bid = resp
            .pricebooks
            .first()
            .and_then(|pb| pb.bids.first())
            .and_then(|level| level.price.parse::<f64>().ok());
        match (ask, bid) {
            (Some(ask), Some(_)) => Ok(ask),
            _ => Err(VenueError::Rejected(format!(
                "unable to get valid bid/ask prices for {product}"
            ))),
        }
    }

    async fn market_buy(
        &self,
        product: &str,
        base_size: f64,
        client_order_id: &str,
    ) -> Result<Option<String>, VenueError> {
        self.place_order(product, "BUY", base_size, client_order_id)
            .await
    }

    async fn market_sell(
        &self,
        product: &str,
        base_size: f64,
        client_order_id: &str,
    ) -> Result<Option<String>, VenueError> {
        self.place_order(product, "SELL", base_size, client_order_id)
            .await
    }
}
