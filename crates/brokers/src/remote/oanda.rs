use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use common::models::{Broker, Direction, PositionSide};

use super::{VenueError, http_client};
use crate::traits::PositionVenue;

/// Units per standard lot; every forex market order trades one lot.
const STANDARD_LOT_UNITS: f64 = 100_000.0;

#[derive(Debug, Deserialize)]
pub struct AccountSummary {
    pub account_id: String,
    pub balance: String,
    pub unrealized_pl: String,
    pub margin_used: String,
    pub margin_available: String,
    pub position_value: String,
}

#[derive(Debug, Deserialize)]
struct PositionsResponse {
    #[serde(default)]
    positions: Vec<RawPosition>,
}

#[derive(Debug, Deserialize)]
struct RawPosition {
    instrument: String,
    long: PositionLeg,
    short: PositionLeg,
}

#[derive(Debug, Deserialize)]
struct PositionLeg {
    units: String,
}

#[derive(Debug, Serialize)]
struct MarketOrder<'a> {
    units: String,
    instrument: &'a str,
    #[serde(rename = "timeInForce")]
    time_in_force: &'static str,
    #[serde(rename = "type")]
    order_type: &'static str,
    #[serde(rename = "positionFill")]
    position_fill: &'static str,
    #[serde(rename = "clientExtensions")]
    client_extensions: ClientExtensions,
}

#[derive(Debug, Serialize)]
struct ClientExtensions {
    id: String,
}

/// Forex venue client. Authentication is a long-lived bearer token from
/// the secret store; there is no session refresh flow on this venue.
pub struct OandaClient {
    http: Client,
    base_url: String,
    account_id: String,
    access_token: String,
}

impl OandaClient {
    pub fn new(
        base_url: impl Into<String>,
        account_id: impl Into<String>,
        access_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: base_url.into(),
            account_id: account_id.into(),
            access_token: access_token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/v3/accounts/{}{}",
            self.base_url, self.account_id, path
        )
    }

    async fn check(&self, resp: reqwest::Response) -> Result<serde_json::Value, VenueError> {
        let status = resp.status();
        let body: serde_json::Value = resp.json().await.unwrap_or(serde_json::Value::Null);
        let message = body
            .get("errorMessage")
            .and_then(|m| m.as_str())
            .unwrap_or("")
            .to_string();

        match status {
            s if s.is_success() => Ok(body),
            StatusCode::UNAUTHORIZED => Err(VenueError::Auth(message)),
            StatusCode::BAD_REQUEST => Err(VenueError::Rejected(format!(
                "invalid order specification: {message}"
            ))),
            StatusCode::NOT_FOUND => Err(VenueError::Rejected(format!(
                "account or position does not exist: {message}"
            ))),
            s => Err(VenueError::Rejected(format!("unexpected status {s}: {message}"))),
        }
    }

    /// Read-only account summary for the status endpoint.
    pub async fn account_summary(&self) -> Result<AccountSummary, VenueError> {
        let resp = self
            .http
            .get(self.url("/summary"))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let body = self.check(resp).await?;
        let account = &body["account"];
        Ok(AccountSummary {
            account_id: account["id"].as_str().unwrap_or_default().to_string(),
            balance: account["balance"].as_str().unwrap_or_default().to_string(),
            unrealized_pl: account["unrealizedPL"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            margin_used: account["marginUsed"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            margin_available: account["marginAvailable"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            position_value: account["positionValue"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
        })
    }
}

#[async_trait]
impl PositionVenue for OandaClient {
    fn broker(&self) -> Broker {
        Broker::Oanda
    }

    async fn net_position(&self, instrument: &str) -> Result<f64, VenueError> {
        let resp = self
            .http
            .get(self.url("/openPositions"))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let body = self.check(resp).await?;
        let parsed: PositionsResponse =
            serde_json::from_value(body).map_err(|e| VenueError::Transport(e.to_string()))?;

        for position in parsed.positions {
            if position.instrument == instrument {
                let long: f64 = position.long.units.parse().unwrap_or(0.0);
                let short: f64 = position.short.units.parse().unwrap_or(0.0);
                return Ok(long + short);
            }
        }
        Ok(0.0)
    }

    async fn close_position(
        &self,
        instrument: &str,
        held: PositionSide,
    ) -> Result<Option<String>, VenueError> {
        let body = match held {
            PositionSide::Long => json!({ "longUnits": "ALL" }),
            PositionSide::Short => json!({ "shortUnits": "ALL" }),
            PositionSide::Flat => return Ok(None),
        };

        debug!("Closing {} {:?} leg", instrument, held);
        let resp = self
            .http
            .put(self.url(&format!("/positions/{}/close", instrument)))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;
        let body = self.check(resp).await?;

        let fill_id = match held {
            PositionSide::Long => body["longOrderFillTransaction"]["id"].as_str(),
            PositionSide::Short => body["shortOrderFillTransaction"]["id"].as_str(),
            PositionSide::Flat => None,
        };
        info!("Position closeout processed for {}", instrument);
        Ok(fill_id.map(str::to_string))
    }

    async fn place_market_order(
        &self,
        instrument: &str,
        direction: Direction,
        quantity: f64,
        client_order_id: &str,
    ) -> Result<Option<String>, VenueError> {
        let lots = if quantity > 0.0 { quantity } else { 1.0 };
        let units = match direction {
            Direction::Long => lots * STANDARD_LOT_UNITS,
            Direction::Short => -lots * STANDARD_LOT_UNITS,
        };

        let order = MarketOrder {
            units: format!("{}", units as i64),
            instrument,
            time_in_force: "FOK",
            order_type: "MARKET",
            position_fill: "DEFAULT",
            client_extensions: ClientExtensions {
                id: client_order_id.to_string(),
            },
        };

        info!("Placing {:?} market order for {}", direction, instrument);
        let resp = self
            .http
            .post(self.url("/orders"))
            .bearer_auth(&self.access_token)
            .json(&json!({ "order": order }))
            .send()
            .await?;
        let body = self.check(resp).await?;

        Ok(body["orderFillTransaction"]["id"]
            .as_str()
            .or_else(|| body["orderCreateTransaction"]["id"].as_str())
            .map(str::to_string))
    }
}
