use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use brokers::remote::{CoinbaseClient, OandaClient, TradovateClient};
use common::errors::OrderStage;
use common::models::Alert;
use signal::{Outcome, ProcessError, SignalProcessor};
use signal::resolver::ResolveError;

pub struct AppState {
    pub processor: Arc<SignalProcessor>,
    pub oanda: Arc<OandaClient>,
    pub tradovate: Arc<TradovateClient>,
    pub coinbase: Arc<CoinbaseClient>,
    pub started_at: Instant,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhook", post(webhook))
        .route("/healthcheck", get(healthcheck))
        .route("/status/oanda", get(oanda_status))
        .route("/status/tradovate", get(tradovate_status))
        .route("/status/coinbase", get(coinbase_status))
        .fallback(not_found)
        .with_state(state)
}

async fn webhook(
    State(state): State<Arc<AppState>>,
    body: String,
) -> Response {
    let request_id = Uuid::new_v4();

    let alert: Alert = match serde_json::from_str(&body) {
        Ok(alert) => alert,
        Err(e) => {
            warn!("Rejected webhook payload: {}", e);
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("invalid JSON payload: {e}"),
                request_id,
            );
        }
    };

    info!(
        "Processing webhook {} - {} on {} ({:?})",
        request_id,
        alert.market_data.symbol,
        alert.market_data.exchange,
        alert.signal.direction
    );

    match state.processor.handle(&alert).await {
        Ok(Outcome::Executed(report)) => (
            StatusCode::OK,
            Json(json!({
                "status": "executed",
                "symbol": report.symbol,
                "broker": report.broker,
                "orders": report.receipts,
                "position": report.state,
                "request_id": request_id,
            })),
        )
            .into_response(),
        Ok(Outcome::NoAction { reason }) => (
            StatusCode::OK,
            Json(json!({
                "status": "no_action",
                "reason": reason,
                "request_id": request_id,
            })),
        )
            .into_response(),
        Err(err) => {
            error!("Webhook {} failed: {}", request_id, err);
            let status = status_for(&err);
            error_response(status, err.to_string(), request_id)
        }
    }
}

/// The core returns typed errors; HTTP semantics are decided here and only
/// here.
fn status_for(err: &ProcessError) -> StatusCode {
    match err {
        ProcessError::Validation(_) => StatusCode::BAD_REQUEST,
        ProcessError::Resolve(ResolveError::Unresolved { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
        ProcessError::Resolve(ResolveError::RefData(_)) => StatusCode::BAD_GATEWAY,
        ProcessError::Auth(_) => StatusCode::BAD_GATEWAY,
        ProcessError::Conflict { .. } => StatusCode::SERVICE_UNAVAILABLE,
        ProcessError::Order(e) if e.stage == OrderStage::InsufficientBalance => {
            StatusCode::CONFLICT
        }
        ProcessError::Order(_) => StatusCode::BAD_GATEWAY,
        ProcessError::State(_) | ProcessError::NoExecutor(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(status: StatusCode, message: String, request_id: Uuid) -> Response {
    (
        status,
        Json(json!({
            "error": message,
            "request_id": request_id,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    )
        .into_response()
}

async fn healthcheck(State(state): State<Arc<AppState>>) -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "uptime_seconds": state.started_at.elapsed().as_secs(),
        })),
    )
        .into_response()
}

async fn oanda_status(State(state): State<Arc<AppState>>) -> Response {
    match state.oanda.account_summary().await {
        Ok(summary) => (
            StatusCode::OK,
            Json(json!({
                "account_id": summary.account_id,
                "balance": summary.balance,
                "unrealized_pl": summary.unrealized_pl,
                "margin_used": summary.margin_used,
                "margin_available": summary.margin_available,
                "position_value": summary.position_value,
            })),
        )
            .into_response(),
        Err(e) => broker_status_error("oanda", e),
    }
}

/// Token validity only; a status probe must not trigger a login against
/// the venue's auth endpoint.
async fn tradovate_status(State(state): State<Arc<AppState>>) -> Response {
    let validity = state.tradovate.token_manager().current_validity().await;
    let body = match validity {
        Some((expires_at, usable)) => json!({
            "token_present": true,
            "token_valid": usable,
            "token_expires_at": expires_at.to_rfc3339(),
        }),
        None => json!({
            "token_present": false,
            "token_valid": false,
        }),
    };
    (StatusCode::OK, Json(body)).into_response()
}

async fn coinbase_status(State(state): State<Arc<AppState>>) -> Response {
    match state.coinbase.list_accounts().await {
        Ok(accounts) => {
            let balances: Vec<_> = accounts
                .iter()
                .map(|a| {
                    json!({
                        "currency": a.currency,
                        "available": a.available_balance.value,
                    })
                })
                .collect();
            (
                StatusCode::OK,
                Json(json!({ "accounts": balances })),
            )
                .into_response()
        }
        Err(e) => broker_status_error("coinbase", e),
    }
}

fn broker_status_error(broker: &str, err: brokers::VenueError) -> Response {
    error!("{} status check failed: {}", broker, err);
    (
        StatusCode::BAD_GATEWAY,
        Json(json!({ "error": err.to_string() })),
    )
        .into_response()
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "endpoint not found" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use brokers::executors::{FlattenExecutor, OrderExecutor, SpotExecutor};
    use brokers::remote::{RefDataClient, TradovateAuth, TradovateCredentials};
    use brokers::auth::TokenManager;
    use chrono::Duration as ChronoDuration;
    use common::models::Broker;
    use http_body_util::BodyExt;
    use signal::SymbolResolver;
    use std::collections::HashMap;
    use std::time::Duration;
    use storage::{StateStore, TokenStore};
    use tower::util::ServiceExt;

    /// Full wiring against unroutable venue endpoints. Paths under test
    /// (validation, routing misses, idempotent no-ops, health) never make
    /// a venue call.
    async fn test_router() -> Router {
        let timeout = Duration::from_millis(200);
        let pool = storage::db::connect_ephemeral().await.unwrap();

        let oanda = Arc::new(
            OandaClient::new("http://127.0.0.1:9", "001-001", "token", timeout).unwrap(),
        );
        let creds = TradovateCredentials {
            username: "trader".into(),
            password: "pw".into(),
            device_id: "dev".into(),
            cid: "cid".into(),
            secret: "sec".into(),
        };
        let auth = TradovateAuth::new("http://127.0.0.1:9", creds, timeout).unwrap();
        let tokens = Arc::new(TokenManager::new(
            Broker::Tradovate,
            Arc::new(auth),
            TokenStore::new(pool.clone()),
        ));
        let tradovate = Arc::new(
            TradovateClient::new("http://127.0.0.1:9", "trader", tokens, timeout).unwrap(),
        );
        let coinbase = Arc::new(
            CoinbaseClient::new("http://127.0.0.1:9", "key", "secret", timeout).unwrap(),
        );
        let feed = Arc::new(
            RefDataClient::new("http://127.0.0.1:9", "key", "GLBX.MDP3", timeout).unwrap(),
        );

        let resolver = Arc::new(SymbolResolver::new(feed, ChronoDuration::hours(12)));
        let mut executors: HashMap<Broker, Arc<dyn OrderExecutor>> = HashMap::new();
        executors.insert(
            Broker::Oanda,
            Arc::new(FlattenExecutor::new(oanda.clone(), 1.0)),
        );
        executors.insert(
            Broker::Tradovate,
            Arc::new(FlattenExecutor::new(tradovate.clone(), 1.0)),
        );
        executors.insert(Broker::Coinbase, Arc::new(SpotExecutor::new(coinbase.clone())));

        let processor = Arc::new(SignalProcessor::new(
            resolver,
            StateStore::new(pool),
            executors,
        ));

        build_router(Arc::new(AppState {
            processor,
            oanda,
            tradovate,
            coinbase,
            started_at: Instant::now(),
        }))
    }

    fn webhook_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn healthcheck_reports_healthy() {
        let app = test_router().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/healthcheck")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn malformed_payload_is_a_bad_request() {
        let app = test_router().await;
        let response = app
            .oneshot(webhook_request("{\"not\": \"an alert\"}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("invalid JSON payload"));
    }

    #[tokio::test]
    async fn inconsistent_trigger_direction_is_a_bad_request() {
        let app = test_router().await;
        let body = r#"{
            "action": "SHORT_ENTRY",
            "indicator": "Trend Validator",
            "signal": {"type": "TREND", "direction": "SHORT", "trigger": "COLOR_CHANGE_BLUE"},
            "market_data": {"symbol": "EURUSD", "exchange": "OANDA", "timeframe": "1h", "timestamp": "2026-03-02T14:30:00Z"},
            "price_data": {"open": 1.0, "high": 1.0, "low": 1.0, "close": 1.0, "volume": 0.0}
        }"#;
        let response = app.oneshot(webhook_request(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unroutable_symbol_is_unprocessable() {
        let app = test_router().await;
        let body = r#"{
            "action": "LONG_ENTRY",
            "indicator": "Trend Validator",
            "signal": {"type": "TREND", "direction": "LONG", "trigger": "COLOR_CHANGE_BLUE"},
            "market_data": {"symbol": "EURUSD", "exchange": "NASDAQ", "timeframe": "1h", "timestamp": "2026-03-02T14:30:00Z"},
            "price_data": {"open": 1.0, "high": 1.0, "low": 1.0, "close": 1.0, "volume": 0.0}
        }"#;
        let response = app.oneshot(webhook_request(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn noop_momentum_signal_short_circuits_without_a_venue() {
        let app = test_router().await;
        // Momentum alert for a flat, never-traded symbol: no transition,
        // no broker call, 200 with an explicit no-action status.
        let body = r#"{
            "action": "LONG_ENTRY",
            "indicator": "DI Cross",
            "signal": {"type": "MOMENTUM", "direction": "LONG", "trigger": "DI_CROSS"},
            "market_data": {"symbol": "EURUSD", "exchange": "OANDA", "timeframe": "1h", "timestamp": "2026-03-02T14:30:00Z"},
            "price_data": {"open": 1.0, "high": 1.0, "low": 1.0, "close": 1.0, "volume": 0.0}
        }"#;
        let response = app.oneshot(webhook_request(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "no_action");
    }

    #[tokio::test]
    async fn tradovate_status_reports_missing_token_without_login() {
        let app = test_router().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/status/tradovate")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["token_present"], false);
        assert_eq!(body["token_valid"], false);
    }

    #[tokio::test]
    async fn unknown_endpoint_is_not_found() {
        let app = test_router().await;
        let response = app
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
