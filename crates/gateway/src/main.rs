use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dotenvy::dotenv;
use tracing::info;

use brokers::auth::TokenManager;
use brokers::executors::{FlattenExecutor, OrderExecutor, SpotExecutor};
use brokers::remote::{
    CoinbaseClient, OandaClient, RefDataClient, TradovateAuth, TradovateClient,
    TradovateCredentials,
};
use common::actors::ActorType;
use common::logger;
use common::models::Broker;
use common::traits::SecretStore;
use signal::{SignalProcessor, SymbolResolver};
use storage::{EnvSecrets, StateStore, TokenStore};

use crate::actors::refresh_actor::ContractRefreshActor;
use crate::actors::supervisor::Supervisor;
use crate::config::Config;
use crate::routes::{AppState, build_router};

mod actors;
mod config;
mod routes;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logger::setup_logger();
    dotenv().ok();
    info!("Order router starting up...");

    let config = Config::from_env()?;
    let pool = storage::connect(&config.database_path).await?;
    let secrets = EnvSecrets;

    // Forex venue: long-lived bearer token, no session refresh.
    let oanda = Arc::new(OandaClient::new(
        &config.oanda_base_url,
        secrets.get("OANDA_ACCOUNT").await?,
        secrets.get("OANDA_SECRET").await?,
        config.call_timeout,
    )?);

    // Futures venue: short-lived session tokens behind the single-flight
    // manager, persisted so restarts re-use a live session.
    let creds = TradovateCredentials {
        username: secrets.get("TRADOVATE_USERNAME").await?,
        password: secrets.get("TRADOVATE_PASSWORD").await?,
        device_id: secrets.get("TRADOVATE_DEVICE_ID").await?,
        cid: secrets.get("TRADOVATE_CID").await?,
        secret: secrets.get("TRADOVATE_SECRET").await?,
    };
    let account_spec = creds.username.clone();
    let tradovate_auth =
        TradovateAuth::new(&config.tradovate_base_url, creds, config.call_timeout)?;
    let tokens = Arc::new(TokenManager::new(
        Broker::Tradovate,
        Arc::new(tradovate_auth),
        TokenStore::new(pool.clone()),
    ));
    let tradovate = Arc::new(TradovateClient::new(
        &config.tradovate_base_url,
        account_spec,
        tokens,
        config.call_timeout,
    )?);

    // Spot venue: HMAC-signed requests with static API keys.
    let coinbase = Arc::new(CoinbaseClient::new(
        &config.coinbase_base_url,
        secrets.get("COINBASE_API_KEY").await?,
        secrets.get("COINBASE_API_SECRET").await?,
        config.call_timeout,
    )?);

    let feed = Arc::new(RefDataClient::new(
        &config.refdata_base_url,
        secrets.get("REFDATA_API_KEY").await?,
        &config.refdata_dataset,
        config.call_timeout,
    )?);
    let resolver = Arc::new(SymbolResolver::new(
        feed,
        chrono::Duration::hours(config.contract_refresh_hours),
    ));

    let mut executors: HashMap<Broker, Arc<dyn OrderExecutor>> = HashMap::new();
    executors.insert(
        Broker::Oanda,
        Arc::new(FlattenExecutor::new(oanda.clone(), 1.0)),
    );
    executors.insert(
        Broker::Tradovate,
        Arc::new(FlattenExecutor::new(
            tradovate.clone(),
            config.tradovate_order_qty,
        )),
    );
    executors.insert(
        Broker::Coinbase,
        Arc::new(
            SpotExecutor::new(coinbase.clone())
                .with_sizing(config.spot_risk_fraction, config.spot_fee_buffer),
        ),
    );

    let processor = Arc::new(SignalProcessor::new(
        resolver.clone(),
        StateStore::new(pool),
        executors,
    ));

    // Contract cache refresh runs under the supervisor so a wedged feed
    // call gets the task restarted instead of silently going stale.
    let mut supervisor = Supervisor::new();
    let refresh_interval = Duration::from_secs(config.contract_refresh_hours as u64 * 3600);
    let resolver_for_actor = resolver.clone();
    supervisor.register_actor(
        ActorType::ContractRefreshActor,
        Box::new(move || {
            Box::new(ContractRefreshActor::new(
                resolver_for_actor.clone(),
                refresh_interval,
            ))
        }),
    );
    tokio::spawn(async move { supervisor.start().await });

    let app = build_router(Arc::new(AppState {
        processor,
        oanda,
        tradovate,
        coinbase,
        started_at: Instant::now(),
    }));

    info!("Listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
