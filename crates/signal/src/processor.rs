use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use brokers::executors::OrderExecutor;
use common::errors::{AuthError, ExecutorError, OrderError, ValidationError};
use common::models::{
    Alert, AssetClass, Broker, Direction, OrderIntent, OrderReceipt, PositionRecord, PositionSide,
    RoutingKey, SignalKind, TrendColor, Trigger,
};
use storage::state::{StateError, StateStore};

use crate::resolver::{ResolveError, SymbolResolver};

/// CAS attempts per commit before the request fails as transient.
const MAX_CAS_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Order(#[from] OrderError),
    #[error("state conflict for {symbol} after {attempts} attempts")]
    Conflict { symbol: String, attempts: u32 },
    #[error("state backend error: {0}")]
    State(#[from] StateError),
    #[error("no executor configured for {0}")]
    NoExecutor(Broker),
}

impl From<ExecutorError> for ProcessError {
    fn from(err: ExecutorError) -> Self {
        match err {
            ExecutorError::Auth(e) => ProcessError::Auth(e),
            ExecutorError::Order(e) => ProcessError::Order(e),
        }
    }
}

#[derive(Debug)]
pub struct ExecutionReport {
    pub symbol: String,
    pub broker: Broker,
    pub receipts: Vec<OrderReceipt>,
    pub state: PositionRecord,
}

#[derive(Debug)]
pub enum Outcome {
    Executed(ExecutionReport),
    /// The alert caused no transition: duplicate delivery, stale momentum
    /// signal, or an exit with nothing to exit. No broker was called.
    NoAction { reason: String },
}

/// What one alert asks of the venue, derived from current state before any
/// broker call is made.
#[derive(Debug, PartialEq)]
enum Plan {
    NoAction(String),
    Transition {
        /// Held side to flatten first, if any.
        close: Option<PositionSide>,
        /// Direction to enter after any close confirms.
        open: Option<Direction>,
        next_color: TrendColor,
        next_waiting: bool,
    },
}

/// The decision core: validates an alert, routes it, reads per-symbol
/// state, derives the transition, drives the venue executor close-then-
/// open, and commits state only on executor confirmation.
pub struct SignalProcessor {
    resolver: Arc<SymbolResolver>,
    state: StateStore,
    executors: HashMap<Broker, Arc<dyn OrderExecutor>>,
}

impl SignalProcessor {
    pub fn new(
        resolver: Arc<SymbolResolver>,
        state: StateStore,
        executors: HashMap<Broker, Arc<dyn OrderExecutor>>,
    ) -> Self {
        Self {
            resolver,
            state,
            executors,
        }
    }

    pub async fn handle(&self, alert: &Alert) -> Result<Outcome, ProcessError> {
        alert.validate()?;

        let symbol = alert.market_data.symbol.clone();
        let key = self
            .resolver
            .resolve(&symbol, &alert.market_data.exchange)
            .await?;
        let executor = self
            .executors
            .get(&key.broker)
            .ok_or(ProcessError::NoExecutor(key.broker))?
            .clone();

        let mut record = self.state.get(&symbol).await?;

        // A suspect record means the last venue call for this symbol had an
        // unknown outcome; rewrite local state from the venue before
        // trusting it for a trade decision.
        if record.suspect {
            record = self.reconcile_record(&executor, &key, &symbol).await?;
        }

        let plan = decide(alert, &record);
        info!("Decision for {}: {:?}", symbol, plan);

        let (close, open, next_color, next_waiting) = match plan {
            Plan::NoAction(reason) => return Ok(Outcome::NoAction { reason }),
            Plan::Transition {
                close,
                open,
                next_color,
                next_waiting,
            } => (close, open, next_color, next_waiting),
        };

        let mut receipts = Vec::new();
        let mut current = record;

        // A transition with no venue legs (e.g. the trend color catching
        // up after reconciliation) is pure bookkeeping.
        if close.is_none() && open.is_none() {
            current = self
                .commit(current, |rec| {
                    rec.trend_color = next_color;
                    rec.waiting_for_reentry = next_waiting;
                    rec.suspect = false;
                })
                .await?;
            return Ok(Outcome::Executed(ExecutionReport {
                symbol,
                broker: key.broker,
                receipts,
                state: current,
            }));
        }

        if let Some(held) = close {
            let quantity = (key.asset_class == AssetClass::Crypto && current.held_quantity > 0.0)
                .then_some(current.held_quantity);
            let intent = OrderIntent::close(
                &key,
                &symbol,
                held,
                quantity,
                alert.market_data.timestamp,
            );

            let receipt = match executor.execute(&intent).await {
                Ok(receipt) => receipt,
                Err(err) => return self.fail_leg(&symbol, err).await,
            };
            receipts.push(receipt);

            // The close is confirmed: record the flat position now, so a
            // failure on the open leg cannot leave state claiming exposure
            // that no longer exists.
            current = self
                .commit(current, |rec| {
                    rec.position = PositionSide::Flat;
                    rec.trend_color = next_color;
                    rec.waiting_for_reentry = next_waiting && open.is_none();
                    if key.asset_class == AssetClass::Crypto {
                        rec.held_quantity = 0.0;
                    }
                    rec.suspect = false;
                })
                .await?;
        }

        if let Some(direction) = open {
            let intent = OrderIntent::open(&key, &symbol, direction, alert.market_data.timestamp);

            let receipt = match executor.execute(&intent).await {
                Ok(receipt) => receipt,
                Err(err) => return self.fail_leg(&symbol, err).await,
            };

            let filled = receipt.filled_quantity;
            receipts.push(receipt);

            current = self
                .commit(current, |rec| {
                    rec.position = direction.into();
                    rec.trend_color = next_color;
                    rec.waiting_for_reentry = false;
                    if key.asset_class == AssetClass::Crypto {
                        rec.held_quantity = filled.unwrap_or(0.0);
                    }
                    rec.suspect = false;
                })
                .await?;
        }

        Ok(Outcome::Executed(ExecutionReport {
            symbol,
            broker: key.broker,
            receipts,
            state: current,
        }))
    }

    /// Rewrite a symbol's record from the venue's actual position and
    /// clear the suspect flag. Public so operators can force a check after
    /// an unknown-outcome incident.
    pub async fn reconcile(
        &self,
        ticker: &str,
        exchange: &str,
    ) -> Result<PositionRecord, ProcessError> {
        let key = self.resolver.resolve(ticker, exchange).await?;
        let executor = self
            .executors
            .get(&key.broker)
            .ok_or(ProcessError::NoExecutor(key.broker))?
            .clone();
        self.reconcile_record(&executor, &key, ticker).await
    }

    async fn reconcile_record(
        &self,
        executor: &Arc<dyn OrderExecutor>,
        key: &RoutingKey,
        symbol: &str,
    ) -> Result<PositionRecord, ProcessError> {
        let live = executor.live_position(key).await?;
        info!(
            "Reconciling {} against {}: {:?} {}",
            symbol, key.broker, live.side, live.quantity
        );

        let record = self.state.get(symbol).await?;
        let committed = self
            .commit(record, |rec| {
                rec.position = live.side;
                rec.held_quantity = if key.asset_class == AssetClass::Crypto {
                    live.quantity
                } else {
                    0.0
                };
                // A reconciled flat position invalidates any pending
                // re-entry bookkeeping.
                if live.side == PositionSide::Flat {
                    rec.held_quantity = 0.0;
                }
                rec.suspect = false;
            })
            .await?;
        Ok(committed)
    }

    /// A venue leg failed. A known failure leaves state exactly as the
    /// last confirmation put it; an unknown outcome (timeout) additionally
    /// poisons the record until reconciliation.
    async fn fail_leg(&self, symbol: &str, err: ExecutorError) -> Result<Outcome, ProcessError> {
        if let ExecutorError::Order(order_err) = &err
            && order_err.unknown_outcome()
        {
            warn!(
                "Unknown order outcome for {}; marking state suspect",
                symbol
            );
            let record = self.state.get(symbol).await?;
            if let Err(e) = self.commit(record, |rec| rec.suspect = true).await {
                error!("Failed to mark {} suspect: {}", symbol, e);
            }
        }
        Err(err.into())
    }

    /// CAS commit of a confirmed transition. The first attempt writes
    /// against the version the decision read; on conflict the venue effect
    /// has still happened, so re-read and re-apply the (absolute) mutation
    /// rather than lose a real fill — bounded, then transient failure.
    async fn commit<F>(
        &self,
        record: PositionRecord,
        mutate: F,
    ) -> Result<PositionRecord, ProcessError>
    where
        F: Fn(&mut PositionRecord),
    {
        let symbol = record.symbol.clone();
        let mut candidate = record;
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            mutate(&mut candidate);
            match self.state.compare_and_update(&candidate).await {
                Ok(committed) => return Ok(committed),
                Err(StateError::Conflict { .. }) if attempt < MAX_CAS_ATTEMPTS => {
                    warn!("CAS retry {} for {}", attempt, symbol);
                    candidate = self.state.get(&symbol).await?;
                }
                Err(StateError::Conflict { .. }) => {
                    return Err(ProcessError::Conflict {
                        symbol,
                        attempts: MAX_CAS_ATTEMPTS,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ProcessError::Conflict {
            symbol,
            attempts: MAX_CAS_ATTEMPTS,
        })
    }
}

/// Pure transition decision. Exercised heavily by tests; no I/O.
fn decide(alert: &Alert, record: &PositionRecord) -> Plan {
    let direction = alert.signal.direction;

    match alert.signal.kind {
        SignalKind::Trend => {
            let color = match alert.signal.trigger {
                Trigger::ColorChangeBlue => TrendColor::Blue,
                Trigger::ColorChangeRed => TrendColor::Red,
                // validate() has already excluded DI_CROSS here.
                Trigger::DiCross => return Plan::NoAction("momentum trigger on trend signal".into()),
            };

            if record.trend_color == color && record.position.matches(direction) {
                return Plan::NoAction(format!(
                    "duplicate trend signal: already {:?}/{:?}",
                    record.position, color
                ));
            }

            let close = (record.position != PositionSide::Flat
                && !record.position.matches(direction))
            .then_some(record.position);
            let open = (!record.position.matches(direction)).then_some(direction);

            Plan::Transition {
                close,
                open,
                next_color: color,
                next_waiting: false,
            }
        }
        SignalKind::Momentum => {
            // Re-entry: momentum resumed in the direction of the standing
            // trend while we sat out.
            if record.waiting_for_reentry && record.trend_color.direction() == Some(direction) {
                return Plan::Transition {
                    close: None,
                    open: Some(direction),
                    next_color: record.trend_color,
                    next_waiting: false,
                };
            }

            // Exit: momentum reversed against an open position.
            if record.position != PositionSide::Flat && !record.position.matches(direction) {
                return Plan::Transition {
                    close: Some(record.position),
                    open: None,
                    next_color: record.trend_color,
                    next_waiting: true,
                };
            }

            Plan::NoAction(format!(
                "momentum signal with no applicable transition: position {:?}, waiting {}",
                record.position, record.waiting_for_reentry
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use brokers::executors::client_order_id;
    use chrono::{Duration, TimeZone, Utc};
    use common::errors::{ExecutorError, OrderStage};
    use common::models::{IntentKind, LivePosition};
    use common::traits::{RefDataError, ReferenceDataFeed};
    use std::sync::Mutex;

    struct FixedFeed;

    #[async_trait]
    impl ReferenceDataFeed for FixedFeed {
        async fn lookup_active_contract(&self, _root: &str) -> Result<String, RefDataError> {
            Ok("ESZ6".to_string())
        }
    }

    /// Recording executor double. Pops scripted errors per call; defaults
    /// to success.
    struct StubExecutor {
        broker: Broker,
        executed: Mutex<Vec<OrderIntent>>,
        failures: Mutex<Vec<ExecutorError>>,
        live: Mutex<LivePosition>,
        fill: Option<f64>,
    }

    impl StubExecutor {
        fn new(broker: Broker) -> Self {
            Self {
                broker,
                executed: Mutex::new(Vec::new()),
                failures: Mutex::new(Vec::new()),
                live: Mutex::new(LivePosition::flat()),
                fill: Some(1.0),
            }
        }

        fn fail_next(&self, err: ExecutorError) {
            self.failures.lock().unwrap().push(err);
        }

        fn set_live(&self, live: LivePosition) {
            *self.live.lock().unwrap() = live;
        }

        fn intents(&self) -> Vec<OrderIntent> {
            self.executed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl OrderExecutor for StubExecutor {
        fn broker(&self) -> Broker {
            self.broker
        }

        async fn execute(&self, intent: &OrderIntent) -> Result<OrderReceipt, ExecutorError> {
            if let Some(err) = self.failures.lock().unwrap().pop() {
                return Err(err);
            }
            self.executed.lock().unwrap().push(intent.clone());
            Ok(OrderReceipt {
                broker: self.broker,
                kind: intent.kind,
                order_id: Some("stub-1".into()),
                client_order_id: client_order_id(&intent.symbol, intent.signal_time, intent.kind),
                filled_quantity: self.fill,
            })
        }

        async fn live_position(&self, _key: &RoutingKey) -> Result<LivePosition, ExecutorError> {
            Ok(*self.live.lock().unwrap())
        }
    }

    struct Harness {
        processor: SignalProcessor,
        state: StateStore,
        tradovate: Arc<StubExecutor>,
        coinbase: Arc<StubExecutor>,
    }

    async fn harness() -> Harness {
        let pool = storage::db::connect_ephemeral().await.unwrap();
        let state = StateStore::new(pool);
        let resolver = Arc::new(SymbolResolver::new(Arc::new(FixedFeed), Duration::hours(12)));

        let tradovate = Arc::new(StubExecutor::new(Broker::Tradovate));
        let oanda = Arc::new(StubExecutor::new(Broker::Oanda));
        let coinbase = Arc::new(StubExecutor::new(Broker::Coinbase));

        let mut executors: HashMap<Broker, Arc<dyn OrderExecutor>> = HashMap::new();
        executors.insert(Broker::Tradovate, tradovate.clone());
        executors.insert(Broker::Oanda, oanda.clone());
        executors.insert(Broker::Coinbase, coinbase.clone());

        Harness {
            processor: SignalProcessor::new(resolver, state.clone(), executors),
            state,
            tradovate,
            coinbase,
        }
    }

    fn alert(
        symbol: &str,
        exchange: &str,
        kind: SignalKind,
        trigger: Trigger,
        direction: Direction,
    ) -> Alert {
        let body = serde_json::json!({
            "action": if direction == Direction::Long { "LONG_ENTRY" } else { "SHORT_ENTRY" },
            "indicator": "Trend Validator",
            "signal": {
                "type": match kind { SignalKind::Trend => "TREND", SignalKind::Momentum => "MOMENTUM" },
                "direction": if direction == Direction::Long { "LONG" } else { "SHORT" },
                "trigger": match trigger {
                    Trigger::ColorChangeBlue => "COLOR_CHANGE_BLUE",
                    Trigger::ColorChangeRed => "COLOR_CHANGE_RED",
                    Trigger::DiCross => "DI_CROSS",
                },
            },
            "market_data": {
                "symbol": symbol,
                "exchange": exchange,
                "timeframe": "1h",
                "timestamp": Utc.with_ymd_and_hms(2026, 3, 2, 14, 30, 0).unwrap().to_rfc3339(),
            },
            "price_data": {"open": 1.0, "high": 1.0, "low": 1.0, "close": 1.0, "volume": 0.0},
        });
        serde_json::from_value(body).unwrap()
    }

    fn blue_entry(symbol: &str, exchange: &str) -> Alert {
        alert(
            symbol,
            exchange,
            SignalKind::Trend,
            Trigger::ColorChangeBlue,
            Direction::Long,
        )
    }

    fn red_entry(symbol: &str, exchange: &str) -> Alert {
        alert(
            symbol,
            exchange,
            SignalKind::Trend,
            Trigger::ColorChangeRed,
            Direction::Short,
        )
    }

    fn di_cross(symbol: &str, exchange: &str, direction: Direction) -> Alert {
        alert(symbol, exchange, SignalKind::Momentum, Trigger::DiCross, direction)
    }

    #[tokio::test]
    async fn fresh_symbol_blue_entry_opens_long() {
        let h = harness().await;
        let outcome = h.processor.handle(&blue_entry("ES", "CME")).await.unwrap();

        let Outcome::Executed(report) = outcome else {
            panic!("expected execution");
        };
        assert_eq!(report.broker, Broker::Tradovate);
        assert_eq!(report.receipts.len(), 1);

        let intents = h.tradovate.intents();
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].kind, IntentKind::Open);
        assert_eq!(intents[0].instrument, "ESZ6");

        let rec = h.state.get("ES").await.unwrap();
        assert_eq!(rec.position, PositionSide::Long);
        assert_eq!(rec.trend_color, TrendColor::Blue);
        assert!(!rec.waiting_for_reentry);
    }

    #[tokio::test]
    async fn duplicate_entry_is_no_action_with_zero_broker_calls() {
        let h = harness().await;
        h.processor.handle(&blue_entry("ES", "CME")).await.unwrap();
        assert_eq!(h.tradovate.intents().len(), 1);
        let version_after_first = h.state.get("ES").await.unwrap().version;

        let outcome = h.processor.handle(&blue_entry("ES", "CME")).await.unwrap();
        assert!(matches!(outcome, Outcome::NoAction { .. }));
        assert_eq!(h.tradovate.intents().len(), 1);
        assert_eq!(h.state.get("ES").await.unwrap().version, version_after_first);
    }

    #[tokio::test]
    async fn color_flip_closes_then_opens_in_order() {
        let h = harness().await;
        h.processor.handle(&blue_entry("ES", "CME")).await.unwrap();

        let outcome = h.processor.handle(&red_entry("ES", "CME")).await.unwrap();
        let Outcome::Executed(report) = outcome else {
            panic!("expected execution");
        };
        assert_eq!(report.receipts.len(), 2);

        let intents = h.tradovate.intents();
        assert_eq!(intents.len(), 3); // first open, then close + open
        assert_eq!(intents[1].kind, IntentKind::Close);
        assert_eq!(intents[1].closing_side, PositionSide::Long);
        assert_eq!(intents[2].kind, IntentKind::Open);
        assert_eq!(intents[2].direction, Direction::Short);

        let rec = h.state.get("ES").await.unwrap();
        assert_eq!(rec.position, PositionSide::Short);
        assert_eq!(rec.trend_color, TrendColor::Red);
    }

    #[tokio::test]
    async fn exit_then_reentry_cycle() {
        let h = harness().await;
        h.processor.handle(&blue_entry("ES", "CME")).await.unwrap();

        // Momentum reversal against the long position: exit.
        let outcome = h
            .processor
            .handle(&di_cross("ES", "CME", Direction::Short))
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Executed(_)));

        let rec = h.state.get("ES").await.unwrap();
        assert_eq!(rec.position, PositionSide::Flat);
        assert_eq!(rec.trend_color, TrendColor::Blue);
        assert!(rec.waiting_for_reentry);

        // Momentum resumes with the trend: re-enter long.
        let outcome = h
            .processor
            .handle(&di_cross("ES", "CME", Direction::Long))
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Executed(_)));

        let rec = h.state.get("ES").await.unwrap();
        assert_eq!(rec.position, PositionSide::Long);
        assert_eq!(rec.trend_color, TrendColor::Blue);
        assert!(!rec.waiting_for_reentry);

        let intents = h.tradovate.intents();
        assert_eq!(intents.len(), 3);
        assert_eq!(intents[1].kind, IntentKind::Close);
        assert_eq!(intents[2].kind, IntentKind::Open);
    }

    #[tokio::test]
    async fn stale_reentry_is_no_action() {
        let h = harness().await;
        // No position, no waiting flag: a momentum signal means nothing.
        let outcome = h
            .processor
            .handle(&di_cross("ES", "CME", Direction::Long))
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::NoAction { .. }));
        assert!(h.tradovate.intents().is_empty());
    }

    #[tokio::test]
    async fn reentry_against_trend_color_is_no_action() {
        let h = harness().await;
        h.processor.handle(&blue_entry("ES", "CME")).await.unwrap();
        h.processor
            .handle(&di_cross("ES", "CME", Direction::Short))
            .await
            .unwrap();
        // Waiting with BLUE trend; a SHORT momentum signal is not a valid
        // re-entry (and there is no position left to exit).
        let outcome = h
            .processor
            .handle(&di_cross("ES", "CME", Direction::Short))
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::NoAction { .. }));
        assert_eq!(h.tradovate.intents().len(), 2);
    }

    #[tokio::test]
    async fn failed_close_leaves_state_and_skips_open() {
        let h = harness().await;
        h.processor.handle(&blue_entry("ES", "CME")).await.unwrap();
        let before = h.state.get("ES").await.unwrap();

        h.tradovate.fail_next(
            OrderError::new(Broker::Tradovate, OrderStage::Close, "liquidation failed").into(),
        );
        let err = h.processor.handle(&red_entry("ES", "CME")).await.unwrap_err();
        assert!(matches!(
            err,
            ProcessError::Order(OrderError {
                stage: OrderStage::Close,
                ..
            })
        ));

        // Still long, still blue; the open leg never ran.
        let after = h.state.get("ES").await.unwrap();
        assert_eq!(after.position, before.position);
        assert_eq!(after.trend_color, before.trend_color);
        assert_eq!(after.version, before.version);
        assert_eq!(h.tradovate.intents().len(), 1);
    }

    #[tokio::test]
    async fn timeout_marks_symbol_suspect() {
        let h = harness().await;
        h.tradovate.fail_next(
            OrderError::new(Broker::Tradovate, OrderStage::Timeout, "request timed out").into(),
        );

        let err = h.processor.handle(&blue_entry("ES", "CME")).await.unwrap_err();
        assert!(matches!(
            err,
            ProcessError::Order(OrderError {
                stage: OrderStage::Timeout,
                ..
            })
        ));

        let rec = h.state.get("ES").await.unwrap();
        assert!(rec.suspect);
    }

    #[tokio::test]
    async fn suspect_symbol_reconciles_from_venue_before_trading() {
        let h = harness().await;
        // Land in a suspect state via a timed-out entry.
        h.tradovate.fail_next(
            OrderError::new(Broker::Tradovate, OrderStage::Timeout, "request timed out").into(),
        );
        let _ = h.processor.handle(&blue_entry("ES", "CME")).await;
        assert!(h.state.get("ES").await.unwrap().suspect);

        // The venue says the timed-out order actually filled long.
        h.tradovate.set_live(LivePosition {
            side: PositionSide::Long,
            quantity: 1.0,
        });

        // The retried alert reconciles, sees the position already on, and
        // only records the trend color. No second order goes out.
        let outcome = h.processor.handle(&blue_entry("ES", "CME")).await.unwrap();
        let Outcome::Executed(report) = outcome else {
            panic!("expected bookkeeping execution");
        };
        assert!(report.receipts.is_empty());

        let rec = h.state.get("ES").await.unwrap();
        assert!(!rec.suspect);
        assert_eq!(rec.position, PositionSide::Long);
        assert_eq!(rec.trend_color, TrendColor::Blue);
        assert!(h.tradovate.intents().is_empty());
    }

    #[tokio::test]
    async fn spot_entry_records_held_inventory() {
        let h = harness().await;
        let outcome = h
            .processor
            .handle(&blue_entry("BTCUSD", "COINBASE"))
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Executed(_)));

        let rec = h.state.get("BTCUSD").await.unwrap();
        assert_eq!(rec.position, PositionSide::Long);
        assert_eq!(rec.held_quantity, 1.0);

        // Exiting passes the held inventory as the sell bound and zeroes
        // it on confirmation.
        h.processor
            .handle(&di_cross("BTCUSD", "COINBASE", Direction::Short))
            .await
            .unwrap();
        let intents = h.coinbase.intents();
        assert_eq!(intents[1].kind, IntentKind::Close);
        assert_eq!(intents[1].quantity, Some(1.0));

        let rec = h.state.get("BTCUSD").await.unwrap();
        assert_eq!(rec.held_quantity, 0.0);
        assert!(rec.waiting_for_reentry);
    }

    #[tokio::test]
    async fn unresolved_symbol_never_reaches_a_broker() {
        let h = harness().await;
        let err = h
            .processor
            .handle(&blue_entry("ZW", "CBOT"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Resolve(_)));
        assert!(h.tradovate.intents().is_empty());
    }

    #[tokio::test]
    async fn inconsistent_alert_is_rejected_before_routing() {
        let h = harness().await;
        let mut bad = blue_entry("ES", "CME");
        bad.signal.direction = Direction::Short;
        bad.action = common::models::AlertAction::ShortEntry;

        let err = h.processor.handle(&bad).await.unwrap_err();
        assert!(matches!(err, ProcessError::Validation(_)));
        assert!(h.tradovate.intents().is_empty());
    }

    #[tokio::test]
    async fn explicit_reconcile_rewrites_local_state() {
        let h = harness().await;
        h.processor.handle(&blue_entry("ES", "CME")).await.unwrap();
        assert_eq!(
            h.state.get("ES").await.unwrap().position,
            PositionSide::Long
        );

        // Venue reports flat (e.g. manually liquidated out-of-band).
        h.tradovate.set_live(LivePosition::flat());
        let rec = h.processor.reconcile("ES", "CME").await.unwrap();
        assert_eq!(rec.position, PositionSide::Flat);
        assert!(!rec.suspect);
    }

    #[test]
    fn decide_flip_from_flat_red_state() {
        // A LONG/BLUE alert against {FLAT, RED} opens long with no close
        // leg: nothing is held, so there is nothing to flatten.
        let rec = PositionRecord {
            trend_color: TrendColor::Red,
            ..PositionRecord::empty("ES")
        };
        let plan = decide(&blue_entry_for_decide(), &rec);
        assert_eq!(
            plan,
            Plan::Transition {
                close: None,
                open: Some(Direction::Long),
                next_color: TrendColor::Blue,
                next_waiting: false,
            }
        );
    }

    fn blue_entry_for_decide() -> Alert {
        alert(
            "ES",
            "CME",
            SignalKind::Trend,
            Trigger::ColorChangeBlue,
            Direction::Long,
        )
    }
}
