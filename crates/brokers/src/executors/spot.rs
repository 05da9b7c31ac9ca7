use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use common::errors::{ExecutorError, OrderError, OrderStage};
use common::models::{
    Broker, Direction, IntentKind, LivePosition, OrderIntent, OrderReceipt, PositionSide,
    RoutingKey,
};

use super::{OrderExecutor, client_order_id, map_venue_error};
use crate::traits::SpotVenue;

/// Fraction of available quote balance a single buy may spend.
const DEFAULT_RISK_FRACTION: f64 = 0.02;
/// Portion of held inventory a sell may move; the remainder covers fees.
const DEFAULT_FEE_BUFFER: f64 = 0.995;

/// Venue minimum order sizes in base units.
fn minimum_size(base: &str) -> Option<f64> {
    match base {
        "BTC" => Some(0.000_001),
        "ETH" => Some(0.001),
        "XRP" => Some(1.0),
        _ => None,
    }
}

/// Executor for the spot venue. There is no position ledger to flatten:
/// buys may spend any notional the account can fund, sells are hard-capped
/// by held base inventory and never forwarded when they cannot clear the
/// venue minimum.
pub struct SpotExecutor<V: SpotVenue> {
    venue: Arc<V>,
    risk_fraction: f64,
    fee_buffer: f64,
}

impl<V: SpotVenue> SpotExecutor<V> {
    pub fn new(venue: Arc<V>) -> Self {
        Self {
            venue,
            risk_fraction: DEFAULT_RISK_FRACTION,
            fee_buffer: DEFAULT_FEE_BUFFER,
        }
    }

    pub fn with_sizing(mut self, risk_fraction: f64, fee_buffer: f64) -> Self {
        self.risk_fraction = risk_fraction;
        self.fee_buffer = fee_buffer;
        self
    }

    fn split_product<'a>(&self, instrument: &'a str) -> Result<(&'a str, &'a str), ExecutorError> {
        instrument.split_once('-').ok_or_else(|| {
            OrderError::new(
                self.broker(),
                OrderStage::Open,
                format!("not a spot product id: {instrument}"),
            )
            .into()
        })
    }

    fn min_size(&self, base: &str, stage: OrderStage) -> Result<f64, ExecutorError> {
        minimum_size(base).ok_or_else(|| {
            OrderError::new(
                self.broker(),
                stage,
                format!("minimum order size not defined for {base}"),
            )
            .into()
        })
    }

    async fn sized_buy(&self, intent: &OrderIntent, stage: OrderStage) -> Result<f64, ExecutorError> {
        let (base, quote) = self.split_product(&intent.instrument)?;
        let min = self.min_size(base, stage)?;

        let size = match intent.quantity {
            Some(q) => q,
            None => {
                let balance = self
                    .venue
                    .available_balance(quote)
                    .await
                    .map_err(|e| map_venue_error(self.broker(), stage, e))?;
                let ask = self
                    .venue
                    .best_ask(&intent.instrument)
                    .await
                    .map_err(|e| map_venue_error(self.broker(), stage, e))?;
                let max_risk = balance * self.risk_fraction;
                round8(max_risk / ask)
            }
        };

        if size < min {
            return Err(OrderError::new(
                self.broker(),
                OrderStage::InsufficientBalance,
                format!("buy size {size} {base} below venue minimum {min}"),
            )
            .into());
        }
        debug!("Sized {} buy at {} {}", intent.instrument, size, base);
        Ok(size)
    }

    async fn sized_sell(
        &self,
        intent: &OrderIntent,
        stage: OrderStage,
    ) -> Result<f64, ExecutorError> {
        let (base, _) = self.split_product(&intent.instrument)?;
        let min = self.min_size(base, stage)?;

        let held = self
            .venue
            .available_balance(base)
            .await
            .map_err(|e| map_venue_error(self.broker(), stage, e))?;
        let cap = round8(held * self.fee_buffer);
        let requested = intent.quantity.unwrap_or(cap);
        let size = requested.min(cap);

        if requested > cap {
            warn!(
                "Clamping {} sell from {} to held inventory {}",
                intent.instrument, requested, cap
            );
        }
        if size < min {
            return Err(OrderError::new(
                self.broker(),
                OrderStage::InsufficientBalance,
                format!("sell size {size} {base} below venue minimum {min} (held {held})"),
            )
            .into());
        }
        Ok(size)
    }
}

fn round8(v: f64) -> f64 {
    (v * 1e8).round() / 1e8
}

#[async_trait]
impl<V: SpotVenue> OrderExecutor for SpotExecutor<V> {
    fn broker(&self) -> Broker {
        self.venue.broker()
    }

    async fn execute(&self, intent: &OrderIntent) -> Result<OrderReceipt, ExecutorError> {
        let order_key = client_order_id(&intent.symbol, intent.signal_time, intent.kind);
        let stage = match intent.kind {
            IntentKind::Close => OrderStage::Close,
            IntentKind::Open => OrderStage::Open,
        };

        let (side, size) = match intent.direction {
            Direction::Long => (
                "BUY",
                self.sized_buy(intent, stage).await?,
            ),
            Direction::Short => (
                "SELL",
                self.sized_sell(intent, stage).await?,
            ),
        };

        info!(
            "Executing {} {} {} ({:?} leg)",
            side, size, intent.instrument, intent.kind
        );
        let result = match intent.direction {
            Direction::Long => {
                self.venue
                    .market_buy(&intent.instrument, size, &order_key)
                    .await
            }
            Direction::Short => {
                self.venue
                    .market_sell(&intent.instrument, size, &order_key)
                    .await
            }
        };
        let order_id = result.map_err(|e| map_venue_error(self.broker(), stage, e))?;

        Ok(OrderReceipt {
            broker: self.broker(),
            kind: intent.kind,
            order_id,
            client_order_id: order_key,
            filled_quantity: Some(size),
        })
    }

    async fn live_position(&self, key: &RoutingKey) -> Result<LivePosition, ExecutorError> {
        let (base, _) = self.split_product(&key.instrument)?;
        let min = self.min_size(base, OrderStage::Open)?;
        let held = self
            .venue
            .available_balance(base)
            .await
            .map_err(|e| map_venue_error(self.broker(), OrderStage::Open, e))?;

        // Below the venue minimum the inventory is dust, not a position.
        Ok(if held >= min {
            LivePosition {
                side: PositionSide::Long,
                quantity: held,
            }
        } else {
            LivePosition::flat()
        })
    }
}
