use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use common::errors::{ExecutorError, OrderStage};
use common::models::{
    Broker, Direction, IntentKind, LivePosition, OrderIntent, OrderReceipt, PositionSide,
    RoutingKey,
};

use super::{OrderExecutor, client_order_id, map_venue_error};
use crate::traits::PositionVenue;

/// Executor for venues that net positions per instrument and reject
/// simultaneous opposite-direction exposure. The opening leg never goes
/// out until any opposite position is confirmed closed; a failed close
/// suppresses the open entirely.
pub struct FlattenExecutor<V: PositionVenue> {
    venue: Arc<V>,
    default_quantity: f64,
}

impl<V: PositionVenue> FlattenExecutor<V> {
    pub fn new(venue: Arc<V>, default_quantity: f64) -> Self {
        Self {
            venue,
            default_quantity,
        }
    }

    async fn close_leg(
        &self,
        intent: &OrderIntent,
        held: PositionSide,
    ) -> Result<Option<String>, ExecutorError> {
        self.venue
            .close_position(&intent.instrument, held)
            .await
            .map_err(|e| map_venue_error(self.broker(), OrderStage::Close, e))
    }
}

#[async_trait]
impl<V: PositionVenue> OrderExecutor for FlattenExecutor<V> {
    fn broker(&self) -> Broker {
        self.venue.broker()
    }

    async fn execute(&self, intent: &OrderIntent) -> Result<OrderReceipt, ExecutorError> {
        let order_key = client_order_id(&intent.symbol, intent.signal_time, intent.kind);

        match intent.kind {
            IntentKind::Close => {
                let order_id = self.close_leg(intent, intent.closing_side).await?;
                Ok(OrderReceipt {
                    broker: self.broker(),
                    kind: IntentKind::Close,
                    order_id,
                    client_order_id: order_key,
                    filled_quantity: None,
                })
            }
            IntentKind::Open => {
                // The venue is the authority on what is actually held; if
                // an opposite position is still live (missed exit, crashed
                // invocation), flatten it first and require confirmation.
                let net = self
                    .venue
                    .net_position(&intent.instrument)
                    .await
                    .map_err(|e| map_venue_error(self.broker(), OrderStage::Open, e))?;

                let opposite = match intent.direction {
                    Direction::Long if net < 0.0 => Some(PositionSide::Short),
                    Direction::Short if net > 0.0 => Some(PositionSide::Long),
                    _ => None,
                };
                if let Some(held) = opposite {
                    info!(
                        "Opposite {} position live on {}; flattening before entry",
                        intent.instrument,
                        self.broker()
                    );
                    self.close_leg(intent, held).await?;
                } else {
                    debug!("No opposite position on {} for {}", self.broker(), intent.instrument);
                }

                let quantity = intent.quantity.unwrap_or(self.default_quantity);
                let order_id = self
                    .venue
                    .place_market_order(&intent.instrument, intent.direction, quantity, &order_key)
                    .await
                    .map_err(|e| map_venue_error(self.broker(), OrderStage::Open, e))?;

                Ok(OrderReceipt {
                    broker: self.broker(),
                    kind: IntentKind::Open,
                    order_id,
                    client_order_id: order_key,
                    filled_quantity: Some(quantity),
                })
            }
        }
    }

    async fn live_position(&self, key: &RoutingKey) -> Result<LivePosition, ExecutorError> {
        let net = self
            .venue
            .net_position(&key.instrument)
            .await
            .map_err(|e| map_venue_error(self.broker(), OrderStage::Open, e))?;
        Ok(if net > 0.0 {
            LivePosition {
                side: PositionSide::Long,
                quantity: net,
            }
        } else if net < 0.0 {
            LivePosition {
                side: PositionSide::Short,
                quantity: -net,
            }
        } else {
            LivePosition::flat()
        })
    }
}
