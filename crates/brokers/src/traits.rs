use async_trait::async_trait;

use common::models::{Broker, Direction, PositionSide};

use crate::remote::VenueError;

/// Capabilities of a venue that tracks net positions per instrument
/// (futures, forex). These venues reject simultaneous opposite-direction
/// positions, so the executor must flatten before re-entering.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PositionVenue: Send + Sync {
    fn broker(&self) -> Broker;

    /// Signed net position for the instrument; 0 when flat.
    async fn net_position(&self, instrument: &str) -> Result<f64, VenueError>;

    /// Flatten the held side. Returns the venue's order/transaction id when
    /// it reports one.
    async fn close_position(
        &self,
        instrument: &str,
        held: PositionSide,
    ) -> Result<Option<String>, VenueError>;

    /// Market order entering `direction` for `quantity` contracts/lots.
    async fn place_market_order(
        &self,
        instrument: &str,
        direction: Direction,
        quantity: f64,
        client_order_id: &str,
    ) -> Result<Option<String>, VenueError>;
}

/// Capabilities of a spot venue: no position ledger, only balances. Buys
/// spend quote currency; sells are bounded by held base inventory.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpotVenue: Send + Sync {
    fn broker(&self) -> Broker;

    /// Available (unreserved) balance for one currency code.
    async fn available_balance(&self, currency: &str) -> Result<f64, VenueError>;

    /// Current best ask for a product, used to size buys in base units.
    async fn best_ask(&self, product: &str) -> Result<f64, VenueError>;

    async fn market_buy(
        &self,
        product: &str,
        base_size: f64,
        client_order_id: &str,
    ) -> Result<Option<String>, VenueError>;

    async fn market_sell(
        &self,
        product: &str,
        base_size: f64,
        client_order_id: &str,
    ) -> Result<Option<String>, VenueError>;
}
