pub mod auth;
pub mod executors;
pub mod remote;
pub mod traits;

pub use auth::{TokenManager, TokenSource};
pub use executors::{FlattenExecutor, OrderExecutor, SpotExecutor, client_order_id};
pub use remote::VenueError;
