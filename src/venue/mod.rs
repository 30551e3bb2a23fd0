//! Venue capability: the narrow interface the engine consumes for balance
//! and price data. Implementations may be real or simulated.

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

mod rest;
mod sim;

pub use rest::RestVenue;
pub use sim::SimVenue;

/// Errors surfaced by a venue during steady-state operation.
///
/// Both variants are transient from the engine's point of view: balance
/// fetches are retried with backoff, price fetches skip the tick.
#[derive(Debug, Error)]
pub enum VenueError {
    #[error("network error reaching venue: {0}")]
    Network(String),

    #[error("venue error: {0}")]
    Venue(String),
}

/// External trading counterparty providing balance and price data.
#[async_trait]
pub trait Venue: Send + Sync {
    /// Total account balance in the quote currency.
    async fn fetch_balance(&self) -> Result<Decimal, VenueError>;

    /// Current price for a symbol.
    async fn fetch_price(&self, symbol: &str) -> Result<Decimal, VenueError>;
}
