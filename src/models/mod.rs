//! Data models for positions and balance snapshots.

mod balance;
mod position;

pub use balance::{BalanceOrigin, BalanceSnapshot};
pub use position::{ExitReason, Position};
