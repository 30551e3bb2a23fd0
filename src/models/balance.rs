//! Balance snapshot handed out by the balance source.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Where a balance figure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalanceOrigin {
    /// Fetched from the venue on this tick.
    Live,
    /// Served from the durable cache (or the zero fallback) after the venue
    /// could not be reached.
    Cached,
}

/// Immutable point-in-time view of the account balance.
///
/// Callers always receive their own copy; there is no shared mutable state
/// behind it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub total: Decimal,
    pub origin: BalanceOrigin,
    pub timestamp: DateTime<Utc>,
}

impl BalanceSnapshot {
    pub fn live(total: Decimal) -> Self {
        Self {
            total,
            origin: BalanceOrigin::Live,
            timestamp: Utc::now(),
        }
    }

    pub fn cached(total: Decimal) -> Self {
        Self {
            total,
            origin: BalanceOrigin::Cached,
            timestamp: Utc::now(),
        }
    }

    /// Fallback when the venue is unreachable and no cache exists.
    pub fn zero() -> Self {
        Self::cached(Decimal::ZERO)
    }

    pub fn is_live(&self) -> bool {
        self.origin == BalanceOrigin::Live
    }
}
