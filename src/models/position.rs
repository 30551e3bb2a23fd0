//! Position model: one open exposure per symbol, protected by a trailing
//! stop-loss and an optional fixed take-profit.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    /// Price crossed the trailing stop-loss.
    StopLoss,
    /// Price reached the take-profit target.
    TakeProfit,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "stop-loss"),
            ExitReason::TakeProfit => write!(f, "take-profit"),
        }
    }
}

/// An open long position on a single symbol.
///
/// `entry_price` is fixed at open; `highest_price` and `stop_loss` only ever
/// move up, so `stop_loss <= highest_price` holds for the whole lifetime.
/// Fields are private so the only mutation path is [`Position::observe_price`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    symbol: String,
    amount: Decimal,
    entry_price: Decimal,
    highest_price: Decimal,
    stop_loss: Decimal,
    stop_loss_pct: Decimal,
    take_profit: Option<Decimal>,
    opened_at: DateTime<Utc>,
}

impl Position {
    /// Open a position at the current price.
    ///
    /// The initial stop sits `stop_loss_pct` below the entry; the target, when
    /// configured, sits `take_profit_pct` above it.
    pub fn open(
        symbol: String,
        amount: Decimal,
        entry_price: Decimal,
        stop_loss_pct: Decimal,
        take_profit_pct: Option<Decimal>,
    ) -> Self {
        let stop_loss = entry_price * (Decimal::ONE - stop_loss_pct);
        let take_profit = take_profit_pct.map(|pct| entry_price * (Decimal::ONE + pct));

        Self {
            symbol,
            amount,
            entry_price,
            highest_price: entry_price,
            stop_loss,
            stop_loss_pct,
            take_profit,
            opened_at: Utc::now(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn entry_price(&self) -> Decimal {
        self.entry_price
    }

    pub fn highest_price(&self) -> Decimal {
        self.highest_price
    }

    pub fn stop_loss(&self) -> Decimal {
        self.stop_loss
    }

    pub fn take_profit(&self) -> Option<Decimal> {
        self.take_profit
    }

    /// Record a newly observed price, trailing the stop behind the high.
    ///
    /// The stop is one-directional: the candidate stop is recomputed from the
    /// running high and applied only when it is above the current stop.
    /// Returns `true` when the stop moved.
    pub fn observe_price(&mut self, price: Decimal) -> bool {
        if price > self.highest_price {
            self.highest_price = price;
        }

        let candidate = self.highest_price * (Decimal::ONE - self.stop_loss_pct);
        if candidate > self.stop_loss {
            self.stop_loss = candidate;
            true
        } else {
            false
        }
    }

    /// Check the exit thresholds against the observed price.
    ///
    /// The stop-loss is checked first: when both thresholds are breached in
    /// the same tick, the protective exit wins.
    pub fn exit_signal(&self, price: Decimal) -> Option<ExitReason> {
        if price <= self.stop_loss {
            return Some(ExitReason::StopLoss);
        }
        if let Some(target) = self.take_profit {
            if price >= target {
                return Some(ExitReason::TakeProfit);
            }
        }
        None
    }

    /// Realized return when exiting at `exit_price`: `(exit - entry) / entry`.
    pub fn return_pct(&self, exit_price: Decimal) -> Decimal {
        (exit_price - self.entry_price) / self.entry_price
    }
}
