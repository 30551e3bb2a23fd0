//! Engine configuration.

use std::time::Duration;

use anyhow::{ensure, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Configuration for the position lifecycle engine.
///
/// Loaded once at startup and read-only afterwards; the engine never persists
/// configuration changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Fraction of the total balance committed when opening a position
    pub trade_fraction: Decimal,

    /// Trailing stop distance as a fraction of the highest observed price
    pub stop_loss_pct: Decimal,

    /// Take-profit distance from the entry price; `None` disables target exits
    pub take_profit_pct: Option<Decimal>,

    /// Minimum balance required before a new position may be opened
    pub min_trade_balance: Decimal,

    /// Delay between engine ticks
    pub tick_interval: Duration,

    /// Symbols the engine rotates over (venue format, e.g. "BTC/USDT")
    pub symbols: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trade_fraction: dec!(0.02),       // 2% of balance per trade
            stop_loss_pct: dec!(0.03),        // trail 3% below the high
            take_profit_pct: Some(dec!(0.05)), // 5% profit target
            min_trade_balance: dec!(10),      // need at least 10 USDT
            tick_interval: Duration::from_secs(5),
            symbols: vec![
                "BTC/USDT".to_string(),
                "ETH/USDT".to_string(),
                "XRP/USDT".to_string(),
            ],
        }
    }
}

impl EngineConfig {
    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.symbols.is_empty(), "at least one symbol is required");
        ensure!(
            self.trade_fraction > Decimal::ZERO && self.trade_fraction <= Decimal::ONE,
            "trade_fraction must be in (0, 1]"
        );
        ensure!(
            self.stop_loss_pct > Decimal::ZERO && self.stop_loss_pct < Decimal::ONE,
            "stop_loss_pct must be in (0, 1)"
        );
        if let Some(tp) = self.take_profit_pct {
            ensure!(tp > Decimal::ZERO, "take_profit_pct must be positive");
        }
        ensure!(
            self.min_trade_balance >= Decimal::ZERO,
            "min_trade_balance must not be negative"
        );
        ensure!(
            !self.tick_interval.is_zero(),
            "tick_interval must be non-zero"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_empty_symbol_set() {
        let config = EngineConfig {
            symbols: vec![],
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_fractions() {
        let config = EngineConfig {
            trade_fraction: dec!(1.5),
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            stop_loss_pct: dec!(0),
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
