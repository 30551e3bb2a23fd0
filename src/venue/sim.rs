//! Simulated venue for dry runs and tests: fixed balance, random-walk prices.

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::Mutex;

use super::{Venue, VenueError};

/// In-process venue stand-in. Prices start in a plausible band per symbol and
/// drift up to 1% per observation.
pub struct SimVenue {
    balance: Decimal,
    prices: Mutex<HashMap<String, Decimal>>,
}

impl SimVenue {
    pub fn new(balance: Decimal) -> Self {
        Self {
            balance,
            prices: Mutex::new(HashMap::new()),
        }
    }

    fn seed_price(symbol: &str) -> Decimal {
        let raw = if symbol.starts_with("BTC") {
            rand::random_range(20_000.0..50_000.0)
        } else {
            rand::random_range(1_000.0..4_000.0)
        };
        Decimal::from_f64(raw).unwrap_or(dec!(1000)).round_dp(2)
    }
}

#[async_trait]
impl Venue for SimVenue {
    async fn fetch_balance(&self) -> Result<Decimal, VenueError> {
        Ok(self.balance)
    }

    async fn fetch_price(&self, symbol: &str) -> Result<Decimal, VenueError> {
        let mut prices = self.prices.lock().await;
        let price = prices
            .entry(symbol.to_string())
            .and_modify(|p| {
                let drift = rand::random_range(-0.01..0.01f64);
                let factor = Decimal::from_f64(1.0 + drift).unwrap_or(Decimal::ONE);
                *p = (*p * factor).round_dp(2);
            })
            .or_insert_with(|| Self::seed_price(symbol));

        Ok(*price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn balance_is_fixed() {
        let venue = SimVenue::new(dec!(1000));
        assert_eq!(venue.fetch_balance().await.unwrap(), dec!(1000));
    }

    #[tokio::test]
    async fn prices_walk_within_one_percent() {
        let venue = SimVenue::new(dec!(1000));
        let first = venue.fetch_price("ETH/USDT").await.unwrap();
        assert!(first >= dec!(1000) && first <= dec!(4000));

        let mut last = first;
        for _ in 0..20 {
            let next = venue.fetch_price("ETH/USDT").await.unwrap();
            let step = ((next - last) / last).abs();
            assert!(step <= dec!(0.011), "step {} exceeds drift bound", step);
            last = next;
        }
    }
}
