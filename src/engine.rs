//! Position lifecycle engine: the loop that opens positions, trails their
//! stops, and closes them.
//!
//! The engine task exclusively owns the position store. Observers only ever
//! see cloned snapshots through the telemetry channel, so there is no shared
//! mutable state to race on. Cancellation is honored at the per-tick sleep
//! (and inside the balance retry backoff); a tick that has started mutating
//! always runs to completion.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::balance::BalanceSource;
use crate::config::EngineConfig;
use crate::models::{BalanceSnapshot, Position};
use crate::telemetry::{EngineEvent, TelemetryPublisher};
use crate::venue::Venue;

/// The engine state machine plus its collaborators.
pub struct Engine {
    config: EngineConfig,
    venue: Arc<dyn Venue>,
    balance: BalanceSource,
    telemetry: TelemetryPublisher,

    // Exclusively owned; only `advance` mutates it.
    positions: HashMap<String, Position>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        venue: Arc<dyn Venue>,
        balance: BalanceSource,
        telemetry: TelemetryPublisher,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            venue,
            balance,
            telemetry,
            positions: HashMap::new(),
        })
    }

    /// Main loop. Runs until the shutdown signal flips.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            symbols = ?self.config.symbols,
            interval = ?self.config.tick_interval,
            "Engine loop started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.tick(&mut shutdown).await;

            // A stop signal raised mid-tick (e.g. during the balance retry
            // backoff) has already been consumed as a `changed` notification;
            // the flag must be re-read here or the loop would sit out a full
            // tick interval before noticing.
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.tick_interval) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!(open_positions = self.positions.len(), "Engine loop drained");
    }

    /// One iteration: pick a symbol, fetch inputs, advance the state machine,
    /// publish a snapshot.
    async fn tick(&mut self, shutdown: &mut watch::Receiver<bool>) {
        let symbol = self.pick_symbol();
        debug!(symbol = %symbol, "Engine tick");

        let balance = self.balance.get_balance(shutdown).await;
        if !balance.is_live() {
            self.telemetry.publish_event(EngineEvent::BalanceDegraded {
                total: balance.total,
            });
        }

        let price = match self.venue.fetch_price(&symbol).await {
            Ok(price) if price > Decimal::ZERO => price,
            Ok(price) => {
                // A non-positive quote cannot price a trade; treat it like an
                // unavailable price rather than letting it reach the sizing
                // division.
                warn!(symbol = %symbol, price = %price, "Non-positive price, skipping tick");
                self.publish_snapshot(&balance);
                return;
            }
            Err(e) => {
                // Skip this tick only; the stored position is untouched and
                // the symbol is retried on a later tick.
                warn!(symbol = %symbol, error = %e, "Price unavailable, skipping tick");
                self.publish_snapshot(&balance);
                return;
            }
        };

        self.advance(&symbol, price, &balance);
        self.publish_snapshot(&balance);
    }

    /// Unweighted random choice; every configured symbol is eventually
    /// revisited.
    fn pick_symbol(&self) -> String {
        let idx = rand::random_range(0..self.config.symbols.len());
        self.config.symbols[idx].clone()
    }

    /// Apply the per-tick transition rules for one symbol.
    fn advance(&mut self, symbol: &str, price: Decimal, balance: &BalanceSnapshot) {
        if let Some(position) = self.positions.get_mut(symbol) {
            if position.observe_price(price) {
                info!(
                    symbol = %symbol,
                    stop_loss = %position.stop_loss(),
                    highest_price = %position.highest_price(),
                    "Trailing stop raised"
                );
                self.telemetry.publish_event(EngineEvent::StopRaised {
                    symbol: symbol.to_string(),
                    stop_loss: position.stop_loss(),
                    highest_price: position.highest_price(),
                });
            }

            if let Some(reason) = position.exit_signal(price) {
                let entry_price = position.entry_price();
                let return_pct = position.return_pct(price);

                info!(
                    symbol = %symbol,
                    exit_price = %price,
                    entry_price = %entry_price,
                    reason = %reason,
                    return_pct = %return_pct,
                    "Position closed"
                );
                self.telemetry.publish_event(EngineEvent::PositionClosed {
                    symbol: symbol.to_string(),
                    entry_price,
                    exit_price: price,
                    reason,
                    return_pct,
                });

                self.positions.remove(symbol);
            }

            return;
        }

        // No position on this symbol: open one if funds allow, otherwise the
        // tick is a no-op wait.
        if balance.total < self.config.min_trade_balance {
            debug!(
                total = %balance.total,
                min = %self.config.min_trade_balance,
                "Balance below minimum, waiting"
            );
            return;
        }

        let amount = balance.total * self.config.trade_fraction / price;
        let position = Position::open(
            symbol.to_string(),
            amount,
            price,
            self.config.stop_loss_pct,
            self.config.take_profit_pct,
        );

        info!(
            symbol = %symbol,
            entry_price = %price,
            amount = %amount,
            stop_loss = %position.stop_loss(),
            "Position opened"
        );
        self.telemetry.publish_event(EngineEvent::PositionOpened {
            symbol: symbol.to_string(),
            entry_price: price,
            amount,
            stop_loss: position.stop_loss(),
            take_profit: position.take_profit(),
        });

        self.positions.insert(symbol.to_string(), position);
    }

    fn publish_snapshot(&self, balance: &BalanceSnapshot) {
        let positions: Vec<Position> = self.positions.values().cloned().collect();
        self.telemetry.publish_snapshot(balance.clone(), positions);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::BalanceCache;
    use crate::models::ExitReason;
    use crate::venue::VenueError;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Venue with a fixed balance and a scripted sequence of price results.
    struct ScriptedVenue {
        balance: Result<Decimal, ()>,
        prices: Mutex<VecDeque<Result<Decimal, VenueError>>>,
    }

    impl ScriptedVenue {
        fn new(balance: Decimal, prices: Vec<Result<Decimal, VenueError>>) -> Self {
            Self {
                balance: Ok(balance),
                prices: Mutex::new(prices.into_iter().collect()),
            }
        }

        fn offline_balance(prices: Vec<Result<Decimal, VenueError>>) -> Self {
            Self {
                balance: Err(()),
                prices: Mutex::new(prices.into_iter().collect()),
            }
        }
    }

    #[async_trait]
    impl Venue for ScriptedVenue {
        async fn fetch_balance(&self) -> Result<Decimal, VenueError> {
            self.balance
                .map_err(|_| VenueError::Network("balance endpoint down".to_string()))
        }

        async fn fetch_price(&self, _symbol: &str) -> Result<Decimal, VenueError> {
            self.prices
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(VenueError::Venue("price script exhausted".to_string())))
        }
    }

    fn test_config() -> EngineConfig {
        EngineConfig {
            trade_fraction: dec!(0.02),
            stop_loss_pct: dec!(0.03),
            take_profit_pct: None,
            min_trade_balance: dec!(10),
            tick_interval: Duration::from_millis(1),
            symbols: vec!["BTC/USDT".to_string()],
        }
    }

    fn build_engine(
        dir: &tempfile::TempDir,
        config: EngineConfig,
        venue: ScriptedVenue,
    ) -> (Engine, TelemetryPublisher) {
        let venue: Arc<dyn Venue> = Arc::new(venue);
        let cache = BalanceCache::new(dir.path().join("balance.json"));
        let balance =
            BalanceSource::new(venue.clone(), cache).with_retry_policy(1, Duration::ZERO);
        let telemetry = TelemetryPublisher::new();
        let engine = Engine::new(config, venue, balance, telemetry.clone()).unwrap();
        (engine, telemetry)
    }

    fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[tokio::test]
    async fn no_position_opens_below_min_balance() {
        let dir = tempfile::tempdir().unwrap();
        let venue = ScriptedVenue::new(dec!(5), vec![Ok(dec!(100)), Ok(dec!(100))]);
        let (mut engine, _telemetry) = build_engine(&dir, test_config(), venue);

        let (_tx, mut shutdown) = shutdown_channel();
        engine.tick(&mut shutdown).await;
        engine.tick(&mut shutdown).await;

        assert!(engine.positions.is_empty());
    }

    #[tokio::test]
    async fn opens_trails_and_closes_over_three_ticks() {
        let dir = tempfile::tempdir().unwrap();
        let venue = ScriptedVenue::new(
            dec!(1000),
            vec![Ok(dec!(100)), Ok(dec!(110)), Ok(dec!(106))],
        );
        let (mut engine, telemetry) = build_engine(&dir, test_config(), venue);
        let mut events = telemetry.subscribe_events();
        let (_tx, mut shutdown) = shutdown_channel();

        // Tick 1: open at 100 with 2% of the balance.
        engine.tick(&mut shutdown).await;
        let position = engine.positions.get("BTC/USDT").unwrap();
        assert_eq!(position.entry_price(), dec!(100));
        assert_eq!(position.amount(), dec!(0.2));
        assert_eq!(position.stop_loss(), dec!(97));

        // Tick 2: trail up behind the 110 high.
        engine.tick(&mut shutdown).await;
        let position = engine.positions.get("BTC/USDT").unwrap();
        assert_eq!(position.highest_price(), dec!(110));
        assert_eq!(position.stop_loss(), dec!(106.70));

        // Tick 3: 106 is at or below the stop, so the position closes there.
        engine.tick(&mut shutdown).await;
        assert!(engine.positions.is_empty());

        let mut closed = None;
        while let Ok(event) = events.try_recv() {
            if let EngineEvent::PositionClosed { reason, return_pct, exit_price, .. } = event {
                closed = Some((reason, return_pct, exit_price));
            }
        }
        let (reason, return_pct, exit_price) = closed.expect("close event");
        assert_eq!(reason, ExitReason::StopLoss);
        assert_eq!(exit_price, dec!(106));
        assert_eq!(return_pct, dec!(0.06));
    }

    #[tokio::test]
    async fn price_failure_skips_tick_and_preserves_position() {
        let dir = tempfile::tempdir().unwrap();
        let venue = ScriptedVenue::new(
            dec!(1000),
            vec![
                Ok(dec!(100)),
                Err(VenueError::Network("timeout".to_string())),
                Ok(dec!(120)),
            ],
        );
        let (mut engine, _telemetry) = build_engine(&dir, test_config(), venue);
        let (_tx, mut shutdown) = shutdown_channel();

        engine.tick(&mut shutdown).await;
        engine.tick(&mut shutdown).await; // skipped

        let position = engine.positions.get("BTC/USDT").unwrap();
        assert_eq!(position.highest_price(), dec!(100));
        assert_eq!(position.stop_loss(), dec!(97));

        engine.tick(&mut shutdown).await;
        let position = engine.positions.get("BTC/USDT").unwrap();
        assert_eq!(position.highest_price(), dec!(120));
    }

    #[tokio::test]
    async fn low_balance_never_starves_a_protective_exit() {
        let dir = tempfile::tempdir().unwrap();
        // Balance endpoint down, no cache: every tick sees a zero balance.
        let venue = ScriptedVenue::offline_balance(vec![Ok(dec!(50))]);
        let (mut engine, _telemetry) = build_engine(&dir, test_config(), venue);

        // Pre-existing position from an earlier session of the loop.
        engine.positions.insert(
            "BTC/USDT".to_string(),
            Position::open("BTC/USDT".to_string(), dec!(0.2), dec!(100), dec!(0.03), None),
        );

        let (_tx, mut shutdown) = shutdown_channel();
        engine.tick(&mut shutdown).await;

        // 50 <= stop of 97: closed despite the degraded zero balance.
        assert!(engine.positions.is_empty());
    }

    #[tokio::test]
    async fn every_tick_publishes_a_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let venue = ScriptedVenue::new(dec!(1000), vec![Ok(dec!(100))]);
        let (mut engine, telemetry) = build_engine(&dir, test_config(), venue);
        let mut snapshots = telemetry.subscribe_snapshots();
        let (_tx, mut shutdown) = shutdown_channel();

        engine.tick(&mut shutdown).await;

        let snapshot = snapshots.recv().await.unwrap();
        assert_eq!(snapshot.balance.total, dec!(1000));
        assert!(snapshot.balance.is_live());
        assert_eq!(snapshot.positions.len(), 1);
    }

    #[tokio::test]
    async fn zero_price_is_skipped_like_an_unavailable_price() {
        let dir = tempfile::tempdir().unwrap();
        let venue = ScriptedVenue::new(
            dec!(1000),
            vec![Ok(dec!(0)), Ok(dec!(100)), Ok(dec!(0))],
        );
        let (mut engine, telemetry) = build_engine(&dir, test_config(), venue);
        let mut snapshots = telemetry.subscribe_snapshots();
        let (_tx, mut shutdown) = shutdown_channel();

        // A zero quote must not reach the position-sizing division; the tick
        // is skipped but still publishes.
        engine.tick(&mut shutdown).await;
        assert!(engine.positions.is_empty());
        assert!(snapshots.recv().await.is_ok());

        engine.tick(&mut shutdown).await;
        let position = engine.positions.get("BTC/USDT").unwrap();
        assert_eq!(position.entry_price(), dec!(100));

        // Same with a position open: the store is left untouched.
        engine.tick(&mut shutdown).await;
        let position = engine.positions.get("BTC/USDT").unwrap();
        assert_eq!(position.highest_price(), dec!(100));
        assert_eq!(position.stop_loss(), dec!(97));
    }

    #[tokio::test]
    async fn stop_during_balance_backoff_drains_before_the_tick_sleep() {
        let dir = tempfile::tempdir().unwrap();
        // Balance endpoint down with a long backoff, and a tick interval far
        // beyond what the test will wait: the only fast path out is the
        // shutdown flag being honored right after the tick.
        let venue = ScriptedVenue::offline_balance(vec![]);
        let config = EngineConfig {
            tick_interval: Duration::from_secs(60),
            ..test_config()
        };

        let venue: Arc<dyn Venue> = Arc::new(venue);
        let cache = BalanceCache::new(dir.path().join("balance.json"));
        let balance = BalanceSource::new(venue.clone(), cache)
            .with_retry_policy(3, Duration::from_secs(60));
        let telemetry = TelemetryPublisher::new();
        let engine = Engine::new(config, venue, balance, telemetry).unwrap();

        let (tx, rx) = shutdown_channel();
        let task = tokio::spawn(engine.run(rx));

        // Let the loop enter the retry backoff, then signal stop.
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("engine did not drain promptly")
            .unwrap();
    }

    #[tokio::test]
    async fn take_profit_exit_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let venue = ScriptedVenue::new(dec!(1000), vec![Ok(dec!(100)), Ok(dec!(105))]);
        let config = EngineConfig {
            take_profit_pct: Some(dec!(0.05)),
            ..test_config()
        };
        let (mut engine, telemetry) = build_engine(&dir, config, venue);
        let mut events = telemetry.subscribe_events();
        let (_tx, mut shutdown) = shutdown_channel();

        engine.tick(&mut shutdown).await;
        engine.tick(&mut shutdown).await;

        assert!(engine.positions.is_empty());

        let mut reasons = vec![];
        while let Ok(event) = events.try_recv() {
            if let EngineEvent::PositionClosed { reason, .. } = event {
                reasons.push(reason);
            }
        }
        assert_eq!(reasons, vec![ExitReason::TakeProfit]);
    }
}
