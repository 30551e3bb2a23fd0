//! Telemetry: best-effort broadcast of balance/position snapshots and
//! lifecycle events to dashboard subscribers.
//!
//! Sends are fire-and-forget on bounded broadcast channels. With no
//! subscribers (or slow ones) messages are dropped; the engine loop is never
//! blocked and nothing is queued indefinitely.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::{BalanceSnapshot, ExitReason, Position};

const CHANNEL_CAPACITY: usize = 64;

/// Self-consistent copy of the engine state at one point in time.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    pub balance: BalanceSnapshot,
    pub positions: Vec<Position>,
    pub timestamp: DateTime<Utc>,
}

/// Structured engine events for logging and notification collaborators.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum EngineEvent {
    PositionOpened {
        symbol: String,
        entry_price: Decimal,
        amount: Decimal,
        stop_loss: Decimal,
        take_profit: Option<Decimal>,
    },
    StopRaised {
        symbol: String,
        stop_loss: Decimal,
        highest_price: Decimal,
    },
    PositionClosed {
        symbol: String,
        entry_price: Decimal,
        exit_price: Decimal,
        reason: ExitReason,
        return_pct: Decimal,
    },
    BalanceDegraded {
        total: Decimal,
    },
}

/// Publisher side of the telemetry channels.
#[derive(Clone)]
pub struct TelemetryPublisher {
    snapshots: broadcast::Sender<TelemetrySnapshot>,
    events: broadcast::Sender<EngineEvent>,
}

impl TelemetryPublisher {
    pub fn new() -> Self {
        let (snapshots, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (events, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { snapshots, events }
    }

    /// Publish a state snapshot. At-most-once, never blocks.
    pub fn publish_snapshot(&self, balance: BalanceSnapshot, positions: Vec<Position>) {
        let _ = self.snapshots.send(TelemetrySnapshot {
            balance,
            positions,
            timestamp: Utc::now(),
        });
    }

    /// Publish a lifecycle event. At-most-once, never blocks.
    pub fn publish_event(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    pub fn subscribe_snapshots(&self) -> broadcast::Receiver<TelemetrySnapshot> {
        self.snapshots.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

impl Default for TelemetryPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn subscriber_receives_snapshot_copy() {
        let publisher = TelemetryPublisher::new();
        let mut rx = publisher.subscribe_snapshots();

        let position = Position::open(
            "BTC/USDT".to_string(),
            dec!(0.01),
            dec!(30000),
            dec!(0.03),
            None,
        );
        publisher.publish_snapshot(BalanceSnapshot::live(dec!(500)), vec![position]);

        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.balance.total, dec!(500));
        assert_eq!(snapshot.positions.len(), 1);
        assert_eq!(snapshot.positions[0].symbol(), "BTC/USDT");
    }

    #[test]
    fn publish_without_subscribers_is_dropped_silently() {
        let publisher = TelemetryPublisher::new();
        publisher.publish_snapshot(BalanceSnapshot::zero(), vec![]);
        publisher.publish_event(EngineEvent::BalanceDegraded { total: dec!(0) });
    }

    #[tokio::test]
    async fn events_carry_realized_return() {
        let publisher = TelemetryPublisher::new();
        let mut rx = publisher.subscribe_events();

        publisher.publish_event(EngineEvent::PositionClosed {
            symbol: "ETH/USDT".to_string(),
            entry_price: dec!(100),
            exit_price: dec!(106),
            reason: ExitReason::StopLoss,
            return_pct: dec!(0.06),
        });

        match rx.recv().await.unwrap() {
            EngineEvent::PositionClosed { return_pct, reason, .. } => {
                assert_eq!(return_pct, dec!(0.06));
                assert_eq!(reason, ExitReason::StopLoss);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
