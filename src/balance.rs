//! Resilient balance retrieval: live venue fetch with bounded retry, falling
//! back to a durable single-record cache, falling back to zero.
//!
//! The cache file is the only state shared across process restarts. Only this
//! module writes it, and every write replaces the whole file atomically so a
//! concurrent reader never observes a truncated record.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::models::BalanceSnapshot;
use crate::venue::Venue;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// The single persisted record.
#[derive(Debug, Serialize, Deserialize)]
struct CacheRecord {
    total: Decimal,
}

/// Durable last-known-balance cache backed by one JSON file.
pub struct BalanceCache {
    path: PathBuf,
}

impl BalanceCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the last persisted balance.
    ///
    /// A missing file is a plain cache miss; an unreadable or unparseable
    /// file is treated the same way, reported at warn level.
    pub fn load(&self) -> Option<Decimal> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Balance cache unreadable, treating as empty");
                return None;
            }
        };

        match serde_json::from_slice::<CacheRecord>(&bytes) {
            Ok(record) => Some(record.total),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Balance cache corrupt, treating as empty");
                None
            }
        }
    }

    /// Overwrite the record, whole-file and atomic (temp file + rename).
    pub fn store(&self, total: Decimal) -> Result<()> {
        let bytes = serde_json::to_vec(&CacheRecord { total })?;

        let temp_path = self.path.with_extension("tmp");
        {
            use std::io::Write;
            let mut file = std::fs::File::create(&temp_path)
                .with_context(|| format!("Failed to create temp file: {:?}", temp_path))?;
            file.write_all(&bytes)
                .with_context(|| format!("Failed to write temp file: {:?}", temp_path))?;
            file.sync_all()
                .with_context(|| format!("Failed to sync temp file: {:?}", temp_path))?;
        }

        std::fs::rename(&temp_path, &self.path)
            .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, self.path))?;

        Ok(())
    }
}

/// Balance source wrapping the venue with retry and cached fallback.
///
/// `get_balance` never fails: after the bounded retries are exhausted it
/// degrades to the cached value, and to zero when no usable cache exists.
pub struct BalanceSource {
    venue: Arc<dyn Venue>,
    cache: BalanceCache,
    max_attempts: u32,
    retry_delay: Duration,
}

impl BalanceSource {
    pub fn new(venue: Arc<dyn Venue>, cache: BalanceCache) -> Self {
        Self {
            venue,
            cache,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_retry_policy(mut self, max_attempts: u32, retry_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    /// Fetch the current balance, degrading instead of failing.
    ///
    /// The inter-attempt delay is a cancellation point: when shutdown is
    /// signalled mid-backoff, remaining attempts are abandoned and the cached
    /// fallback is served so the current tick can finish cleanly.
    pub async fn get_balance(&self, shutdown: &mut watch::Receiver<bool>) -> BalanceSnapshot {
        for attempt in 1..=self.max_attempts {
            match self.venue.fetch_balance().await {
                Ok(total) => {
                    debug!(total = %total, attempt = attempt, "Balance fetched");
                    if let Err(e) = self.cache.store(total) {
                        warn!(error = %e, "Failed to persist balance cache");
                    }
                    return BalanceSnapshot::live(total);
                }
                Err(e) => {
                    warn!(
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Balance fetch failed"
                    );

                    if attempt < self.max_attempts {
                        tokio::select! {
                            _ = tokio::time::sleep(self.retry_delay) => {}
                            _ = shutdown.changed() => {
                                debug!("Shutdown during balance retry backoff");
                                break;
                            }
                        }
                    }
                }
            }
        }

        match self.cache.load() {
            Some(total) => {
                warn!(total = %total, "Serving last known balance from cache");
                BalanceSnapshot::cached(total)
            }
            None => {
                warn!("No usable balance cache, serving zero balance");
                BalanceSnapshot::zero()
            }
        }
    }
}
