//! Lifecycle controller: starts the engine loop exactly once, owns the
//! shutdown signal, and coordinates a graceful drain on stop.
//!
//! The run state lives inside the controller and is only reachable through
//! its handle; there is no ambient process-wide flag. The controller is
//! cheaply cloneable and safe to call from request handlers or signal
//! handlers concurrently with the engine task.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::engine::Engine;

const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(15);

/// Whether the engine task is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Stopped,
    Running,
    Stopping,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Stopped => write!(f, "stopped"),
            RunState::Running => write!(f, "running"),
            RunState::Stopping => write!(f, "stopping"),
        }
    }
}

/// User-visible, non-fatal lifecycle outcomes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,
}

struct Inner {
    state: RunState,
    shutdown_tx: Option<watch::Sender<bool>>,
    engine_task: Option<JoinHandle<()>>,
}

/// Singleton start/stop surface for the engine task.
#[derive(Clone)]
pub struct LifecycleController {
    inner: Arc<Mutex<Inner>>,
    grace_period: Duration,
}

impl LifecycleController {
    pub fn new() -> Self {
        Self::with_grace_period(DEFAULT_GRACE_PERIOD)
    }

    /// Controller with a custom drain grace period.
    pub fn with_grace_period(grace_period: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: RunState::Stopped,
                shutdown_tx: None,
                engine_task: None,
            })),
            grace_period,
        }
    }

    /// Spawn the engine loop. Fails when a loop is already active, so at most
    /// one engine task ever runs per controller.
    pub async fn start(&self, engine: Engine) -> Result<(), LifecycleError> {
        let mut inner = self.inner.lock().await;
        if inner.state != RunState::Stopped {
            return Err(LifecycleError::AlreadyRunning);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        inner.engine_task = Some(tokio::spawn(engine.run(shutdown_rx)));
        inner.shutdown_tx = Some(shutdown_tx);
        inner.state = RunState::Running;

        info!("Engine task started");
        Ok(())
    }

    /// Signal cancellation and wait for the engine to finish its current
    /// tick. Stopping an already-stopped engine is a reported no-op.
    pub async fn stop(&self) -> Result<(), LifecycleError> {
        let (shutdown_tx, engine_task) = {
            let mut inner = self.inner.lock().await;
            if inner.state == RunState::Stopped {
                return Err(LifecycleError::NotRunning);
            }
            inner.state = RunState::Stopping;
            (inner.shutdown_tx.take(), inner.engine_task.take())
        };

        if let Some(tx) = shutdown_tx {
            let _ = tx.send(true);
        }

        if let Some(task) = engine_task {
            match tokio::time::timeout(self.grace_period, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Engine task failed during shutdown"),
                Err(_) => warn!(
                    grace_period = ?self.grace_period,
                    "Engine did not drain within the grace period"
                ),
            }
        }

        self.inner.lock().await.state = RunState::Stopped;
        info!("Engine task stopped");
        Ok(())
    }

    pub async fn status(&self) -> RunState {
        self.inner.lock().await.state
    }
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::new()
    }
}
