//! Follow loop runner: drives a [`SyncEngine`] on its own task until stopped.
//!
//! Handles:
//! - Polling on the configured interval
//! - Stopping between cycles, never in the middle of a dispatch
//! - Exiting on its own when the source or every subscriber is locked out

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::db::SignalLedger;
use crate::errors::SyncResult;
use crate::traits::StrategySource;
use crate::trading::{EngineState, FollowConfig, SessionStats, Subscription, SyncEngine};

/// Final state of a follow session, returned by [`FollowHandle::stop`].
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub strategy_id: String,
    pub final_state: EngineState,
    pub stats: SessionStats,
    /// Applied signal count per subscriber label
    pub applied: BTreeMap<String, usize>,
    /// Subscribers suspended during the session, with the reason
    pub suspended: BTreeMap<String, String>,
}

impl SessionSummary {
    fn from_engine(engine: &SyncEngine) -> Self {
        let mut applied = BTreeMap::new();
        let mut suspended = BTreeMap::new();
        for subscriber in engine.subscribers() {
            applied.insert(subscriber.label.clone(), subscriber.dedup.len());
            if let Some(reason) = subscriber.suspension_reason() {
                suspended.insert(subscriber.label.clone(), reason.to_string());
            }
        }

        Self {
            strategy_id: engine.strategy_id().to_string(),
            final_state: engine.state(),
            stats: engine.stats().clone(),
            applied,
            suspended,
        }
    }
}

/// Control handle for a running follow loop.
///
/// Dropping the handle stops the loop after its current cycle.
pub struct FollowHandle {
    strategy_id: String,
    stop_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<EngineState>,
    task: JoinHandle<SessionSummary>,
}

impl FollowHandle {
    pub fn strategy_id(&self) -> &str {
        &self.strategy_id
    }

    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Receiver that sees every state transition.
    pub fn state_changes(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    /// Whether the loop has exited (stopped or locked out).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Ask the loop to stop and wait for it.
    ///
    /// An in-flight dispatch runs to completion first, so no order is left
    /// half-recorded.
    pub async fn stop(self) -> Result<SessionSummary, JoinError> {
        info!(strategy = %self.strategy_id, "Stopping follow loop");
        let _ = self.stop_tx.send(true);
        self.task.await
    }

    /// Wait for the loop to exit by itself.
    pub async fn wait(self) -> Result<SessionSummary, JoinError> {
        let Self { stop_tx, task, .. } = self;
        let summary = task.await;
        drop(stop_tx);
        summary
    }
}

/// Start following a strategy with a set of subscriber accounts.
///
/// Validation (configuration, capital resolution, ledger seeding) happens
/// before this returns; polling then runs on a spawned task.
pub async fn follow(
    source: Arc<dyn StrategySource>,
    strategy_id: impl Into<String>,
    subscriptions: Vec<Subscription>,
    config: FollowConfig,
    ledger: Option<Arc<SignalLedger>>,
) -> SyncResult<FollowHandle> {
    let engine = SyncEngine::subscribe(source, strategy_id, subscriptions, config, ledger).await?;
    Ok(spawn(engine))
}

/// Run an already-built engine on its own task.
pub fn spawn(engine: SyncEngine) -> FollowHandle {
    let strategy_id = engine.strategy_id().to_string();
    let state_rx = engine.subscribe_state();
    let (stop_tx, stop_rx) = watch::channel(false);

    let task = tokio::spawn(run_loop(engine, stop_rx));

    FollowHandle {
        strategy_id,
        stop_tx,
        state_rx,
        task,
    }
}

async fn run_loop(mut engine: SyncEngine, mut stop_rx: watch::Receiver<bool>) -> SessionSummary {
    let poll_interval = engine.config().poll_interval();

    info!(
        strategy = %engine.strategy_id(),
        subscribers = engine.subscribers().len(),
        poll_interval_ms = poll_interval.as_millis() as u64,
        "Starting follow loop"
    );

    loop {
        if *stop_rx.borrow_and_update() {
            break;
        }

        match engine.run_cycle().await {
            Ok(report) => debug!(strategy = %engine.strategy_id(), records = report.records.len(), "Cycle done"),
            Err(e) if e.is_fatal() => {
                error!(strategy = %engine.strategy_id(), error = %e, "Follow loop locked out");
            }
            Err(e) => warn!(strategy = %engine.strategy_id(), error = %e, "Cycle failed"),
        }

        if engine.state() == EngineState::Stopped {
            break;
        }

        tokio::select! {
            changed = stop_rx.changed() => {
                // Err means the handle was dropped
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }

    engine.stop();
    let summary = SessionSummary::from_engine(&engine);

    info!(
        strategy = %summary.strategy_id,
        cycles = summary.stats.cycles,
        submitted = summary.stats.submitted,
        suspended = summary.suspended.len(),
        "Follow loop stopped"
    );

    summary
}
