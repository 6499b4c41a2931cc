//! Reconcile Scheduler
//!
//! Background task running reconciliation passes on a fixed interval.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info};

use super::lifecycle::LifecycleEngine;

/// Handle to a running reconciliation task.
///
/// Dropping the handle stops the task after its current pass.
pub struct ReconcileScheduler {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ReconcileScheduler {
    /// Spawn with the engine's configured interval.
    pub fn start(engine: Arc<LifecycleEngine>) -> Self {
        let period = engine.config().reconcile_interval;
        Self::spawn(engine, period)
    }

    /// Spawn a task reconciling every `period`. The first pass runs
    /// immediately; ticks missed while a pass is running are skipped.
    pub fn spawn(engine: Arc<LifecycleEngine>, period: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let period = period.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(period_secs = period.as_secs_f64(), "Reconcile scheduler started");

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match engine.reconcile_now().await {
                            Ok(report) => debug!(?report, "Scheduled reconciliation done"),
                            Err(e) => error!(error = %e, "Scheduled reconciliation failed"),
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Reconcile scheduler stopped");
        });

        Self { shutdown, handle }
    }

    /// Whether the task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the task and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            error!(error = %e, "Reconcile scheduler task panicked");
        }
    }
}
