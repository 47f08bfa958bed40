//! Convergence runner
//!
//! TigerStyle: One background task, explicit shutdown, fail-stop on
//! unrecoverable store errors.

use crate::convergence::ConvergenceController;
use bulletin_core::{Error, Result, TimeProvider};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Runs convergence passes on an interval until shut down
///
/// A pass runs immediately on start, then every `interval_ms` or whenever
/// `trigger` is called. An unrecoverable error ends the loop; the error is
/// handed back by `shutdown` or `wait`.
pub struct ConvergenceRunner {
    controller: Arc<ConvergenceController>,
    time: Arc<dyn TimeProvider>,
    interval_ms: u64,
    trigger: Arc<Notify>,
    shutdown: Arc<Notify>,
    shutdown_requested: Arc<AtomicBool>,
    task: RwLock<Option<JoinHandle<Result<()>>>>,
}

impl ConvergenceRunner {
    pub fn new(controller: Arc<ConvergenceController>, time: Arc<dyn TimeProvider>) -> Self {
        let interval_ms = controller.config().interval_ms;
        assert!(interval_ms > 0, "convergence interval must be positive");
        Self {
            controller,
            time,
            interval_ms,
            trigger: Arc::new(Notify::new()),
            shutdown: Arc::new(Notify::new()),
            shutdown_requested: Arc::new(AtomicBool::new(false)),
            task: RwLock::new(None),
        }
    }

    /// Spawn the convergence loop
    pub async fn start(&self) -> Result<()> {
        let mut slot = self.task.write().await;
        if slot.is_some() {
            return Err(Error::internal("convergence runner already started"));
        }

        let controller = self.controller.clone();
        let time = self.time.clone();
        let interval_ms = self.interval_ms;
        let trigger = self.trigger.clone();
        let shutdown = self.shutdown.clone();
        let shutdown_requested = self.shutdown_requested.clone();

        info!(interval_ms, "starting convergence runner");
        let task = tokio::spawn(async move {
            while !shutdown_requested.load(Ordering::SeqCst) {
                match controller.converge_lrps().await {
                    Ok(()) => {}
                    Err(e) if e.is_unrecoverable() => {
                        error!(error = %e, "stopping convergence after unrecoverable error");
                        return Err(e);
                    }
                    Err(e) => warn!(error = %e, "convergence pass failed"),
                }

                tokio::select! {
                    _ = time.sleep_ms(interval_ms) => {}
                    _ = trigger.notified() => {
                        debug!("convergence triggered");
                    }
                    _ = shutdown.notified() => {
                        debug!("convergence runner shutting down");
                        break;
                    }
                }
            }
            Ok(())
        });

        *slot = Some(task);
        Ok(())
    }

    /// Run the next pass without waiting out the interval
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Stop the loop and wait for the current pass to finish
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        self.shutdown.notify_one();
        self.wait().await
    }

    /// Wait for the loop to end on its own
    pub async fn wait(&self) -> Result<()> {
        let Some(task) = self.task.write().await.take() else {
            return Ok(());
        };
        match task.await {
            Ok(result) => result,
            Err(e) => Err(Error::internal(format!("convergence task panicked: {}", e))),
        }
    }
}
