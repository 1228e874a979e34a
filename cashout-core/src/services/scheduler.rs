//! Scheduler supervisor - owns the background tasks that keep cash-outs moving
//!
//! Three tasks run while the supervisor is started:
//!
//! 1. The timer loop receives deferred attempts from the retry engine, sleeps
//!    out each delay and executes the retry
//! 2. The retry sweep periodically executes every retry that has fallen due
//! 3. The reconciliation loop periodically polls providers for records that
//!    are still in flight
//!
//! All three watch a shutdown channel. `stop()` cancels timers that are still
//! sleeping and waits for attempts already talking to a provider. The records
//! behind cancelled timers stay scheduled in the store and the next sweep
//! picks them up.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::reconciliation::{ProviderReconciliation, ReconcileOptions, ReconciliationEngine};
use super::retry::{RetryEngine, RetryOutcome, RetrySweepResult, ScheduledRetry};
use crate::domain::result::Result;

/// Intervals for the periodic tasks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub retry_sweep_interval_ms: u64,
    pub reconciliation_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            retry_sweep_interval_ms: 60_000,
            reconciliation_interval_ms: 3_600_000,
        }
    }
}

impl SchedulerConfig {
    fn retry_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.retry_sweep_interval_ms.max(1))
    }

    fn reconciliation_interval(&self) -> Duration {
        Duration::from_millis(self.reconciliation_interval_ms.max(1))
    }
}

struct Running {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

pub struct Supervisor {
    retry_engine: Arc<RetryEngine>,
    reconciliation: Arc<ReconciliationEngine>,
    config: SchedulerConfig,
    reconcile_options: ReconcileOptions,
    running: Mutex<Option<Running>>,
}

impl Supervisor {
    pub fn new(
        retry_engine: Arc<RetryEngine>,
        reconciliation: Arc<ReconciliationEngine>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            retry_engine,
            reconciliation,
            config,
            reconcile_options: ReconcileOptions::default(),
            running: Mutex::new(None),
        }
    }

    /// Options used by the periodic reconciliation run
    pub fn with_reconcile_options(mut self, options: ReconcileOptions) -> Self {
        self.reconcile_options = options;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().unwrap_or_else(|p| p.into_inner()).is_some()
    }

    /// Spawn the background tasks. Must be called inside a tokio runtime.
    ///
    /// Does nothing if already running.
    pub fn start(&self) {
        let mut running = self.running.lock().unwrap_or_else(|p| p.into_inner());
        if running.is_some() {
            debug!("Supervisor already running");
            return;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        self.retry_engine.attach_timer(timer_tx);

        let handles = vec![
            tokio::spawn(timer_loop(
                Arc::clone(&self.retry_engine),
                timer_rx,
                shutdown_rx.clone(),
            )),
            tokio::spawn(retry_sweep_loop(
                Arc::clone(&self.retry_engine),
                self.config.retry_sweep_interval(),
                shutdown_rx.clone(),
            )),
            tokio::spawn(reconciliation_loop(
                Arc::clone(&self.reconciliation),
                self.reconcile_options.clone(),
                self.config.reconciliation_interval(),
                shutdown_rx,
            )),
        ];

        info!(
            retry_sweep_interval_ms = self.config.retry_sweep_interval_ms,
            reconciliation_interval_ms = self.config.reconciliation_interval_ms,
            "Supervisor started"
        );
        *running = Some(Running { shutdown, handles });
    }

    /// Signal shutdown and wait for every task to finish
    pub async fn stop(&self) {
        let running = self.running.lock().unwrap_or_else(|p| p.into_inner()).take();
        let Some(running) = running else {
            return;
        };

        self.retry_engine.detach_timer();
        // Receivers may already be gone if a task panicked
        let _ = running.shutdown.send(true);

        for handle in running.handles {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!(error = %e, "Supervisor task ended abnormally");
                }
            }
        }
        info!("Supervisor stopped");
    }

    /// Run one retry sweep inline
    pub async fn tick_retries(&self) -> Result<RetrySweepResult> {
        self.retry_engine.process_pending_retries().await
    }

    /// Run one reconciliation pass over every provider inline
    pub async fn tick_reconciliation(&self) -> Vec<ProviderReconciliation> {
        self.reconciliation
            .reconcile_all_providers(&self.reconcile_options)
            .await
    }
}

async fn timer_loop(
    engine: Arc<RetryEngine>,
    mut requests: mpsc::UnboundedReceiver<ScheduledRetry>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut timers = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            request = requests.recv() => {
                let Some(ScheduledRetry { cash_out_id, delay }) = request else {
                    break;
                };
                debug!(cash_out_id = %cash_out_id, delay_ms = delay.as_millis() as u64, "Retry timer armed");
                let engine = Arc::clone(&engine);
                let mut stop = shutdown.clone();
                timers.spawn(async move {
                    // Only the wait is cancelled; an attempt already under way runs to the end
                    tokio::select! {
                        biased;
                        _ = stop.changed() => {
                            debug!(cash_out_id = %cash_out_id, "Retry timer cancelled, leaving it to the sweep");
                            return;
                        }
                        _ = sleep(delay) => {}
                    }
                    match engine.execute_retry(cash_out_id).await {
                        Ok(RetryOutcome::Skipped(reason)) => {
                            debug!(cash_out_id = %cash_out_id, reason = ?reason, "Timed retry skipped");
                        }
                        Ok(outcome) => {
                            debug!(cash_out_id = %cash_out_id, outcome = ?outcome, "Timed retry finished");
                        }
                        Err(e) => {
                            error!(cash_out_id = %cash_out_id, error = %e, "Timed retry failed");
                        }
                    }
                });
            }
            Some(joined) = timers.join_next(), if !timers.is_empty() => log_timer_exit(joined),
        }
    }

    if !timers.is_empty() {
        debug!(pending = timers.len(), "Draining retry timers");
    }
    while let Some(joined) = timers.join_next().await {
        log_timer_exit(joined);
    }
}

fn log_timer_exit(joined: std::result::Result<(), JoinError>) {
    if let Err(e) = joined {
        if !e.is_cancelled() {
            warn!(error = %e, "Retry timer task panicked");
        }
    }
}

async fn retry_sweep_loop(engine: Arc<RetryEngine>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                if let Err(e) = engine.process_pending_retries().await {
                    warn!(error = %e, "Retry sweep failed");
                }
            }
        }
    }
}

async fn reconciliation_loop(
    engine: Arc<ReconciliationEngine>,
    options: ReconcileOptions,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                for run in engine.reconcile_all_providers(&options).await {
                    match (&run.result, &run.error) {
                        (Some(result), _) if result.updated > 0 || result.failed > 0 => {
                            info!(
                                provider = %run.provider,
                                total = result.total,
                                updated = result.updated,
                                failed = result.failed,
                                "Reconciliation pass finished"
                            );
                        }
                        (_, Some(e)) => warn!(provider = %run.provider, error = %e, "Reconciliation pass failed"),
                        _ => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_intervals() {
        let config = SchedulerConfig::default();
        assert_eq!(config.retry_sweep_interval(), Duration::from_secs(60));
        assert_eq!(config.reconciliation_interval(), Duration::from_secs(3600));
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let config = SchedulerConfig {
            retry_sweep_interval_ms: 0,
            reconciliation_interval_ms: 0,
        };
        assert_eq!(config.retry_sweep_interval(), Duration::from_millis(1));
        assert_eq!(config.reconciliation_interval(), Duration::from_millis(1));
    }
}
