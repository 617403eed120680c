use crate::services::tip_processing::TipProcessingService;
use crate::workers::status_checker::TransactionStatusChecker;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("reconciliation scheduler is already running")]
    AlreadyStarted,
    #[error("reconciliation scheduler is not running")]
    NotRunning,
}

struct Running {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Runs the status sweep, then pending tips, on a fixed cadence. The first
/// tick fires on start so a restart does not wait a full interval.
pub struct ReconciliationScheduler {
    checker: Arc<TransactionStatusChecker>,
    tips: Option<Arc<TipProcessingService>>,
    interval: Duration,
    running: Mutex<Option<Running>>,
}

impl ReconciliationScheduler {
    pub fn new(
        checker: Arc<TransactionStatusChecker>,
        tips: Option<Arc<TipProcessingService>>,
        interval: Duration,
    ) -> Self {
        Self {
            checker,
            tips,
            interval,
            running: Mutex::new(None),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    pub async fn start(&self) -> Result<(), SchedulerError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(SchedulerError::AlreadyStarted);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(
            Arc::clone(&self.checker),
            self.tips.clone(),
            self.interval,
            shutdown_rx,
        ));
        *running = Some(Running {
            shutdown_tx,
            handle,
        });
        info!(
            interval_secs = self.interval.as_secs(),
            "reconciliation scheduler started"
        );
        Ok(())
    }

    /// Waits for an in-flight sweep to finish before returning.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        let Some(Running {
            shutdown_tx,
            handle,
        }) = self.running.lock().await.take()
        else {
            return Err(SchedulerError::NotRunning);
        };

        let _ = shutdown_tx.send(true);
        if let Err(e) = handle.await {
            error!(error = %e, "reconciliation scheduler task ended abnormally");
        }
        info!("reconciliation scheduler stopped");
        Ok(())
    }
}

async fn run(
    checker: Arc<TransactionStatusChecker>,
    tips: Option<Arc<TipProcessingService>>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if let Err(e) = run_cycle(&checker, tips.as_deref()).await {
                    warn!(error = %e, "reconciliation cycle failed");
                }
            }
        }
    }
}

async fn run_cycle(
    checker: &TransactionStatusChecker,
    tips: Option<&TipProcessingService>,
) -> anyhow::Result<()> {
    checker.check_all_mediums().await;
    if let Some(tips) = tips {
        tips.process_pending_tips().await?;
    }
    Ok(())
}
