//! Bounded worker pool for tip payouts.
//!
//! `submit` waits for queue capacity only, never for the payout itself.
//! `shutdown` closes the queue, lets queued jobs run, and returns once every
//! in-flight payout has finished.

use crate::domain::Transaction;
use crate::services::error::{OrchestratorError, OrchestratorResult};
use crate::services::tip_processing::{TipPayoutExecutor, TipPayoutQueue};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TipDispatchError {
    #[error("tip dispatch pool is shut down")]
    Closed,
}

pub struct TipDispatchPool {
    sender: Mutex<Option<mpsc::Sender<Transaction>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TipDispatchPool {
    pub fn start(executor: Arc<TipPayoutExecutor>, workers: usize, queue_capacity: usize) -> Self {
        let workers = workers.max(1);
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        let handle = tokio::spawn(run(receiver, executor, workers));
        info!(workers, queue_capacity, "tip dispatch pool started");
        Self {
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        }
    }

    pub async fn submit(&self, tip: Transaction) -> Result<(), TipDispatchError> {
        let sender = self
            .sender
            .lock()
            .await
            .clone()
            .ok_or(TipDispatchError::Closed)?;
        sender.send(tip).await.map_err(|_| TipDispatchError::Closed)
    }

    /// Idempotent; later calls return immediately.
    pub async fn shutdown(&self) {
        self.sender.lock().await.take();
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "tip dispatch pool ended abnormally");
            }
            info!("tip dispatch pool drained");
        }
    }
}

async fn run(
    mut receiver: mpsc::Receiver<Transaction>,
    executor: Arc<TipPayoutExecutor>,
    workers: usize,
) {
    let slots = Arc::new(Semaphore::new(workers));
    while let Some(tip) = receiver.recv().await {
        let Ok(permit) = Arc::clone(&slots).acquire_owned().await else {
            break;
        };
        let executor = Arc::clone(&executor);
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = executor.execute(&tip).await {
                warn!(tip_transaction_id = %tip.id, error = %e, "tip payout job failed");
            }
        });
    }

    // Every permit back means every spawned payout has finished.
    let all = u32::try_from(workers).unwrap_or(u32::MAX);
    if slots.acquire_many(all).await.is_err() {
        error!("tip dispatch semaphore closed while draining");
    }
}

#[async_trait]
impl TipPayoutQueue for TipDispatchPool {
    async fn enqueue(&self, tip: Transaction) -> OrchestratorResult<()> {
        self.submit(tip)
            .await
            .map_err(|e| OrchestratorError::Internal {
                message: e.to_string(),
            })
    }
}
