use crate::config::ReconciliationConfig;
use crate::database::repository::TransactionRepository;
use crate::domain::{Transaction, TransactionStatus};
use crate::payments::registry::ProcessorRegistry;
use crate::payments::types::PaymentMedium;
use crate::services::payment_orchestrator::call_with_deadline;
use crate::services::webhook_dispatcher::{WebhookDispatchEvent, WebhookDispatcher};
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Custom error type
// ---------------------------------------------------------------------------

/// Failures that abort a whole sweep for one medium. Per-transaction failures
/// are logged and counted instead.
#[derive(Debug, thiserror::Error)]
pub enum StatusCheckError {
    #[error("database error: {0}")]
    Database(#[from] crate::database::error::DatabaseError),

    #[error("payment medium unavailable: {0}")]
    Processor(#[from] crate::payments::error::PaymentError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusCheckReport {
    pub checked: usize,
    pub changed: usize,
    pub failed: usize,
}

impl StatusCheckReport {
    fn absorb(&mut self, other: &StatusCheckReport) {
        self.checked += other.checked;
        self.changed += other.changed;
        self.failed += other.failed;
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Re-queries providers for transactions stuck in PENDING and reports changes
/// to the webhook dispatcher, which owns the status write.
pub struct TransactionStatusChecker {
    transactions: Arc<dyn TransactionRepository>,
    processors: ProcessorRegistry,
    dispatcher: Arc<dyn WebhookDispatcher>,
    config: ReconciliationConfig,
    query_timeout: Duration,
}

impl TransactionStatusChecker {
    pub fn new(
        transactions: Arc<dyn TransactionRepository>,
        processors: ProcessorRegistry,
        dispatcher: Arc<dyn WebhookDispatcher>,
        config: ReconciliationConfig,
        query_timeout: Duration,
    ) -> Self {
        Self {
            transactions,
            processors,
            dispatcher,
            config,
            query_timeout,
        }
    }

    pub async fn check_pending_transactions(
        &self,
        medium: PaymentMedium,
    ) -> Result<StatusCheckReport, StatusCheckError> {
        let processor = self.processors.get(medium)?;
        let threshold = chrono::Duration::from_std(self.config.pending_threshold)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        let cutoff = Utc::now() - threshold;
        let pending = self
            .transactions
            .find_pending_by_medium(medium, cutoff, self.config.batch_size)
            .await?;

        let mut report = StatusCheckReport::default();
        for tx in pending {
            report.checked += 1;
            let key = tx.status_query_key();
            let queried =
                call_with_deadline(self.query_timeout, processor.query_status(&key)).await;
            let response = match queried {
                Ok(response) => response,
                Err(e) => {
                    // No answer is not evidence of failure; retry next sweep.
                    warn!(
                        transaction_id = %tx.id,
                        medium = %medium,
                        error = %e,
                        "status query failed, skipping"
                    );
                    report.failed += 1;
                    continue;
                }
            };

            let Some(reported) = TransactionStatus::from_provider(response.status) else {
                debug!(transaction_id = %tx.id, "provider status unknown, leaving as is");
                continue;
            };
            if reported == tx.status {
                continue;
            }

            let event = dispatch_event(&tx, reported, response.provider_tx_id, response.provider_data);
            match self.dispatcher.handle_webhook_dispatch(event).await {
                Ok(()) => {
                    info!(
                        transaction_id = %tx.id,
                        medium = %medium,
                        from = %tx.status,
                        to = %reported,
                        "provider status change dispatched"
                    );
                    report.changed += 1;
                }
                Err(e) => {
                    warn!(transaction_id = %tx.id, error = %e, "webhook dispatch failed");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Sweep every registered medium concurrently; one failing medium does not
    /// stop the rest.
    pub async fn check_all_mediums(&self) -> StatusCheckReport {
        let mediums = self.processors.mediums();
        let sweeps = join_all(
            mediums
                .iter()
                .map(|medium| self.check_pending_transactions(*medium)),
        )
        .await;

        let mut total = StatusCheckReport::default();
        for (medium, outcome) in mediums.iter().zip(sweeps) {
            match outcome {
                Ok(report) => total.absorb(&report),
                Err(e) => {
                    warn!(medium = %medium, error = %e, "status sweep failed for medium");
                }
            }
        }
        info!(
            checked = total.checked,
            changed = total.changed,
            failed = total.failed,
            "reconciliation sweep finished"
        );
        total
    }
}

fn dispatch_event(
    tx: &Transaction,
    reported: TransactionStatus,
    provider_tx_id: Option<String>,
    provider_data: Option<serde_json::Value>,
) -> WebhookDispatchEvent {
    WebhookDispatchEvent {
        transaction_id: tx.id,
        status: reported,
        message: Some(format!("reconciled: provider reports {}", reported)),
        provider_tx_id: provider_tx_id.or_else(|| tx.provider_tx_id.clone()),
        provider_data,
        timestamp: Utc::now(),
    }
}
