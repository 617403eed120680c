//! Turns a settled deposit's tip into exactly one WITHDRAWAL to the tipee.
//!
//! The child is persisted before the parent is marked processed. The child
//! reference `TIP-<parent id>` is unique per merchant, so a retry after a
//! crash between the two writes adopts the existing child instead of creating
//! a second one.

use crate::database::repository::TransactionRepository;
use crate::domain::{Transaction, TransactionSource, TransactionStatus, TransactionType};
use crate::payments::registry::ProcessorRegistry;
use crate::payments::types::{PaymentMedium, ProcessorCredential};
use crate::payments::utils::mask_phone;
use crate::services::error::{OrchestratorError, OrchestratorResult};
use crate::services::payment_orchestrator::{accepted, call_with_deadline, processor_request};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

pub fn tip_reference(parent_id: Uuid) -> String {
    format!("TIP-{}", parent_id)
}

/// Where persisted tip withdrawals go to be paid out without blocking the
/// caller.
#[async_trait]
pub trait TipPayoutQueue: Send + Sync {
    async fn enqueue(&self, tip: Transaction) -> OrchestratorResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TipOutcome {
    Created(Uuid),
    /// A child from an earlier interrupted attempt was linked instead.
    Adopted(Uuid),
    /// No tip, already processed, or the parent has not settled.
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TipBatchReport {
    pub dispatched: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct TipProcessingService {
    transactions: Arc<dyn TransactionRepository>,
    queue: Arc<dyn TipPayoutQueue>,
    batch_size: i64,
}

impl TipProcessingService {
    pub fn new(
        transactions: Arc<dyn TransactionRepository>,
        queue: Arc<dyn TipPayoutQueue>,
        batch_size: i64,
    ) -> Self {
        Self {
            transactions,
            queue,
            batch_size,
        }
    }

    /// One bad tip never stops the rest of the batch.
    pub async fn process_pending_tips(&self) -> OrchestratorResult<TipBatchReport> {
        let parents = self
            .transactions
            .find_unprocessed_tips(self.batch_size)
            .await?;
        let mut report = TipBatchReport::default();
        for parent in parents {
            match self.process_tip_for_transaction(parent.id).await {
                Ok(TipOutcome::Created(_)) | Ok(TipOutcome::Adopted(_)) => report.dispatched += 1,
                Ok(TipOutcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    warn!(transaction_id = %parent.id, error = %e, "tip processing failed");
                    report.failed += 1;
                }
            }
        }
        if report != TipBatchReport::default() {
            info!(
                dispatched = report.dispatched,
                skipped = report.skipped,
                failed = report.failed,
                "pending tips processed"
            );
        }
        Ok(report)
    }

    pub async fn process_tip_for_transaction(
        &self,
        transaction_id: Uuid,
    ) -> OrchestratorResult<TipOutcome> {
        let parent = self
            .transactions
            .find_by_id(transaction_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound {
                entity: "transaction",
                id: transaction_id.to_string(),
            })?;
        if !parent.has_tip || parent.tip_processed || parent.status != TransactionStatus::Success {
            return Ok(TipOutcome::Skipped);
        }

        let (amount, phone, medium) = match (
            parent.tip_amount.clone(),
            parent.tipee_phone.clone(),
            parent.tip_medium,
        ) {
            (Some(amount), Some(phone), Some(medium)) => (amount, phone, medium),
            _ => {
                return Err(OrchestratorError::validation(
                    "tip amount, tipee phone and tip medium are all required",
                    Some("tipAmount"),
                ))
            }
        };

        let child = build_tip_withdrawal(&parent, amount, phone, medium);
        match self.transactions.insert(&child).await {
            Ok(child) => {
                self.link(&parent, &child).await?;
                info!(
                    transaction_id = %parent.id,
                    tip_transaction_id = %child.id,
                    tipee_phone = %mask_phone(child.phone_number.as_deref().unwrap_or_default()),
                    amount = %child.total_amount,
                    "tip withdrawal created"
                );
                self.dispatch(child.clone()).await;
                Ok(TipOutcome::Created(child.id))
            }
            Err(e) if e.is_unique_violation() => {
                let existing = self
                    .transactions
                    .find_by_reference(parent.merchant_id, &child.reference)
                    .await?
                    .ok_or_else(|| OrchestratorError::Internal {
                        message: format!("tip reference {} reported taken but not found", child.reference),
                    })?;
                self.link(&parent, &existing).await?;
                warn!(
                    transaction_id = %parent.id,
                    tip_transaction_id = %existing.id,
                    "adopted tip withdrawal from an interrupted attempt"
                );
                if existing.status == TransactionStatus::Initiated {
                    self.dispatch(existing.clone()).await;
                }
                Ok(TipOutcome::Adopted(existing.id))
            }
            Err(e) => Err(OrchestratorError::Persistence(e)),
        }
    }

    async fn link(&self, parent: &Transaction, child: &Transaction) -> OrchestratorResult<()> {
        if !self
            .transactions
            .mark_tip_processed(parent.id, child.id)
            .await?
        {
            info!(transaction_id = %parent.id, "tip already marked processed by another worker");
        }
        Ok(())
    }

    async fn dispatch(&self, tip: Transaction) {
        let tip_id = tip.id;
        if let Err(e) = self.queue.enqueue(tip).await {
            error!(tip_transaction_id = %tip_id, error = %e, "failed to queue tip payout");
        }
    }
}

/// Fees were charged on the parent; the child moves the tip amount only.
pub fn build_tip_withdrawal(
    parent: &Transaction,
    amount: BigDecimal,
    tipee_phone: String,
    medium: PaymentMedium,
) -> Transaction {
    let now = Utc::now();
    let zero = BigDecimal::from(0);
    Transaction {
        id: Uuid::new_v4(),
        user_id: parent.user_id,
        merchant_id: parent.merchant_id,
        r#type: TransactionType::Withdrawal,
        medium,
        source: TransactionSource::WithdrawalTip,
        status: TransactionStatus::Initiated,
        currency: parent.currency.clone(),
        base_amount: amount.clone(),
        fee_amount: zero.clone(),
        vat_amount: zero.clone(),
        admin_net: zero,
        merchant_net: amount.clone(),
        customer_net: amount.clone(),
        total_amount: amount,
        merchant_pays_fee: false,
        phone_number: Some(tipee_phone),
        description: Some(format!("Tip for transaction {}", parent.short_id())),
        reference: tip_reference(parent.id),
        provider_tx_id: None,
        callback_url: None,
        success_url: None,
        failed_url: None,
        has_tip: false,
        tip_amount: None,
        tipee_phone: None,
        tip_medium: None,
        tip_transaction_id: None,
        tip_processed: false,
        comment: None,
        metadata: json!({ "parent_transaction_id": parent.id }),
        created_at: now,
        updated_at: now,
    }
}

// ---------------------------------------------------------------------------
// Payout execution
// ---------------------------------------------------------------------------

/// Calls the provider for one tip withdrawal and records the outcome on the
/// tip transaction only.
pub struct TipPayoutExecutor {
    transactions: Arc<dyn TransactionRepository>,
    processors: ProcessorRegistry,
    credential: ProcessorCredential,
    timeout: Duration,
}

impl TipPayoutExecutor {
    /// `credential` is the platform payout key; tips run outside any merchant request.
    pub fn new(
        transactions: Arc<dyn TransactionRepository>,
        processors: ProcessorRegistry,
        credential: ProcessorCredential,
        timeout: Duration,
    ) -> Self {
        Self {
            transactions,
            processors,
            credential,
            timeout,
        }
    }

    pub async fn execute(&self, tip: &Transaction) -> OrchestratorResult<TransactionStatus> {
        let outcome = match self.processors.get(tip.medium) {
            Ok(processor) => call_with_deadline(
                self.timeout,
                processor.initiate_withdrawal(&self.credential, processor_request(tip, &tip.customer_net)),
            )
            .await
            .and_then(accepted),
            Err(e) => Err(e),
        };

        let response = match outcome {
            Ok(response) => response,
            Err(err) => {
                warn!(tip_transaction_id = %tip.id, error = %err, "tip payout failed");
                self.transactions
                    .update_status(tip.id, TransactionStatus::Failed, Some(&err.to_string()))
                    .await?;
                return Err(err.into());
            }
        };

        let status =
            TransactionStatus::from_provider(response.status).unwrap_or(TransactionStatus::Pending);
        self.transactions.update_status(tip.id, status, None).await?;
        if let Some(processor_ref) = response.processor_ref.as_deref() {
            if let Err(e) = self
                .transactions
                .set_provider_tx_id(tip.id, processor_ref)
                .await
            {
                warn!(tip_transaction_id = %tip.id, error = %e, "failed to store tip provider reference");
            }
        }
        info!(tip_transaction_id = %tip.id, status = %status, "tip payout submitted");
        Ok(status)
    }
}
