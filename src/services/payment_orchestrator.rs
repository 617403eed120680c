//! Payment Orchestrator Service
//!
//! Entry points for direct payments, withdrawals and hosted checkout. Every
//! transaction is persisted before its provider is contacted, and every
//! withdrawal holds a [`WalletReservation`] from before persistence until the
//! provider has answered.

use crate::config::{AppConfig, CheckoutConfig};
use crate::database::memory::merge_json;
use crate::database::repository::{HostedPaymentRepository, TransactionRepository};
use crate::domain::{Transaction, TransactionSource, TransactionStatus, TransactionType};
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::registry::ProcessorRegistry;
use crate::payments::types::{
    PaymentMedium, ProcessorCredential, ProcessorRequest, ProcessorResponse, ProviderStatus,
};
use crate::payments::utils::mask_phone;
use crate::services::error::{OrchestratorError, OrchestratorResult};
use crate::services::transaction_creation::{CreateTransactionRequest, TransactionCreationService};
use crate::services::wallet_ledger::{WalletLedger, WalletReservation};
use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

// ============================================================================
// Configuration Types
// ============================================================================

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub checkout: CheckoutConfig,
    /// Upper bound on a provider call when the caller supplies no deadline.
    pub provider_timeout: Duration,
    pub default_currency: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            checkout: CheckoutConfig {
                base_url: "http://localhost:3000/checkout/".to_string(),
                default_ttl_minutes: 30,
            },
            provider_timeout: Duration::from_secs(30),
            default_currency: "ETB".to_string(),
        }
    }
}

impl From<&AppConfig> for OrchestratorConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            checkout: config.checkout.clone(),
            provider_timeout: config.payments.provider_timeout,
            default_currency: config.payments.default_currency.clone(),
        }
    }
}

// ============================================================================
// Request / Response Types
// ============================================================================

/// Caller identity and deadline for one orchestrator call.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub api_key: String,
    pub user_id: Uuid,
    pub merchant_id: Uuid,
    pub deadline: Option<Duration>,
}

impl RequestContext {
    pub fn new(api_key: impl Into<String>, user_id: Uuid, merchant_id: Uuid) -> Self {
        Self {
            api_key: api_key.into(),
            user_id,
            merchant_id,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub(crate) fn credential(&self) -> ProcessorCredential {
        ProcessorCredential::new(self.api_key.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectPaymentRequest {
    pub amount: BigDecimal,
    pub currency: Option<String>,
    pub medium: PaymentMedium,
    pub phone_number: Option<String>,
    pub reference: String,
    pub description: Option<String>,
    #[serde(default)]
    pub merchant_pays_fee: bool,
    pub callback_url: Option<String>,
    pub success_url: Option<String>,
    pub failed_url: Option<String>,
    pub tip_amount: Option<BigDecimal>,
    pub tipee_phone: Option<String>,
    pub tip_medium: Option<PaymentMedium>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalRequest {
    pub amount: BigDecimal,
    pub currency: Option<String>,
    pub medium: PaymentMedium,
    pub phone_number: String,
    pub reference: String,
    pub description: Option<String>,
    #[serde(default)]
    pub merchant_pays_fee: bool,
    pub callback_url: Option<String>,
}

/// Success envelope shared by every entry point.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    pub success: bool,
    pub status: TransactionStatus,
    pub message: String,
    pub reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<String>,
    pub transaction_id: Uuid,
}

impl PaymentResponse {
    pub(crate) fn from_transaction(
        transaction: &Transaction,
        response: &ProcessorResponse,
    ) -> Self {
        Self {
            success: true,
            status: transaction.status,
            message: response
                .message
                .clone()
                .unwrap_or_else(|| "Payment initiated".to_string()),
            reference: transaction.reference.clone(),
            payment_url: response.payment_url.clone(),
            transaction_id: transaction.id,
        }
    }
}

// ============================================================================
// Provider call helpers
// ============================================================================

/// Bound a provider call; an elapsed deadline becomes `PaymentError::Timeout`.
pub(crate) async fn call_with_deadline<T, F>(limit: Duration, call: F) -> PaymentResult<T>
where
    F: Future<Output = PaymentResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(PaymentError::Timeout {
            timeout_secs: limit.as_secs(),
        }),
    }
}

/// A response that reports failure is treated the same as a failed call.
pub(crate) fn accepted(response: ProcessorResponse) -> PaymentResult<ProcessorResponse> {
    let refused = !response.success
        || matches!(
            response.status,
            ProviderStatus::Failed | ProviderStatus::Cancelled
        );
    if refused {
        return Err(PaymentError::PaymentDeclinedError {
            message: response
                .message
                .unwrap_or_else(|| "Payment was declined by the provider".to_string()),
            provider_code: None,
        });
    }
    Ok(response)
}

pub(crate) fn processor_request(transaction: &Transaction, amount: &BigDecimal) -> ProcessorRequest {
    ProcessorRequest {
        transaction_id: transaction.id.to_string(),
        amount: amount.clone(),
        currency: transaction.currency.clone(),
        phone: transaction.phone_number.clone(),
        reference: transaction.reference.clone(),
        description: transaction.description.clone(),
        callback_url: transaction.callback_url.clone(),
        success_url: transaction.success_url.clone(),
        failed_url: transaction.failed_url.clone(),
    }
}

// ============================================================================
// Main Payment Orchestrator
// ============================================================================

pub struct PaymentOrchestrator {
    pub(crate) transactions: Arc<dyn TransactionRepository>,
    pub(crate) hosted_payments: Arc<dyn HostedPaymentRepository>,
    pub(crate) processors: ProcessorRegistry,
    pub(crate) wallet: Arc<dyn WalletLedger>,
    pub(crate) creation: Arc<TransactionCreationService>,
    pub(crate) config: OrchestratorConfig,
}

impl PaymentOrchestrator {
    pub fn new(
        transactions: Arc<dyn TransactionRepository>,
        hosted_payments: Arc<dyn HostedPaymentRepository>,
        processors: ProcessorRegistry,
        wallet: Arc<dyn WalletLedger>,
        creation: Arc<TransactionCreationService>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            transactions,
            hosted_payments,
            processors,
            wallet,
            creation,
            config,
        }
    }

    pub fn processors(&self) -> &ProcessorRegistry {
        &self.processors
    }

    // =========================================================================
    // Direct payment
    // =========================================================================

    pub async fn process_direct_payment(
        &self,
        ctx: &RequestContext,
        request: DirectPaymentRequest,
    ) -> OrchestratorResult<PaymentResponse> {
        self.ensure_reference_available(ctx.merchant_id, &request.reference)
            .await?;
        let processor = self.processors.get(request.medium)?;

        let created = self
            .creation
            .create_transaction(CreateTransactionRequest {
                user_id: ctx.user_id,
                merchant_id: ctx.merchant_id,
                base_amount: request.amount,
                currency: self.currency_or_default(request.currency),
                medium: request.medium,
                r#type: TransactionType::Deposit,
                source: TransactionSource::Direct,
                merchant_pays_fee: request.merchant_pays_fee,
                phone_number: request.phone_number,
                reference: request.reference,
                description: request.description,
                callback_url: request.callback_url,
                success_url: request.success_url,
                failed_url: request.failed_url,
                tip_amount: request.tip_amount,
                tipee_phone: request.tipee_phone,
                tip_medium: request.tip_medium,
            })
            .await?;

        let transaction = self.persist_new(&created.transaction).await?;
        info!(
            transaction_id = %transaction.id,
            merchant_id = %transaction.merchant_id,
            medium = %transaction.medium,
            total_amount = %transaction.total_amount,
            "Direct payment persisted"
        );

        let outcome = call_with_deadline(
            self.deadline(ctx),
            processor.initiate_payment(
                &ctx.credential(),
                processor_request(&transaction, &transaction.customer_net),
            ),
        )
        .await
        .and_then(accepted);

        let response = match outcome {
            Ok(response) => response,
            Err(err) => {
                self.mark_failed(&transaction, &err).await;
                return Err(err.into());
            }
        };

        let transaction = self.record_provider_outcome(transaction, &response).await?;
        self.credit_if_settled(&transaction).await;

        Ok(PaymentResponse::from_transaction(&transaction, &response))
    }

    // =========================================================================
    // Withdrawal
    // =========================================================================

    pub async fn request_withdrawal(
        &self,
        ctx: &RequestContext,
        request: WithdrawalRequest,
    ) -> OrchestratorResult<PaymentResponse> {
        self.ensure_reference_available(ctx.merchant_id, &request.reference)
            .await?;
        if request.phone_number.trim().is_empty() {
            return Err(OrchestratorError::validation(
                "phone number is required for withdrawals",
                Some("phoneNumber"),
            ));
        }
        let processor = self.processors.get(request.medium)?;

        let created = self
            .creation
            .create_transaction(CreateTransactionRequest {
                user_id: ctx.user_id,
                merchant_id: ctx.merchant_id,
                base_amount: request.amount,
                currency: self.currency_or_default(request.currency),
                medium: request.medium,
                r#type: TransactionType::Withdrawal,
                source: TransactionSource::Direct,
                merchant_pays_fee: request.merchant_pays_fee,
                phone_number: Some(request.phone_number),
                reference: request.reference,
                description: request.description,
                callback_url: request.callback_url,
                success_url: None,
                failed_url: None,
                tip_amount: None,
                tipee_phone: None,
                tip_medium: None,
            })
            .await?;
        let pending = created.transaction;

        // Nothing to compensate if the lock itself fails.
        let reservation = WalletReservation::acquire(
            Arc::clone(&self.wallet),
            pending.merchant_id,
            pending.merchant_net.clone(),
        )
        .await?;

        let transaction = match self.transactions.insert(&pending).await {
            Ok(transaction) => transaction,
            Err(e) => {
                error!(
                    transaction_id = %pending.id,
                    error = %e,
                    "Failed to persist withdrawal, releasing reservation"
                );
                if let Err(release_err) = reservation.release().await {
                    error!(transaction_id = %pending.id, error = %release_err, "Wallet release failed");
                }
                return Err(OrchestratorError::from_insert(e, &pending.reference));
            }
        };
        info!(
            transaction_id = %transaction.id,
            merchant_id = %transaction.merchant_id,
            medium = %transaction.medium,
            phone = %mask_phone(transaction.phone_number.as_deref().unwrap_or_default()),
            merchant_net = %transaction.merchant_net,
            "Withdrawal persisted"
        );

        let outcome = call_with_deadline(
            self.deadline(ctx),
            processor.initiate_withdrawal(
                &ctx.credential(),
                processor_request(&transaction, &transaction.customer_net),
            ),
        )
        .await
        .and_then(accepted);

        let response = match outcome {
            Ok(response) => response,
            Err(err) => {
                self.mark_failed(&transaction, &err).await;
                if let Err(release_err) = reservation.release().await {
                    error!(transaction_id = %transaction.id, error = %release_err, "Wallet release failed");
                }
                return Err(err.into());
            }
        };

        // The payout is in flight from here on; the reservation is never released.
        let transaction = match self.record_provider_outcome(transaction, &response).await {
            Ok(transaction) => transaction,
            Err(e) => {
                reservation.hold();
                return Err(e);
            }
        };
        match transaction.status {
            TransactionStatus::Success => {
                if let Err(e) = reservation.settle().await {
                    error!(transaction_id = %transaction.id, error = %e, "Wallet settlement failed");
                }
            }
            // Terminal without a payout (e.g. reversed): nothing will resolve the lock later.
            status if status.is_terminal() => {
                warn!(
                    transaction_id = %transaction.id,
                    status = %status,
                    "Withdrawal ended without a payout, releasing reservation"
                );
                if let Err(e) = reservation.release().await {
                    error!(transaction_id = %transaction.id, error = %e, "Wallet release failed");
                }
            }
            _ => reservation.hold(),
        }

        Ok(PaymentResponse::from_transaction(&transaction, &response))
    }

    // =========================================================================
    // Queries & admin
    // =========================================================================

    /// Merchant-scoped lookup; another merchant's transaction is reported as missing.
    pub async fn get_transaction(
        &self,
        merchant_id: Uuid,
        transaction_id: Uuid,
    ) -> OrchestratorResult<Transaction> {
        self.transactions
            .find_by_id(transaction_id)
            .await?
            .filter(|t| t.merchant_id == merchant_id)
            .ok_or_else(|| OrchestratorError::NotFound {
                entity: "transaction",
                id: transaction_id.to_string(),
            })
    }

    /// Force a status outside the lifecycle rules. Audit-logged; never called
    /// by an automated component.
    pub async fn override_transaction_status(
        &self,
        transaction_id: Uuid,
        status: TransactionStatus,
        reason: &str,
        admin_id: Uuid,
    ) -> OrchestratorResult<Transaction> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(OrchestratorError::validation(
                "a reason is required to override a transaction status",
                Some("reason"),
            ));
        }
        let existing = self
            .transactions
            .find_by_id(transaction_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound {
                entity: "transaction",
                id: transaction_id.to_string(),
            })?;

        let mut trail = existing
            .metadata
            .get("admin_overrides")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        trail.push(json!({
            "admin_id": admin_id,
            "reason": reason,
            "previous_status": existing.status,
            "new_status": status,
            "at": Utc::now(),
        }));

        let mut updated = self
            .transactions
            .update_status(
                transaction_id,
                status,
                Some(&format!("admin override: {}", reason)),
            )
            .await?;
        let patch = json!({ "admin_overrides": trail });
        self.transactions
            .merge_metadata(transaction_id, patch.clone())
            .await?;
        merge_json(&mut updated.metadata, patch);

        warn!(
            transaction_id = %transaction_id,
            admin_id = %admin_id,
            previous_status = %existing.status,
            new_status = %status,
            reason = %reason,
            "AUDIT: transaction status overridden by admin"
        );
        Ok(updated)
    }

    // =========================================================================
    // Shared steps
    // =========================================================================

    /// A reference must be free in both the transaction and checkout spaces.
    pub(crate) async fn ensure_reference_available(
        &self,
        merchant_id: Uuid,
        reference: &str,
    ) -> OrchestratorResult<()> {
        if reference.trim().is_empty() {
            return Err(OrchestratorError::validation(
                "reference is required",
                Some("reference"),
            ));
        }
        let taken = self
            .transactions
            .reference_exists(merchant_id, reference)
            .await?
            || self
                .hosted_payments
                .reference_exists(merchant_id, reference)
                .await?;
        if taken {
            return Err(OrchestratorError::DuplicateReference {
                reference: reference.to_string(),
            });
        }
        Ok(())
    }

    pub(crate) async fn persist_new(&self, transaction: &Transaction) -> OrchestratorResult<Transaction> {
        self.transactions
            .insert(transaction)
            .await
            .map_err(|e| OrchestratorError::from_insert(e, &transaction.reference))
    }

    pub(crate) fn deadline(&self, ctx: &RequestContext) -> Duration {
        ctx.deadline.unwrap_or(self.config.provider_timeout)
    }

    pub(crate) fn currency_or_default(&self, currency: Option<String>) -> String {
        currency
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| self.config.default_currency.clone())
    }

    /// Best-effort FAILED write; the provider error is kept as the comment.
    pub(crate) async fn mark_failed(&self, transaction: &Transaction, err: &PaymentError) {
        warn!(
            transaction_id = %transaction.id,
            medium = %transaction.medium,
            error = %err,
            "Provider call failed"
        );
        if let Err(e) = self
            .transactions
            .update_status(transaction.id, TransactionStatus::Failed, Some(&err.to_string()))
            .await
        {
            error!(transaction_id = %transaction.id, error = %e, "Failed to mark transaction FAILED");
        }
    }

    /// Deposits the provider settles synchronously never reach the webhook
    /// consumer, so they are credited here.
    pub(crate) async fn credit_if_settled(&self, transaction: &Transaction) {
        if transaction.r#type != TransactionType::Deposit
            || transaction.status != TransactionStatus::Success
        {
            return;
        }
        if let Err(e) = self
            .wallet
            .credit_deposit(transaction.merchant_id, &transaction.merchant_net)
            .await
        {
            error!(
                transaction_id = %transaction.id,
                error = %e,
                "Failed to credit merchant wallet for settled deposit"
            );
        }
    }

    /// The provider accepted but its outcome could not be stored. Park the row
    /// as PENDING with the provider reference so the status sweep picks it up.
    async fn keep_reconcilable(&self, transaction: &Transaction, response: &ProcessorResponse) {
        if let Some(processor_ref) = response.processor_ref.as_deref() {
            if let Err(e) = self
                .transactions
                .set_provider_tx_id(transaction.id, processor_ref)
                .await
            {
                warn!(transaction_id = %transaction.id, error = %e, "Failed to store provider reference");
            }
        }
        let parked = self
            .transactions
            .update_status(
                transaction.id,
                TransactionStatus::Pending,
                Some("provider accepted; outcome pending reconciliation"),
            )
            .await;
        if let Err(e) = parked {
            error!(
                transaction_id = %transaction.id,
                provider_status = ?response.status,
                processor_ref = ?response.processor_ref,
                needs_reconciliation = true,
                error = %e,
                "Provider accepted transaction but its status could not be stored"
            );
        } else {
            warn!(
                transaction_id = %transaction.id,
                provider_status = ?response.status,
                "Provider outcome not stored, transaction parked as PENDING"
            );
        }
    }

    /// Persist the provider-reported status, then store its reference. The
    /// reference write is best effort.
    pub(crate) async fn record_provider_outcome(
        &self,
        transaction: Transaction,
        response: &ProcessorResponse,
    ) -> OrchestratorResult<Transaction> {
        let status =
            TransactionStatus::from_provider(response.status).unwrap_or(TransactionStatus::Pending);
        let mut transaction = if status != transaction.status {
            match self
                .transactions
                .update_status(transaction.id, status, None)
                .await
            {
                Ok(updated) => updated,
                Err(e) => {
                    self.keep_reconcilable(&transaction, response).await;
                    return Err(e.into());
                }
            }
        } else {
            transaction
        };

        if let Some(processor_ref) = response.processor_ref.as_deref() {
            match self
                .transactions
                .set_provider_tx_id(transaction.id, processor_ref)
                .await
            {
                Ok(()) => transaction.provider_tx_id = Some(processor_ref.to_string()),
                Err(e) => warn!(
                    transaction_id = %transaction.id,
                    error = %e,
                    "Failed to store provider reference"
                ),
            }
        }

        info!(
            transaction_id = %transaction.id,
            status = %transaction.status,
            provider_tx_id = ?transaction.provider_tx_id,
            "Provider accepted transaction"
        );
        Ok(transaction)
    }
}

// ============================================================================
// Tests
// ============================================================================
