//! Applies provider status changes detected by the reconciliation sweep.

use crate::database::repository::TransactionRepository;
use crate::domain::{Transaction, TransactionStatus, TransactionType};
use crate::services::notification::{MerchantNotification, MerchantNotifier};
use crate::services::wallet_ledger::WalletLedger;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum WebhookDispatchError {
    #[error("Transaction not found: {0}")]
    TransactionNotFound(Uuid),
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Wallet error: {0}")]
    WalletError(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDispatchEvent {
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
    pub message: Option<String>,
    pub provider_tx_id: Option<String>,
    pub provider_data: Option<JsonValue>,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait WebhookDispatcher: Send + Sync {
    async fn handle_webhook_dispatch(
        &self,
        event: WebhookDispatchEvent,
    ) -> Result<(), WebhookDispatchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Applied,
    /// Event status equals the stored one.
    Unchanged,
    /// Transition not allowed from the stored status.
    Ignored,
}

/// Writes the new status, resolves wallet effects and notifies the merchant.
pub struct TransactionWebhookDispatcher {
    transactions: Arc<dyn TransactionRepository>,
    wallet: Arc<dyn WalletLedger>,
    notifier: Option<Arc<MerchantNotifier>>,
}

impl TransactionWebhookDispatcher {
    pub fn new(
        transactions: Arc<dyn TransactionRepository>,
        wallet: Arc<dyn WalletLedger>,
        notifier: Option<Arc<MerchantNotifier>>,
    ) -> Self {
        Self {
            transactions,
            wallet,
            notifier,
        }
    }

    pub async fn apply(
        &self,
        event: WebhookDispatchEvent,
    ) -> Result<DispatchOutcome, WebhookDispatchError> {
        let stored = self
            .transactions
            .find_by_id(event.transaction_id)
            .await
            .map_err(|e| WebhookDispatchError::DatabaseError(e.to_string()))?
            .ok_or(WebhookDispatchError::TransactionNotFound(event.transaction_id))?;

        if stored.status == event.status {
            return Ok(DispatchOutcome::Unchanged);
        }
        if !stored.status.can_transition_to(event.status) {
            warn!(
                transaction_id = %stored.id,
                from = %stored.status,
                to = %event.status,
                "Ignoring disallowed status transition"
            );
            return Ok(DispatchOutcome::Ignored);
        }

        let mut updated = self
            .transactions
            .update_status(stored.id, event.status, event.message.as_deref())
            .await
            .map_err(|e| WebhookDispatchError::DatabaseError(e.to_string()))?;

        if stored.provider_tx_id.is_none() {
            if let Some(provider_tx_id) = event.provider_tx_id.as_deref() {
                self.transactions
                    .set_provider_tx_id(stored.id, provider_tx_id)
                    .await
                    .map_err(|e| WebhookDispatchError::DatabaseError(e.to_string()))?;
                updated.provider_tx_id = Some(provider_tx_id.to_string());
            }
        }
        if let Some(data) = event.provider_data.clone() {
            self.transactions
                .merge_metadata(
                    stored.id,
                    json!({ "provider_data": data, "provider_reported_at": event.timestamp }),
                )
                .await
                .map_err(|e| WebhookDispatchError::DatabaseError(e.to_string()))?;
        }

        info!(
            transaction_id = %stored.id,
            from = %stored.status,
            to = %event.status,
            "Transaction status updated from provider"
        );

        let wallet_result = self.settle_wallet(&updated).await;
        self.notify_merchant(&updated, stored.status, event.message).await;
        wallet_result?;

        Ok(DispatchOutcome::Applied)
    }

    async fn settle_wallet(&self, transaction: &Transaction) -> Result<(), WebhookDispatchError> {
        // Tip payouts are funded by the parent deposit, not the merchant wallet.
        if transaction.is_tip_payout() {
            return Ok(());
        }
        let merchant = transaction.merchant_id;
        let amount = &transaction.merchant_net;
        let result = match (transaction.r#type, transaction.status) {
            (TransactionType::Withdrawal, TransactionStatus::Success) => {
                self.wallet
                    .process_transaction_status(merchant, amount, amount, true, false)
                    .await
            }
            (
                TransactionType::Withdrawal,
                TransactionStatus::Failed | TransactionStatus::Canceled | TransactionStatus::Expired,
            ) => {
                self.wallet
                    .process_transaction_status(merchant, amount, &BigDecimal::from(0), false, true)
                    .await
            }
            (TransactionType::Deposit, TransactionStatus::Success) => {
                self.wallet.credit_deposit(merchant, amount).await
            }
            _ => return Ok(()),
        };
        result.map_err(|e| {
            error!(
                transaction_id = %transaction.id,
                merchant_id = %merchant,
                error = %e,
                "Wallet update after status change failed"
            );
            WebhookDispatchError::WalletError(e.to_string())
        })
    }

    async fn notify_merchant(
        &self,
        transaction: &Transaction,
        previous_status: TransactionStatus,
        message: Option<String>,
    ) {
        let (Some(notifier), Some(url)) = (&self.notifier, transaction.callback_url.as_deref())
        else {
            return;
        };
        let notification = MerchantNotification::status_changed(transaction, previous_status, message);
        if let Err(e) = notifier.notify(url, &notification).await {
            warn!(
                transaction_id = %transaction.id,
                error = %e,
                "Merchant notification failed"
            );
        }
    }
}

#[async_trait]
impl WebhookDispatcher for TransactionWebhookDispatcher {
    async fn handle_webhook_dispatch(
        &self,
        event: WebhookDispatchEvent,
    ) -> Result<(), WebhookDispatchError> {
        self.apply(event).await.map(|_| ())
    }
}
