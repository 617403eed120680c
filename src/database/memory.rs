//! In-process stores used by `SKIP_EXTERNALS=true` and by the test suite.

use crate::database::error::{DatabaseError, DbResult};
use crate::database::repository::{HostedPaymentRepository, TransactionRepository};
use crate::domain::{HostedPayment, HostedPaymentStatus, Transaction, TransactionStatus};
use crate::payments::types::PaymentMedium;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

pub(crate) fn merge_json(target: &mut JsonValue, patch: JsonValue) {
    match (target, patch) {
        (JsonValue::Object(existing), JsonValue::Object(incoming)) => {
            existing.extend(incoming);
        }
        (target, patch) => *target = patch,
    }
}

#[derive(Default)]
pub struct InMemoryTransactionRepository {
    rows: RwLock<HashMap<Uuid, Transaction>>,
}

impl InMemoryTransactionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<Transaction> {
        self.rows.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl TransactionRepository for InMemoryTransactionRepository {
    async fn insert(&self, transaction: &Transaction) -> DbResult<Transaction> {
        let mut rows = self.rows.write().await;
        let taken = rows.values().any(|t| {
            t.merchant_id == transaction.merchant_id && t.reference == transaction.reference
        });
        if taken || rows.contains_key(&transaction.id) {
            return Err(DatabaseError::unique_violation(
                "transactions_merchant_reference_key",
            ));
        }
        rows.insert(transaction.id, transaction.clone());
        Ok(transaction.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<Transaction>> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn find_by_reference(
        &self,
        merchant_id: Uuid,
        reference: &str,
    ) -> DbResult<Option<Transaction>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|t| t.merchant_id == merchant_id && t.reference == reference)
            .cloned())
    }

    async fn reference_exists(&self, merchant_id: Uuid, reference: &str) -> DbResult<bool> {
        Ok(self.find_by_reference(merchant_id, reference).await?.is_some())
    }

    async fn update(&self, transaction: &Transaction) -> DbResult<Transaction> {
        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(&transaction.id)
            .ok_or_else(|| DatabaseError::not_found("transaction", transaction.id))?;
        row.status = transaction.status;
        row.provider_tx_id = transaction.provider_tx_id.clone();
        row.comment = transaction.comment.clone();
        row.tip_transaction_id = transaction.tip_transaction_id;
        row.tip_processed = transaction.tip_processed;
        row.metadata = transaction.metadata.clone();
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: TransactionStatus,
        comment: Option<&str>,
    ) -> DbResult<Transaction> {
        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::not_found("transaction", id))?;
        row.status = status;
        if let Some(comment) = comment {
            row.comment = Some(comment.to_string());
        }
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn set_provider_tx_id(&self, id: Uuid, provider_tx_id: &str) -> DbResult<()> {
        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::not_found("transaction", id))?;
        row.provider_tx_id = Some(provider_tx_id.to_string());
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn find_pending_by_medium(
        &self,
        medium: PaymentMedium,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<Transaction>> {
        let rows = self.rows.read().await;
        let mut pending: Vec<Transaction> = rows
            .values()
            .filter(|t| {
                t.status == TransactionStatus::Pending
                    && t.medium == medium
                    && t.created_at < created_before
            })
            .cloned()
            .collect();
        pending.sort_by_key(|t| t.created_at);
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn find_unprocessed_tips(&self, limit: i64) -> DbResult<Vec<Transaction>> {
        let rows = self.rows.read().await;
        let mut tips: Vec<Transaction> = rows
            .values()
            .filter(|t| t.has_tip && !t.tip_processed && t.status == TransactionStatus::Success)
            .cloned()
            .collect();
        tips.sort_by_key(|t| t.created_at);
        tips.truncate(limit.max(0) as usize);
        Ok(tips)
    }

    async fn mark_tip_processed(&self, parent_id: Uuid, tip_transaction_id: Uuid) -> DbResult<bool> {
        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(&parent_id)
            .ok_or_else(|| DatabaseError::not_found("transaction", parent_id))?;
        if row.tip_processed {
            return Ok(false);
        }
        row.tip_processed = true;
        row.tip_transaction_id = Some(tip_transaction_id);
        row.updated_at = Utc::now();
        Ok(true)
    }

    async fn merge_metadata(&self, id: Uuid, patch: JsonValue) -> DbResult<()> {
        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::not_found("transaction", id))?;
        merge_json(&mut row.metadata, patch);
        row.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryHostedPaymentRepository {
    rows: RwLock<HashMap<Uuid, HostedPayment>>,
}

impl InMemoryHostedPaymentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HostedPaymentRepository for InMemoryHostedPaymentRepository {
    async fn insert(&self, hosted_payment: &HostedPayment) -> DbResult<HostedPayment> {
        let mut rows = self.rows.write().await;
        let taken = rows.values().any(|h| {
            h.merchant_id == hosted_payment.merchant_id && h.reference == hosted_payment.reference
        });
        if taken || rows.contains_key(&hosted_payment.id) {
            return Err(DatabaseError::unique_violation(
                "hosted_payments_merchant_reference_key",
            ));
        }
        rows.insert(hosted_payment.id, hosted_payment.clone());
        Ok(hosted_payment.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<HostedPayment>> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn reference_exists(&self, merchant_id: Uuid, reference: &str) -> DbResult<bool> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .any(|h| h.merchant_id == merchant_id && h.reference == reference))
    }

    async fn update_pending(&self, hosted_payment: &HostedPayment) -> DbResult<Option<HostedPayment>> {
        let mut rows = self.rows.write().await;
        let Some(row) = rows.get_mut(&hosted_payment.id) else {
            return Ok(None);
        };
        if row.status != HostedPaymentStatus::Pending {
            return Ok(None);
        }
        row.amount = hosted_payment.amount.clone();
        row.currency = hosted_payment.currency.clone();
        row.description = hosted_payment.description.clone();
        row.supported_mediums = hosted_payment.supported_mediums.clone();
        row.merchant_pays_fee = hosted_payment.merchant_pays_fee;
        row.accept_tip = hosted_payment.accept_tip;
        row.callback_url = hosted_payment.callback_url.clone();
        row.success_url = hosted_payment.success_url.clone();
        row.failed_url = hosted_payment.failed_url.clone();
        row.expires_at = hosted_payment.expires_at;
        row.updated_at = Utc::now();
        Ok(Some(row.clone()))
    }

    async fn complete(
        &self,
        id: Uuid,
        transaction_id: Uuid,
        medium: PaymentMedium,
        phone_number: Option<&str>,
    ) -> DbResult<bool> {
        let mut rows = self.rows.write().await;
        let Some(row) = rows.get_mut(&id) else {
            return Ok(false);
        };
        if row.status != HostedPaymentStatus::Pending {
            return Ok(false);
        }
        row.status = HostedPaymentStatus::Completed;
        row.transaction_id = Some(transaction_id);
        row.selected_medium = Some(medium);
        row.selected_phone_number = phone_number.map(|p| p.to_string());
        row.updated_at = Utc::now();
        Ok(true)
    }

    async fn cancel(&self, id: Uuid) -> DbResult<bool> {
        let mut rows = self.rows.write().await;
        let Some(row) = rows.get_mut(&id) else {
            return Ok(false);
        };
        if row.status != HostedPaymentStatus::Pending {
            return Ok(false);
        }
        row.status = HostedPaymentStatus::Canceled;
        row.updated_at = Utc::now();
        Ok(true)
    }
}
