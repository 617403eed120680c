//! Storage ports consumed by the services and workers.
//!
//! Every implementation must treat a single row as linearizable: the
//! conditional operations (`mark_tip_processed`, `update_pending`, `complete`,
//! `cancel`) are the serialization points for concurrent callers.

use crate::database::error::DbResult;
use crate::domain::{HostedPayment, Transaction, TransactionStatus};
use crate::payments::types::PaymentMedium;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Fails with a unique violation when `(merchant_id, reference)` is taken.
    async fn insert(&self, transaction: &Transaction) -> DbResult<Transaction>;

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<Transaction>>;

    async fn find_by_reference(
        &self,
        merchant_id: Uuid,
        reference: &str,
    ) -> DbResult<Option<Transaction>>;

    async fn reference_exists(&self, merchant_id: Uuid, reference: &str) -> DbResult<bool>;

    /// Writes every mutable column and bumps `updated_at`.
    async fn update(&self, transaction: &Transaction) -> DbResult<Transaction>;

    async fn update_status(
        &self,
        id: Uuid,
        status: TransactionStatus,
        comment: Option<&str>,
    ) -> DbResult<Transaction>;

    async fn set_provider_tx_id(&self, id: Uuid, provider_tx_id: &str) -> DbResult<()>;

    /// PENDING rows for `medium` created before `created_before`, oldest first.
    async fn find_pending_by_medium(
        &self,
        medium: PaymentMedium,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<Transaction>>;

    /// SUCCESS rows with `has_tip` set and `tip_processed` still false.
    async fn find_unprocessed_tips(&self, limit: i64) -> DbResult<Vec<Transaction>>;

    /// Returns false when the parent was already marked by someone else.
    async fn mark_tip_processed(&self, parent_id: Uuid, tip_transaction_id: Uuid)
        -> DbResult<bool>;

    /// Shallow-merges `patch` into the metadata object.
    async fn merge_metadata(&self, id: Uuid, patch: JsonValue) -> DbResult<()>;
}

#[async_trait]
pub trait HostedPaymentRepository: Send + Sync {
    async fn insert(&self, hosted_payment: &HostedPayment) -> DbResult<HostedPayment>;

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<HostedPayment>>;

    async fn reference_exists(&self, merchant_id: Uuid, reference: &str) -> DbResult<bool>;

    /// Persists the editable fields only while the row is still PENDING.
    async fn update_pending(&self, hosted_payment: &HostedPayment)
        -> DbResult<Option<HostedPayment>>;

    /// PENDING -> COMPLETED with the consuming transaction linked.
    async fn complete(
        &self,
        id: Uuid,
        transaction_id: Uuid,
        medium: PaymentMedium,
        phone_number: Option<&str>,
    ) -> DbResult<bool>;

    /// PENDING -> CANCELED.
    async fn cancel(&self, id: Uuid) -> DbResult<bool>;
}
