use crate::database::error::{DatabaseError, DbResult};
use crate::database::repository::TransactionRepository;
use crate::domain::{ParseEnumError, Transaction, TransactionStatus};
use crate::payments::types::PaymentMedium;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{types::BigDecimal, FromRow, PgPool};
use std::str::FromStr;
use uuid::Uuid;

const TRANSACTION_COLUMNS: &str = "id, user_id, merchant_id, type, medium, source, status, currency, \
     base_amount, fee_amount, vat_amount, admin_net, merchant_net, customer_net, total_amount, \
     merchant_pays_fee, phone_number, description, reference, provider_tx_id, callback_url, \
     success_url, failed_url, has_tip, tip_amount, tipee_phone, tip_medium, tip_transaction_id, \
     tip_processed, comment, metadata, created_at, updated_at";

/// Row shape of the `transactions` table. Enum columns are stored as text.
#[derive(Debug, Clone, FromRow)]
struct TransactionRow {
    id: Uuid,
    user_id: Uuid,
    merchant_id: Uuid,
    r#type: String,
    medium: String,
    source: String,
    status: String,
    currency: String,
    base_amount: BigDecimal,
    fee_amount: BigDecimal,
    vat_amount: BigDecimal,
    admin_net: BigDecimal,
    merchant_net: BigDecimal,
    customer_net: BigDecimal,
    total_amount: BigDecimal,
    merchant_pays_fee: bool,
    phone_number: Option<String>,
    description: Option<String>,
    reference: String,
    provider_tx_id: Option<String>,
    callback_url: Option<String>,
    success_url: Option<String>,
    failed_url: Option<String>,
    has_tip: bool,
    tip_amount: Option<BigDecimal>,
    tipee_phone: Option<String>,
    tip_medium: Option<String>,
    tip_transaction_id: Option<Uuid>,
    tip_processed: bool,
    comment: Option<String>,
    metadata: JsonValue,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = DatabaseError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let medium = PaymentMedium::from_str(&row.medium)
            .map_err(|e| DatabaseError::serialization(e.to_string()))?;
        let tip_medium = row
            .tip_medium
            .as_deref()
            .map(PaymentMedium::from_str)
            .transpose()
            .map_err(|e| DatabaseError::serialization(e.to_string()))?;

        Ok(Transaction {
            id: row.id,
            user_id: row.user_id,
            merchant_id: row.merchant_id,
            r#type: parse_column(&row.r#type)?,
            medium,
            source: parse_column(&row.source)?,
            status: parse_column(&row.status)?,
            currency: row.currency,
            base_amount: row.base_amount,
            fee_amount: row.fee_amount,
            vat_amount: row.vat_amount,
            admin_net: row.admin_net,
            merchant_net: row.merchant_net,
            customer_net: row.customer_net,
            total_amount: row.total_amount,
            merchant_pays_fee: row.merchant_pays_fee,
            phone_number: row.phone_number,
            description: row.description,
            reference: row.reference,
            provider_tx_id: row.provider_tx_id,
            callback_url: row.callback_url,
            success_url: row.success_url,
            failed_url: row.failed_url,
            has_tip: row.has_tip,
            tip_amount: row.tip_amount,
            tipee_phone: row.tipee_phone,
            tip_medium,
            tip_transaction_id: row.tip_transaction_id,
            tip_processed: row.tip_processed,
            comment: row.comment,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn parse_column<T>(value: &str) -> DbResult<T>
where
    T: FromStr<Err = ParseEnumError>,
{
    value
        .parse()
        .map_err(|e: ParseEnumError| DatabaseError::serialization(e.to_string()))
}

/// Postgres-backed transaction store.
pub struct PgTransactionRepository {
    pool: PgPool,
}

impl PgTransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn convert(rows: Vec<TransactionRow>) -> DbResult<Vec<Transaction>> {
        rows.into_iter().map(Transaction::try_from).collect()
    }
}

#[async_trait]
impl TransactionRepository for PgTransactionRepository {
    async fn insert(&self, tx: &Transaction) -> DbResult<Transaction> {
        let sql = format!(
            "INSERT INTO transactions ({cols}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, \
              $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, $31, $32, $33) \
             RETURNING {cols}",
            cols = TRANSACTION_COLUMNS
        );
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(tx.id)
            .bind(tx.user_id)
            .bind(tx.merchant_id)
            .bind(tx.r#type.as_str())
            .bind(tx.medium.as_str())
            .bind(tx.source.as_str())
            .bind(tx.status.as_str())
            .bind(&tx.currency)
            .bind(&tx.base_amount)
            .bind(&tx.fee_amount)
            .bind(&tx.vat_amount)
            .bind(&tx.admin_net)
            .bind(&tx.merchant_net)
            .bind(&tx.customer_net)
            .bind(&tx.total_amount)
            .bind(tx.merchant_pays_fee)
            .bind(&tx.phone_number)
            .bind(&tx.description)
            .bind(&tx.reference)
            .bind(&tx.provider_tx_id)
            .bind(&tx.callback_url)
            .bind(&tx.success_url)
            .bind(&tx.failed_url)
            .bind(tx.has_tip)
            .bind(&tx.tip_amount)
            .bind(&tx.tipee_phone)
            .bind(tx.tip_medium.map(|m| m.as_str()))
            .bind(tx.tip_transaction_id)
            .bind(tx.tip_processed)
            .bind(&tx.comment)
            .bind(&tx.metadata)
            .bind(tx.created_at)
            .bind(tx.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        row.try_into()
    }

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<Transaction>> {
        let sql = format!("SELECT {} FROM transactions WHERE id = $1", TRANSACTION_COLUMNS);
        sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Transaction::try_from)
            .transpose()
    }

    async fn find_by_reference(
        &self,
        merchant_id: Uuid,
        reference: &str,
    ) -> DbResult<Option<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE merchant_id = $1 AND reference = $2",
            TRANSACTION_COLUMNS
        );
        sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(merchant_id)
            .bind(reference)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Transaction::try_from)
            .transpose()
    }

    async fn reference_exists(&self, merchant_id: Uuid, reference: &str) -> DbResult<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM transactions WHERE merchant_id = $1 AND reference = $2)",
        )
        .bind(merchant_id)
        .bind(reference)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn update(&self, tx: &Transaction) -> DbResult<Transaction> {
        let sql = format!(
            "UPDATE transactions \
             SET status = $2, provider_tx_id = $3, comment = $4, tip_transaction_id = $5, \
                 tip_processed = $6, metadata = $7, updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {}",
            TRANSACTION_COLUMNS
        );
        sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(tx.id)
            .bind(tx.status.as_str())
            .bind(&tx.provider_tx_id)
            .bind(&tx.comment)
            .bind(tx.tip_transaction_id)
            .bind(tx.tip_processed)
            .bind(&tx.metadata)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .ok_or_else(|| DatabaseError::not_found("transaction", tx.id))?
            .try_into()
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: TransactionStatus,
        comment: Option<&str>,
    ) -> DbResult<Transaction> {
        let sql = format!(
            "UPDATE transactions \
             SET status = $2, comment = COALESCE($3, comment), updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {}",
            TRANSACTION_COLUMNS
        );
        sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(id)
            .bind(status.as_str())
            .bind(comment)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .ok_or_else(|| DatabaseError::not_found("transaction", id))?
            .try_into()
    }

    async fn set_provider_tx_id(&self, id: Uuid, provider_tx_id: &str) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE transactions SET provider_tx_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(provider_tx_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("transaction", id));
        }
        Ok(())
    }

    async fn find_pending_by_medium(
        &self,
        medium: PaymentMedium,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions \
             WHERE status = 'PENDING' AND medium = $1 AND created_at < $2 \
             ORDER BY created_at ASC \
             LIMIT $3",
            TRANSACTION_COLUMNS
        );
        let rows = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(medium.as_str())
            .bind(created_before)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Self::convert(rows)
    }

    async fn find_unprocessed_tips(&self, limit: i64) -> DbResult<Vec<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions \
             WHERE has_tip = TRUE AND tip_processed = FALSE AND status = 'SUCCESS' \
             ORDER BY created_at ASC \
             LIMIT $1",
            TRANSACTION_COLUMNS
        );
        let rows = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Self::convert(rows)
    }

    async fn mark_tip_processed(&self, parent_id: Uuid, tip_transaction_id: Uuid) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE transactions \
             SET tip_processed = TRUE, tip_transaction_id = $2, updated_at = NOW() \
             WHERE id = $1 AND tip_processed = FALSE",
        )
        .bind(parent_id)
        .bind(tip_transaction_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() == 1)
    }

    async fn merge_metadata(&self, id: Uuid, patch: JsonValue) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE transactions SET metadata = metadata || $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(patch)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("transaction", id));
        }
        Ok(())
    }
}
