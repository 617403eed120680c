use crate::database::error::{DatabaseError, DbResult};
use crate::database::repository::HostedPaymentRepository;
use crate::domain::{HostedPayment, HostedPaymentStatus};
use crate::payments::types::PaymentMedium;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{types::BigDecimal, FromRow, PgPool};
use std::str::FromStr;
use uuid::Uuid;

const HOSTED_PAYMENT_COLUMNS: &str = "id, user_id, merchant_id, amount, currency, description, \
     reference, supported_mediums, merchant_pays_fee, accept_tip, callback_url, success_url, \
     failed_url, status, expires_at, transaction_id, selected_medium, selected_phone_number, \
     created_at, updated_at";

#[derive(Debug, Clone, FromRow)]
struct HostedPaymentRow {
    id: Uuid,
    user_id: Uuid,
    merchant_id: Uuid,
    amount: BigDecimal,
    currency: String,
    description: Option<String>,
    reference: String,
    supported_mediums: Vec<String>,
    merchant_pays_fee: bool,
    accept_tip: bool,
    callback_url: Option<String>,
    success_url: Option<String>,
    failed_url: Option<String>,
    status: String,
    expires_at: DateTime<Utc>,
    transaction_id: Option<Uuid>,
    selected_medium: Option<String>,
    selected_phone_number: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<HostedPaymentRow> for HostedPayment {
    type Error = DatabaseError;

    fn try_from(row: HostedPaymentRow) -> Result<Self, Self::Error> {
        let supported_mediums = row
            .supported_mediums
            .iter()
            .map(|m| PaymentMedium::from_str(m))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DatabaseError::serialization(e.to_string()))?;
        let selected_medium = row
            .selected_medium
            .as_deref()
            .map(PaymentMedium::from_str)
            .transpose()
            .map_err(|e| DatabaseError::serialization(e.to_string()))?;
        let status = HostedPaymentStatus::from_str(&row.status)
            .map_err(|e| DatabaseError::serialization(e.to_string()))?;

        Ok(HostedPayment {
            id: row.id,
            user_id: row.user_id,
            merchant_id: row.merchant_id,
            amount: row.amount,
            currency: row.currency,
            description: row.description,
            reference: row.reference,
            supported_mediums,
            merchant_pays_fee: row.merchant_pays_fee,
            accept_tip: row.accept_tip,
            callback_url: row.callback_url,
            success_url: row.success_url,
            failed_url: row.failed_url,
            status,
            expires_at: row.expires_at,
            transaction_id: row.transaction_id,
            selected_medium,
            selected_phone_number: row.selected_phone_number,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn medium_names(mediums: &[PaymentMedium]) -> Vec<String> {
    mediums.iter().map(|m| m.as_str().to_string()).collect()
}

pub struct PgHostedPaymentRepository {
    pool: PgPool,
}

impl PgHostedPaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HostedPaymentRepository for PgHostedPaymentRepository {
    async fn insert(&self, hp: &HostedPayment) -> DbResult<HostedPayment> {
        let sql = format!(
            "INSERT INTO hosted_payments ({cols}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20) \
             RETURNING {cols}",
            cols = HOSTED_PAYMENT_COLUMNS
        );
        sqlx::query_as::<_, HostedPaymentRow>(&sql)
            .bind(hp.id)
            .bind(hp.user_id)
            .bind(hp.merchant_id)
            .bind(&hp.amount)
            .bind(&hp.currency)
            .bind(&hp.description)
            .bind(&hp.reference)
            .bind(medium_names(&hp.supported_mediums))
            .bind(hp.merchant_pays_fee)
            .bind(hp.accept_tip)
            .bind(&hp.callback_url)
            .bind(&hp.success_url)
            .bind(&hp.failed_url)
            .bind(hp.status.as_str())
            .bind(hp.expires_at)
            .bind(hp.transaction_id)
            .bind(hp.selected_medium.map(|m| m.as_str()))
            .bind(&hp.selected_phone_number)
            .bind(hp.created_at)
            .bind(hp.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .try_into()
    }

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<HostedPayment>> {
        let sql = format!(
            "SELECT {} FROM hosted_payments WHERE id = $1",
            HOSTED_PAYMENT_COLUMNS
        );
        sqlx::query_as::<_, HostedPaymentRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(HostedPayment::try_from)
            .transpose()
    }

    async fn reference_exists(&self, merchant_id: Uuid, reference: &str) -> DbResult<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM hosted_payments WHERE merchant_id = $1 AND reference = $2)",
        )
        .bind(merchant_id)
        .bind(reference)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn update_pending(&self, hp: &HostedPayment) -> DbResult<Option<HostedPayment>> {
        let sql = format!(
            "UPDATE hosted_payments \
             SET amount = $2, currency = $3, description = $4, supported_mediums = $5, \
                 merchant_pays_fee = $6, accept_tip = $7, callback_url = $8, success_url = $9, \
                 failed_url = $10, expires_at = $11, updated_at = NOW() \
             WHERE id = $1 AND status = 'PENDING' \
             RETURNING {}",
            HOSTED_PAYMENT_COLUMNS
        );
        sqlx::query_as::<_, HostedPaymentRow>(&sql)
            .bind(hp.id)
            .bind(&hp.amount)
            .bind(&hp.currency)
            .bind(&hp.description)
            .bind(medium_names(&hp.supported_mediums))
            .bind(hp.merchant_pays_fee)
            .bind(hp.accept_tip)
            .bind(&hp.callback_url)
            .bind(&hp.success_url)
            .bind(&hp.failed_url)
            .bind(hp.expires_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(HostedPayment::try_from)
            .transpose()
    }

    async fn complete(
        &self,
        id: Uuid,
        transaction_id: Uuid,
        medium: PaymentMedium,
        phone_number: Option<&str>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE hosted_payments \
             SET status = 'COMPLETED', transaction_id = $2, selected_medium = $3, \
                 selected_phone_number = $4, updated_at = NOW() \
             WHERE id = $1 AND status = 'PENDING'",
        )
        .bind(id)
        .bind(transaction_id)
        .bind(medium.as_str())
        .bind(phone_number)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() == 1)
    }

    async fn cancel(&self, id: Uuid) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE hosted_payments SET status = 'CANCELED', updated_at = NOW() \
             WHERE id = $1 AND status = 'PENDING'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() == 1)
    }
}
