use crate::database::error::DatabaseError;
use crate::services::wallet_ledger::{WalletError, WalletLedger, WalletResult};
use async_trait::async_trait;
use sqlx::{types::BigDecimal, FromRow, PgPool, Postgres, Transaction as SqlxTransaction};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
struct WalletRow {
    balance: BigDecimal,
    locked_amount: BigDecimal,
}

/// Wallet ledger over the `merchant_wallets` table. Each call locks the
/// merchant row with `SELECT ... FOR UPDATE` for the span of one transaction.
pub struct PgWalletLedger {
    pool: PgPool,
}

impl PgWalletLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lock_row(
        tx: &mut SqlxTransaction<'_, Postgres>,
        merchant_id: Uuid,
    ) -> WalletResult<WalletRow> {
        sqlx::query_as::<_, WalletRow>(
            "SELECT balance, locked_amount FROM merchant_wallets WHERE merchant_id = $1 FOR UPDATE",
        )
        .bind(merchant_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or(WalletError::WalletNotFound { merchant_id })
    }
}

#[async_trait]
impl WalletLedger for PgWalletLedger {
    async fn lock_withdrawal_amount(&self, merchant_id: Uuid, amount: &BigDecimal) -> WalletResult<()> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;
        let row = Self::lock_row(&mut tx, merchant_id).await?;

        let available = &row.balance - &row.locked_amount;
        if *amount > available {
            return Err(WalletError::InsufficientFunds {
                merchant_id,
                requested: amount.clone(),
                available,
            });
        }

        sqlx::query(
            "UPDATE merchant_wallets SET locked_amount = locked_amount + $2, updated_at = NOW() \
             WHERE merchant_id = $1",
        )
        .bind(merchant_id)
        .bind(amount)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        debug!(merchant_id = %merchant_id, amount = %amount, "wallet lock committed");
        Ok(())
    }

    async fn process_transaction_status(
        &self,
        merchant_id: Uuid,
        amount: &BigDecimal,
        settled_amount: &BigDecimal,
        success: bool,
        release: bool,
    ) -> WalletResult<()> {
        if !success && !release {
            return Ok(());
        }
        let debit = if success {
            settled_amount.clone()
        } else {
            BigDecimal::from(0)
        };

        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;
        Self::lock_row(&mut tx, merchant_id).await?;

        sqlx::query(
            "UPDATE merchant_wallets \
             SET locked_amount = GREATEST(locked_amount - $2, 0), \
                 balance = balance - $3, \
                 updated_at = NOW() \
             WHERE merchant_id = $1",
        )
        .bind(merchant_id)
        .bind(amount)
        .bind(&debit)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        debug!(
            merchant_id = %merchant_id,
            amount = %amount,
            debit = %debit,
            success,
            release,
            "wallet reservation resolved"
        );
        Ok(())
    }

    async fn credit_deposit(&self, merchant_id: Uuid, amount: &BigDecimal) -> WalletResult<()> {
        sqlx::query(
            "INSERT INTO merchant_wallets (merchant_id, balance, locked_amount, updated_at) \
             VALUES ($1, $2, 0, NOW()) \
             ON CONFLICT (merchant_id) \
             DO UPDATE SET balance = merchant_wallets.balance + EXCLUDED.balance, updated_at = NOW()",
        )
        .bind(merchant_id)
        .bind(amount)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }
}
