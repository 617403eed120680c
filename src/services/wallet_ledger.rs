//! Merchant wallet collaborator and the scoped reservation the orchestrator
//! holds across a withdrawal.

use crate::database::error::DatabaseError;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

pub type WalletResult<T> = Result<T, WalletError>;

#[derive(Debug, Clone, Error)]
pub enum WalletError {
    #[error("insufficient funds for merchant {merchant_id}: requested {requested}, available {available}")]
    InsufficientFunds {
        merchant_id: Uuid,
        requested: BigDecimal,
        available: BigDecimal,
    },

    #[error("wallet not found for merchant {merchant_id}")]
    WalletNotFound { merchant_id: Uuid },

    #[error("wallet ledger failure: {message}")]
    LedgerFailure { message: String },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

#[async_trait]
pub trait WalletLedger: Send + Sync {
    /// Reserve `amount` so it cannot be spent twice.
    async fn lock_withdrawal_amount(&self, merchant_id: Uuid, amount: &BigDecimal)
        -> WalletResult<()>;

    /// Resolve a reservation. `success` debits `settled_amount` and frees the
    /// lock; `release` frees the lock without debiting.
    async fn process_transaction_status(
        &self,
        merchant_id: Uuid,
        amount: &BigDecimal,
        settled_amount: &BigDecimal,
        success: bool,
        release: bool,
    ) -> WalletResult<()>;

    async fn credit_deposit(&self, merchant_id: Uuid, amount: &BigDecimal) -> WalletResult<()>;
}

// =============================================================================
// Reservation guard
// =============================================================================

/// How an unresolved reservation is finished when its guard is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Release,
    Settle,
}

impl Resolution {
    async fn apply(
        self,
        ledger: &dyn WalletLedger,
        merchant_id: Uuid,
        amount: &BigDecimal,
    ) -> WalletResult<()> {
        match self {
            Resolution::Release => {
                ledger
                    .process_transaction_status(merchant_id, amount, &BigDecimal::from(0), false, true)
                    .await
            }
            Resolution::Settle => {
                ledger
                    .process_transaction_status(merchant_id, amount, amount, true, false)
                    .await
            }
        }
    }
}

/// A held wallet lock. Exactly one of `release`, `settle` or `hold` resolves it.
///
/// The guard only counts as resolved once the ledger call has returned. If the
/// owning future is dropped before that (including mid-`release`/`settle`), the
/// pending resolution is replayed on the current runtime; an untouched guard
/// is released.
pub struct WalletReservation {
    ledger: Arc<dyn WalletLedger>,
    merchant_id: Uuid,
    amount: BigDecimal,
    pending: Resolution,
    resolved: bool,
}

impl WalletReservation {
    pub async fn acquire(
        ledger: Arc<dyn WalletLedger>,
        merchant_id: Uuid,
        amount: BigDecimal,
    ) -> WalletResult<Self> {
        ledger.lock_withdrawal_amount(merchant_id, &amount).await?;
        info!(merchant_id = %merchant_id, amount = %amount, "wallet amount reserved");
        Ok(Self {
            ledger,
            merchant_id,
            amount,
            pending: Resolution::Release,
            resolved: false,
        })
    }

    pub fn amount(&self) -> &BigDecimal {
        &self.amount
    }

    /// Compensate: free the lock without debiting.
    pub async fn release(mut self) -> WalletResult<()> {
        warn!(
            merchant_id = %self.merchant_id,
            amount = %self.amount,
            "releasing wallet reservation"
        );
        self.resolve(Resolution::Release).await
    }

    /// Finalize the debit of the reserved amount.
    pub async fn settle(mut self) -> WalletResult<()> {
        info!(
            merchant_id = %self.merchant_id,
            amount = %self.amount,
            "settling wallet reservation"
        );
        self.resolve(Resolution::Settle).await
    }

    /// Leave the amount reserved; the webhook consumer resolves it once the
    /// provider reports a terminal status.
    pub fn hold(mut self) {
        self.resolved = true;
    }

    async fn resolve(&mut self, resolution: Resolution) -> WalletResult<()> {
        self.pending = resolution;
        let result = resolution
            .apply(self.ledger.as_ref(), self.merchant_id, &self.amount)
            .await;
        // Only reached when the call ran to completion.
        self.resolved = true;
        result
    }
}

impl Drop for WalletReservation {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        let ledger = Arc::clone(&self.ledger);
        let merchant_id = self.merchant_id;
        let amount = self.amount.clone();
        let resolution = self.pending;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(
                    merchant_id = %merchant_id,
                    amount = %amount,
                    resolution = ?resolution,
                    "reservation dropped before it was resolved, finishing in background"
                );
                handle.spawn(async move {
                    if let Err(e) = resolution.apply(ledger.as_ref(), merchant_id, &amount).await {
                        error!(
                            merchant_id = %merchant_id,
                            resolution = ?resolution,
                            error = %e,
                            "deferred wallet resolution failed"
                        );
                    }
                });
            }
            Err(_) => {
                error!(merchant_id = %merchant_id, amount = %amount, "reservation dropped outside runtime; lock leaked");
            }
        }
    }
}

// =============================================================================
// In-memory ledger
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WalletBalance {
    pub balance: BigDecimal,
    pub locked: BigDecimal,
}

impl WalletBalance {
    pub fn available(&self) -> BigDecimal {
        &self.balance - &self.locked
    }
}

/// Balances and locks kept in process. Unknown merchants have a zero balance.
#[derive(Default)]
pub struct InMemoryWalletLedger {
    wallets: Mutex<HashMap<Uuid, WalletBalance>>,
}

impl InMemoryWalletLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fund(&self, merchant_id: Uuid, amount: BigDecimal) {
        let mut wallets = self.wallets.lock().await;
        let wallet = wallets.entry(merchant_id).or_default();
        wallet.balance += amount;
    }

    pub async fn balance(&self, merchant_id: Uuid) -> WalletBalance {
        self.wallets
            .lock()
            .await
            .get(&merchant_id)
            .cloned()
            .unwrap_or_default()
    }
}

fn unlock(locked: &BigDecimal, amount: &BigDecimal) -> BigDecimal {
    let remaining = locked - amount;
    if remaining < BigDecimal::from(0) {
        BigDecimal::from(0)
    } else {
        remaining
    }
}

#[async_trait]
impl WalletLedger for InMemoryWalletLedger {
    async fn lock_withdrawal_amount(&self, merchant_id: Uuid, amount: &BigDecimal) -> WalletResult<()> {
        let mut wallets = self.wallets.lock().await;
        let wallet = wallets.entry(merchant_id).or_default();
        let available = wallet.available();
        if *amount > available {
            return Err(WalletError::InsufficientFunds {
                merchant_id,
                requested: amount.clone(),
                available,
            });
        }
        wallet.locked += amount.clone();
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
        let mut wallets = self.wallets.lock().await;
        let wallet = wallets
            .get_mut(&merchant_id)
            .ok_or(WalletError::WalletNotFound { merchant_id })?;
        if success {
            wallet.locked = unlock(&wallet.locked, amount);
            wallet.balance -= settled_amount.clone();
        } else if release {
            wallet.locked = unlock(&wallet.locked, amount);
        }
        Ok(())
    }

    async fn credit_deposit(&self, merchant_id: Uuid, amount: &BigDecimal) -> WalletResult<()> {
        self.fund(merchant_id, amount.clone()).await;
        Ok(())
    }
}
