//! Scripted collaborators shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use payhub_backend::database::error::{DatabaseError, DatabaseErrorKind, DbResult};
use payhub_backend::database::{
    InMemoryHostedPaymentRepository, InMemoryTransactionRepository, TransactionRepository,
};
use payhub_backend::domain::{Transaction, TransactionSource, TransactionStatus, TransactionType};
use payhub_backend::payments::error::{PaymentError, PaymentResult};
use payhub_backend::payments::provider::PaymentProcessor;
use payhub_backend::payments::providers::SandboxProcessor;
use payhub_backend::payments::registry::ProcessorRegistry;
use payhub_backend::payments::types::{
    PaymentMedium, ProcessorCredential, ProcessorRequest, ProcessorResponse, ProviderStatus,
    StatusQueryResponse,
};
use payhub_backend::services::commission::{CommissionCalculator, CommissionResult};
use payhub_backend::services::error::OrchestratorResult;
use payhub_backend::services::tip_processing::TipPayoutQueue;
use payhub_backend::services::transaction_creation::TransactionCreationService;
use payhub_backend::services::wallet_ledger::{WalletError, WalletLedger, WalletResult};
use payhub_backend::services::webhook_dispatcher::{
    WebhookDispatchError, WebhookDispatchEvent, WebhookDispatcher,
};
use payhub_backend::services::{OrchestratorConfig, PaymentOrchestrator, RequestContext};
use regex::Regex;
use serde_json::{json, Value as JsonValue};
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub fn dec(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap()
}

// ---------------------------------------------------------------------------
// Commission
// ---------------------------------------------------------------------------

pub struct StubCommission {
    pub rate: CommissionResult,
}

impl StubCommission {
    pub fn new(percent: &str, cent: &str) -> Self {
        Self {
            rate: CommissionResult {
                percent: dec(percent),
                cent: dec(cent),
            },
        }
    }
}

#[async_trait]
impl CommissionCalculator for StubCommission {
    async fn calculate_commission(
        &self,
        _base_amount: &BigDecimal,
        _merchant_id: Uuid,
    ) -> OrchestratorResult<CommissionResult> {
        Ok(self.rate.clone())
    }
}

pub fn creation_service(percent: &str, cent: &str) -> TransactionCreationService {
    TransactionCreationService::new(
        Arc::new(StubCommission::new(percent, cent)),
        Regex::new(payhub_backend::config::DEFAULT_TIPEE_PHONE_PATTERN).unwrap(),
    )
}

// ---------------------------------------------------------------------------
// Wallet
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum WalletCall {
    Lock {
        merchant_id: Uuid,
        amount: BigDecimal,
        persisted_rows: usize,
    },
    Process {
        merchant_id: Uuid,
        amount: BigDecimal,
        settled: BigDecimal,
        success: bool,
        release: bool,
    },
    Credit {
        merchant_id: Uuid,
        amount: BigDecimal,
    },
}

/// Records every call. `persisted_rows` snapshots the observed store at lock
/// time so tests can assert lock-before-persist ordering.
#[derive(Default)]
pub struct RecordingWallet {
    calls: Mutex<Vec<WalletCall>>,
    fail_lock: AtomicBool,
    observed: Mutex<Option<Arc<InMemoryTransactionRepository>>>,
}

impl RecordingWallet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, transactions: Arc<InMemoryTransactionRepository>) {
        *self.observed.lock().unwrap() = Some(transactions);
    }

    pub fn fail_locks(&self) {
        self.fail_lock.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<WalletCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn releases(&self) -> Vec<WalletCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, WalletCall::Process { release: true, .. }))
            .collect()
    }

    pub fn settlements(&self) -> Vec<WalletCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, WalletCall::Process { success: true, .. }))
            .collect()
    }
}

#[async_trait]
impl WalletLedger for RecordingWallet {
    async fn lock_withdrawal_amount(
        &self,
        merchant_id: Uuid,
        amount: &BigDecimal,
    ) -> WalletResult<()> {
        if self.fail_lock.load(Ordering::SeqCst) {
            return Err(WalletError::InsufficientFunds {
                merchant_id,
                requested: amount.clone(),
                available: BigDecimal::from(0),
            });
        }
        let observed = self.observed.lock().unwrap().clone();
        let persisted_rows = match observed {
            Some(repo) => repo.all().await.len(),
            None => 0,
        };
        self.calls.lock().unwrap().push(WalletCall::Lock {
            merchant_id,
            amount: amount.clone(),
            persisted_rows,
        });
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
        self.calls.lock().unwrap().push(WalletCall::Process {
            merchant_id,
            amount: amount.clone(),
            settled: settled_amount.clone(),
            success,
            release,
        });
        Ok(())
    }

    async fn credit_deposit(&self, merchant_id: Uuid, amount: &BigDecimal) -> WalletResult<()> {
        self.calls.lock().unwrap().push(WalletCall::Credit {
            merchant_id,
            amount: amount.clone(),
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

pub fn accepted_response(status: ProviderStatus, processor_ref: &str) -> ProcessorResponse {
    ProcessorResponse {
        success: true,
        status,
        message: Some("accepted".to_string()),
        payment_url: Some(format!("https://pay.test/{}", processor_ref)),
        processor_ref: Some(processor_ref.to_string()),
    }
}

pub fn declined() -> PaymentError {
    PaymentError::PaymentDeclinedError {
        message: "insufficient balance on payer account".to_string(),
        provider_code: Some("E51".to_string()),
    }
}

/// Answers from queued scripts; an empty script accepts as PENDING.
pub struct ScriptedProcessor {
    medium: PaymentMedium,
    payments: Mutex<VecDeque<PaymentResult<ProcessorResponse>>>,
    withdrawals: Mutex<VecDeque<PaymentResult<ProcessorResponse>>>,
    statuses: Mutex<HashMap<String, PaymentResult<StatusQueryResponse>>>,
    delay: Mutex<Option<Duration>>,
    pub payment_requests: Mutex<Vec<ProcessorRequest>>,
    pub withdrawal_requests: Mutex<Vec<ProcessorRequest>>,
    pub status_queries: Mutex<Vec<String>>,
    /// Credential fingerprint seen by each withdrawal, in call order.
    pub withdrawal_credentials: Mutex<Vec<String>>,
}

impl ScriptedProcessor {
    pub fn new(medium: PaymentMedium) -> Self {
        Self {
            medium,
            payments: Mutex::new(VecDeque::new()),
            withdrawals: Mutex::new(VecDeque::new()),
            statuses: Mutex::new(HashMap::new()),
            delay: Mutex::new(None),
            payment_requests: Mutex::new(Vec::new()),
            withdrawal_requests: Mutex::new(Vec::new()),
            status_queries: Mutex::new(Vec::new()),
            withdrawal_credentials: Mutex::new(Vec::new()),
        }
    }

    pub fn push_payment(&self, result: PaymentResult<ProcessorResponse>) {
        self.payments.lock().unwrap().push_back(result);
    }

    pub fn push_withdrawal(&self, result: PaymentResult<ProcessorResponse>) {
        self.withdrawals.lock().unwrap().push_back(result);
    }

    pub fn set_status(&self, key: &str, result: PaymentResult<StatusQueryResponse>) {
        self.statuses.lock().unwrap().insert(key.to_string(), result);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn default_response(request: &ProcessorRequest) -> PaymentResult<ProcessorResponse> {
        Ok(accepted_response(
            ProviderStatus::Pending,
            &format!("SCRIPTED-{}", request.transaction_id),
        ))
    }
}

#[async_trait]
impl PaymentProcessor for ScriptedProcessor {
    fn medium(&self) -> PaymentMedium {
        self.medium
    }

    async fn initiate_payment(
        &self,
        _credential: &ProcessorCredential,
        request: ProcessorRequest,
    ) -> PaymentResult<ProcessorResponse> {
        self.payment_requests.lock().unwrap().push(request.clone());
        self.pause().await;
        let scripted = self.payments.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Self::default_response(&request))
    }

    async fn initiate_withdrawal(
        &self,
        credential: &ProcessorCredential,
        request: ProcessorRequest,
    ) -> PaymentResult<ProcessorResponse> {
        self.withdrawal_credentials
            .lock()
            .unwrap()
            .push(credential.fingerprint());
        self.withdrawal_requests.lock().unwrap().push(request.clone());
        self.pause().await;
        let scripted = self.withdrawals.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Self::default_response(&request))
    }

    async fn query_status(&self, provider_tx_id: &str) -> PaymentResult<StatusQueryResponse> {
        self.status_queries
            .lock()
            .unwrap()
            .push(provider_tx_id.to_string());
        self.statuses
            .lock()
            .unwrap()
            .get(provider_tx_id)
            .cloned()
            .unwrap_or_else(|| {
                Err(PaymentError::NetworkError {
                    message: "connection reset".to_string(),
                })
            })
    }
}

pub fn status_response(status: ProviderStatus, provider_tx_id: &str) -> StatusQueryResponse {
    StatusQueryResponse {
        status,
        provider_tx_id: Some(provider_tx_id.to_string()),
        provider_data: Some(json!({ "channel": "ussd" })),
    }
}

// ---------------------------------------------------------------------------
// Webhook dispatcher and tip queue
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingDispatcher {
    pub events: Mutex<Vec<WebhookDispatchEvent>>,
}

impl RecordingDispatcher {
    pub fn events(&self) -> Vec<WebhookDispatchEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebhookDispatcher for RecordingDispatcher {
    async fn handle_webhook_dispatch(
        &self,
        event: WebhookDispatchEvent,
    ) -> Result<(), WebhookDispatchError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingTipQueue {
    pub queued: Mutex<Vec<Transaction>>,
}

impl RecordingTipQueue {
    pub fn queued(&self) -> Vec<Transaction> {
        self.queued.lock().unwrap().clone()
    }
}

#[async_trait]
impl TipPayoutQueue for RecordingTipQueue {
    async fn enqueue(&self, tip: Transaction) -> OrchestratorResult<()> {
        self.queued.lock().unwrap().push(tip);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Store that refuses inserts
// ---------------------------------------------------------------------------

/// Delegates to an in-memory store but fails every insert.
fn connection_refused() -> DatabaseError {
    DatabaseError::new(DatabaseErrorKind::ConnectionError {
        message: "connection refused (os error 111)".to_string(),
    })
}

/// Delegates to `inner` except for the writes it is told to fail.
pub struct FaultyRepository {
    pub inner: Arc<InMemoryTransactionRepository>,
    pub fail_inserts: bool,
    /// Number of upcoming `update_status` calls that fail.
    pub failing_status_updates: AtomicUsize,
}

#[async_trait]
impl TransactionRepository for FaultyRepository {
    async fn insert(&self, transaction: &Transaction) -> DbResult<Transaction> {
        if self.fail_inserts {
            return Err(connection_refused());
        }
        self.inner.insert(transaction).await
    }

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<Transaction>> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_reference(
        &self,
        merchant_id: Uuid,
        reference: &str,
    ) -> DbResult<Option<Transaction>> {
        self.inner.find_by_reference(merchant_id, reference).await
    }

    async fn reference_exists(&self, merchant_id: Uuid, reference: &str) -> DbResult<bool> {
        self.inner.reference_exists(merchant_id, reference).await
    }

    async fn update(&self, transaction: &Transaction) -> DbResult<Transaction> {
        self.inner.update(transaction).await
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: TransactionStatus,
        comment: Option<&str>,
    ) -> DbResult<Transaction> {
        let fail = self
            .failing_status_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(connection_refused());
        }
        self.inner.update_status(id, status, comment).await
    }

    async fn set_provider_tx_id(&self, id: Uuid, provider_tx_id: &str) -> DbResult<()> {
        self.inner.set_provider_tx_id(id, provider_tx_id).await
    }

    async fn find_pending_by_medium(
        &self,
        medium: PaymentMedium,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<Transaction>> {
        self.inner
            .find_pending_by_medium(medium, created_before, limit)
            .await
    }

    async fn find_unprocessed_tips(&self, limit: i64) -> DbResult<Vec<Transaction>> {
        self.inner.find_unprocessed_tips(limit).await
    }

    async fn mark_tip_processed(
        &self,
        parent_id: Uuid,
        tip_transaction_id: Uuid,
    ) -> DbResult<bool> {
        self.inner
            .mark_tip_processed(parent_id, tip_transaction_id)
            .await
    }

    async fn merge_metadata(&self, id: Uuid, patch: JsonValue) -> DbResult<()> {
        self.inner.merge_metadata(id, patch).await
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A persisted-looking transaction with zero fees, for seeding stores directly.
pub fn transaction(
    merchant_id: Uuid,
    r#type: TransactionType,
    status: TransactionStatus,
    medium: PaymentMedium,
    amount: &str,
    created_at: DateTime<Utc>,
) -> Transaction {
    let amount = dec(amount);
    Transaction {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        merchant_id,
        r#type,
        medium,
        source: TransactionSource::Direct,
        status,
        currency: "ETB".to_string(),
        base_amount: amount.clone(),
        fee_amount: BigDecimal::from(0),
        vat_amount: BigDecimal::from(0),
        admin_net: BigDecimal::from(0),
        merchant_net: amount.clone(),
        customer_net: amount.clone(),
        total_amount: amount,
        merchant_pays_fee: false,
        phone_number: Some("0911223344".to_string()),
        description: None,
        reference: format!("REF-{}", Uuid::new_v4()),
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
        metadata: json!({}),
        created_at,
        updated_at: created_at,
    }
}

/// Orchestrator over in-memory stores. TELEBIRR is scripted; MPESA is the
/// sandbox processor.
pub struct Harness {
    pub transactions: Arc<InMemoryTransactionRepository>,
    pub hosted: Arc<InMemoryHostedPaymentRepository>,
    pub wallet: Arc<RecordingWallet>,
    pub processor: Arc<ScriptedProcessor>,
    pub orchestrator: PaymentOrchestrator,
    pub merchant_id: Uuid,
    pub user_id: Uuid,
}

impl Harness {
    pub fn new(percent: &str, cent: &str) -> Self {
        let transactions = Arc::new(InMemoryTransactionRepository::new());
        Self::build(percent, cent, transactions.clone(), transactions)
    }

    /// Every transaction insert fails; reads go to the returned inner store.
    pub fn with_failing_inserts(percent: &str, cent: &str) -> Self {
        let inner = Arc::new(InMemoryTransactionRepository::new());
        let failing = Arc::new(FaultyRepository {
            inner: inner.clone(),
            fail_inserts: true,
            failing_status_updates: AtomicUsize::new(0),
        });
        Self::build(percent, cent, inner, failing)
    }

    /// The next `count` status writes fail; reads go to the returned inner store.
    pub fn with_failing_status_updates(percent: &str, cent: &str, count: usize) -> Self {
        let inner = Arc::new(InMemoryTransactionRepository::new());
        let faulty = Arc::new(FaultyRepository {
            inner: inner.clone(),
            fail_inserts: false,
            failing_status_updates: AtomicUsize::new(count),
        });
        Self::build(percent, cent, inner, faulty)
    }

    fn build(
        percent: &str,
        cent: &str,
        transactions: Arc<InMemoryTransactionRepository>,
        store: Arc<dyn TransactionRepository>,
    ) -> Self {
        let hosted = Arc::new(InMemoryHostedPaymentRepository::new());
        let wallet = Arc::new(RecordingWallet::new());
        wallet.observe(transactions.clone());
        let processor = Arc::new(ScriptedProcessor::new(PaymentMedium::Telebirr));
        let registry = ProcessorRegistry::from_processors(vec![
            processor.clone() as Arc<dyn PaymentProcessor>,
            Arc::new(SandboxProcessor::new(PaymentMedium::Mpesa)) as Arc<dyn PaymentProcessor>,
        ]);
        let orchestrator = PaymentOrchestrator::new(
            store,
            hosted.clone(),
            registry,
            wallet.clone(),
            Arc::new(creation_service(percent, cent)),
            OrchestratorConfig::default(),
        );
        Self {
            transactions,
            hosted,
            wallet,
            processor,
            orchestrator,
            merchant_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
        }
    }

    pub fn ctx(&self) -> RequestContext {
        RequestContext::new("sk_test_merchant", self.user_id, self.merchant_id)
    }
}
