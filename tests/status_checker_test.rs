mod common;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use common::{
    dec, status_response, transaction, RecordingDispatcher, RecordingTipQueue, RecordingWallet,
    ScriptedProcessor, WalletCall,
};
use payhub_backend::config::ReconciliationConfig;
use payhub_backend::database::{InMemoryTransactionRepository, TransactionRepository};
use payhub_backend::domain::{Transaction, TransactionSource, TransactionStatus, TransactionType};
use payhub_backend::payments::providers::SandboxProcessor;
use payhub_backend::payments::types::{PaymentMedium, ProviderStatus};
use payhub_backend::payments::{PaymentProcessor, ProcessorRegistry};
use payhub_backend::services::{
    DispatchOutcome, TipProcessingService, TransactionWebhookDispatcher, WebhookDispatchError,
    WebhookDispatchEvent,
};
use payhub_backend::workers::{
    ReconciliationScheduler, SchedulerError, StatusCheckReport, TransactionStatusChecker,
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn reconciliation() -> ReconciliationConfig {
    ReconciliationConfig {
        interval: Duration::from_secs(60),
        pending_threshold: Duration::from_secs(300),
        batch_size: 50,
    }
}

fn minutes_ago(minutes: i64) -> DateTime<Utc> {
    Utc::now() - ChronoDuration::minutes(minutes)
}

struct CheckerFixture {
    transactions: Arc<InMemoryTransactionRepository>,
    processor: Arc<ScriptedProcessor>,
    dispatcher: Arc<RecordingDispatcher>,
    checker: Arc<TransactionStatusChecker>,
}

fn registry(processor: &Arc<ScriptedProcessor>) -> ProcessorRegistry {
    ProcessorRegistry::from_processors(vec![
        processor.clone() as Arc<dyn PaymentProcessor>,
        Arc::new(SandboxProcessor::new(PaymentMedium::Mpesa)) as Arc<dyn PaymentProcessor>,
    ])
}

fn checker_fixture() -> CheckerFixture {
    let transactions = Arc::new(InMemoryTransactionRepository::new());
    let processor = Arc::new(ScriptedProcessor::new(PaymentMedium::Telebirr));
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let checker = Arc::new(TransactionStatusChecker::new(
        transactions.clone(),
        registry(&processor),
        dispatcher.clone(),
        reconciliation(),
        Duration::from_secs(5),
    ));
    CheckerFixture {
        transactions,
        processor,
        dispatcher,
        checker,
    }
}

async fn seed_pending(
    transactions: &InMemoryTransactionRepository,
    medium: PaymentMedium,
    provider_tx_id: Option<&str>,
    created_at: DateTime<Utc>,
) -> Transaction {
    let mut tx = transaction(
        Uuid::new_v4(),
        TransactionType::Deposit,
        TransactionStatus::Pending,
        medium,
        "100",
        created_at,
    );
    tx.provider_tx_id = provider_tx_id.map(str::to_string);
    transactions.insert(&tx).await.unwrap()
}

// ---------------------------------------------------------------------------
// TransactionStatusChecker
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unchanged_status_is_not_written() {
    let f = checker_fixture();
    let tx = seed_pending(&f.transactions, PaymentMedium::Telebirr, Some("P1"), minutes_ago(10)).await;
    f.processor
        .set_status("P1", Ok(status_response(ProviderStatus::Processing, "P1")));

    let report = f
        .checker
        .check_pending_transactions(PaymentMedium::Telebirr)
        .await
        .unwrap();

    assert_eq!(
        report,
        StatusCheckReport {
            checked: 1,
            changed: 0,
            failed: 0,
        }
    );
    assert!(f.dispatcher.events().is_empty());
    let stored = f.transactions.find_by_id(tx.id).await.unwrap().unwrap();
    assert_eq!(stored.updated_at, tx.updated_at);
}

#[tokio::test]
async fn changed_status_is_dispatched() {
    let f = checker_fixture();
    let tx = seed_pending(&f.transactions, PaymentMedium::Telebirr, Some("P2"), minutes_ago(10)).await;
    f.processor
        .set_status("P2", Ok(status_response(ProviderStatus::Success, "P2")));

    let report = f
        .checker
        .check_pending_transactions(PaymentMedium::Telebirr)
        .await
        .unwrap();

    assert_eq!(report.changed, 1);
    let events = f.dispatcher.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].transaction_id, tx.id);
    assert_eq!(events[0].status, TransactionStatus::Success);
    assert_eq!(events[0].provider_tx_id.as_deref(), Some("P2"));
    assert!(events[0].message.as_deref().unwrap_or_default().contains("SUCCESS"));
    assert_eq!(events[0].provider_data.as_ref().unwrap()["channel"], "ussd");
}

#[tokio::test]
async fn query_failure_skips_transaction_and_continues() {
    let f = checker_fixture();
    let silent = seed_pending(&f.transactions, PaymentMedium::Telebirr, Some("P3"), minutes_ago(20)).await;
    seed_pending(&f.transactions, PaymentMedium::Telebirr, Some("P4"), minutes_ago(10)).await;
    f.processor
        .set_status("P4", Ok(status_response(ProviderStatus::Failed, "P4")));

    let report = f
        .checker
        .check_pending_transactions(PaymentMedium::Telebirr)
        .await
        .unwrap();

    assert_eq!(
        report,
        StatusCheckReport {
            checked: 2,
            changed: 1,
            failed: 1,
        }
    );
    let stored = f.transactions.find_by_id(silent.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Pending);
    assert_eq!(f.dispatcher.events()[0].status, TransactionStatus::Failed);
}

#[tokio::test]
async fn recent_transactions_are_left_alone() {
    let f = checker_fixture();
    seed_pending(&f.transactions, PaymentMedium::Telebirr, Some("P5"), minutes_ago(1)).await;
    f.processor
        .set_status("P5", Ok(status_response(ProviderStatus::Success, "P5")));

    let report = f
        .checker
        .check_pending_transactions(PaymentMedium::Telebirr)
        .await
        .unwrap();

    assert_eq!(report.checked, 0);
    assert!(f.processor.status_queries.lock().unwrap().is_empty());
}

#[tokio::test]
async fn missing_provider_reference_falls_back_to_transaction_id() {
    let f = checker_fixture();
    let tx = seed_pending(&f.transactions, PaymentMedium::Telebirr, None, minutes_ago(10)).await;
    let key = tx.id.to_string();
    f.processor
        .set_status(&key, Ok(status_response(ProviderStatus::Success, "LATE-REF")));

    f.checker
        .check_pending_transactions(PaymentMedium::Telebirr)
        .await
        .unwrap();

    assert_eq!(f.processor.status_queries.lock().unwrap().clone(), vec![key]);
    assert_eq!(
        f.dispatcher.events()[0].provider_tx_id.as_deref(),
        Some("LATE-REF")
    );
}

#[tokio::test]
async fn unknown_provider_status_is_ignored() {
    let f = checker_fixture();
    seed_pending(&f.transactions, PaymentMedium::Telebirr, Some("P6"), minutes_ago(10)).await;
    f.processor
        .set_status("P6", Ok(status_response(ProviderStatus::Unknown, "P6")));

    let report = f
        .checker
        .check_pending_transactions(PaymentMedium::Telebirr)
        .await
        .unwrap();

    assert_eq!(report.checked, 1);
    assert_eq!(report.changed, 0);
    assert!(f.dispatcher.events().is_empty());
}

#[tokio::test]
async fn unregistered_medium_aborts_that_sweep_only() {
    let f = checker_fixture();
    assert!(f
        .checker
        .check_pending_transactions(PaymentMedium::Card)
        .await
        .is_err());

    seed_pending(&f.transactions, PaymentMedium::Mpesa, Some("SBX-1"), minutes_ago(10)).await;
    let report = f.checker.check_all_mediums().await;

    // The sandbox reports every queried transaction as settled.
    assert_eq!(report.changed, 1);
    assert_eq!(f.dispatcher.events()[0].status, TransactionStatus::Success);
}

// ---------------------------------------------------------------------------
// TransactionWebhookDispatcher
// ---------------------------------------------------------------------------

struct DispatchFixture {
    transactions: Arc<InMemoryTransactionRepository>,
    wallet: Arc<RecordingWallet>,
    dispatcher: TransactionWebhookDispatcher,
}

fn dispatch_fixture() -> DispatchFixture {
    let transactions = Arc::new(InMemoryTransactionRepository::new());
    let wallet = Arc::new(RecordingWallet::new());
    let dispatcher = TransactionWebhookDispatcher::new(transactions.clone(), wallet.clone(), None);
    DispatchFixture {
        transactions,
        wallet,
        dispatcher,
    }
}

fn event(tx: &Transaction, status: TransactionStatus) -> WebhookDispatchEvent {
    WebhookDispatchEvent {
        transaction_id: tx.id,
        status,
        message: Some(format!("provider reports {}", status)),
        provider_tx_id: Some("PROV-9".to_string()),
        provider_data: Some(serde_json::json!({ "receipt": "RCPT-1" })),
        timestamp: Utc::now(),
    }
}

async fn seed(
    transactions: &InMemoryTransactionRepository,
    r#type: TransactionType,
    status: TransactionStatus,
) -> Transaction {
    let tx = transaction(
        Uuid::new_v4(),
        r#type,
        status,
        PaymentMedium::Telebirr,
        "206.325",
        minutes_ago(10),
    );
    transactions.insert(&tx).await.unwrap()
}

#[tokio::test]
async fn settled_withdrawal_debits_reservation() {
    let f = dispatch_fixture();
    let tx = seed(&f.transactions, TransactionType::Withdrawal, TransactionStatus::Pending).await;

    let outcome = f
        .dispatcher
        .apply(event(&tx, TransactionStatus::Success))
        .await
        .unwrap();

    assert_eq!(outcome, DispatchOutcome::Applied);
    assert_eq!(
        f.wallet.calls(),
        vec![WalletCall::Process {
            merchant_id: tx.merchant_id,
            amount: dec("206.325"),
            settled: dec("206.325"),
            success: true,
            release: false,
        }]
    );
    let stored = f.transactions.find_by_id(tx.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Success);
    assert_eq!(stored.provider_tx_id.as_deref(), Some("PROV-9"));
    assert_eq!(stored.comment.as_deref(), Some("provider reports SUCCESS"));
    assert_eq!(stored.metadata["provider_data"]["receipt"], "RCPT-1");
}

#[tokio::test]
async fn failed_withdrawal_releases_reservation() {
    let f = dispatch_fixture();
    let tx = seed(&f.transactions, TransactionType::Withdrawal, TransactionStatus::Pending).await;

    f.dispatcher
        .apply(event(&tx, TransactionStatus::Failed))
        .await
        .unwrap();

    assert_eq!(f.wallet.releases().len(), 1);
    assert!(f.wallet.settlements().is_empty());
}

#[tokio::test]
async fn settled_deposit_credits_merchant() {
    let f = dispatch_fixture();
    let tx = seed(&f.transactions, TransactionType::Deposit, TransactionStatus::Pending).await;

    f.dispatcher
        .apply(event(&tx, TransactionStatus::Success))
        .await
        .unwrap();

    assert_eq!(
        f.wallet.calls(),
        vec![WalletCall::Credit {
            merchant_id: tx.merchant_id,
            amount: dec("206.325"),
        }]
    );
}

#[tokio::test]
async fn tip_payouts_never_touch_the_wallet() {
    let f = dispatch_fixture();
    let mut tip = transaction(
        Uuid::new_v4(),
        TransactionType::Withdrawal,
        TransactionStatus::Pending,
        PaymentMedium::Telebirr,
        "20",
        minutes_ago(10),
    );
    tip.source = TransactionSource::WithdrawalTip;
    let tip = f.transactions.insert(&tip).await.unwrap();

    f.dispatcher
        .apply(event(&tip, TransactionStatus::Success))
        .await
        .unwrap();

    assert!(f.wallet.calls().is_empty());
}

#[tokio::test]
async fn terminal_and_repeated_statuses_are_not_reapplied() {
    let f = dispatch_fixture();
    let settled = seed(&f.transactions, TransactionType::Deposit, TransactionStatus::Success).await;

    assert_eq!(
        f.dispatcher
            .apply(event(&settled, TransactionStatus::Success))
            .await
            .unwrap(),
        DispatchOutcome::Unchanged
    );
    assert_eq!(
        f.dispatcher
            .apply(event(&settled, TransactionStatus::Failed))
            .await
            .unwrap(),
        DispatchOutcome::Ignored
    );
    assert!(f.wallet.calls().is_empty());

    let stored = f.transactions.find_by_id(settled.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Success);
}

#[tokio::test]
async fn existing_provider_reference_is_kept() {
    let f = dispatch_fixture();
    let mut tx = transaction(
        Uuid::new_v4(),
        TransactionType::Deposit,
        TransactionStatus::Pending,
        PaymentMedium::Telebirr,
        "50",
        minutes_ago(10),
    );
    tx.provider_tx_id = Some("ORIGINAL".to_string());
    let tx = f.transactions.insert(&tx).await.unwrap();

    f.dispatcher
        .apply(event(&tx, TransactionStatus::Failed))
        .await
        .unwrap();

    let stored = f.transactions.find_by_id(tx.id).await.unwrap().unwrap();
    assert_eq!(stored.provider_tx_id.as_deref(), Some("ORIGINAL"));
}

#[tokio::test]
async fn unknown_transaction_is_an_error() {
    let f = dispatch_fixture();
    let ghost = transaction(
        Uuid::new_v4(),
        TransactionType::Deposit,
        TransactionStatus::Pending,
        PaymentMedium::Telebirr,
        "50",
        minutes_ago(10),
    );

    let err = f
        .dispatcher
        .apply(event(&ghost, TransactionStatus::Success))
        .await
        .unwrap_err();

    assert!(matches!(err, WebhookDispatchError::TransactionNotFound(id) if id == ghost.id));
}

#[tokio::test]
async fn sweep_through_real_dispatcher_updates_store() {
    let transactions = Arc::new(InMemoryTransactionRepository::new());
    let processor = Arc::new(ScriptedProcessor::new(PaymentMedium::Telebirr));
    let wallet = Arc::new(RecordingWallet::new());
    let dispatcher = Arc::new(TransactionWebhookDispatcher::new(
        transactions.clone(),
        wallet.clone(),
        None,
    ));
    let checker = TransactionStatusChecker::new(
        transactions.clone(),
        registry(&processor),
        dispatcher,
        reconciliation(),
        Duration::from_secs(5),
    );
    let tx = seed_pending(&transactions, PaymentMedium::Telebirr, Some("P7"), minutes_ago(10)).await;
    processor.set_status("P7", Ok(status_response(ProviderStatus::Success, "P7")));

    checker
        .check_pending_transactions(PaymentMedium::Telebirr)
        .await
        .unwrap();

    let stored = transactions.find_by_id(tx.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Success);
    assert_eq!(wallet.calls().len(), 1);

    // A second sweep finds nothing left to reconcile.
    let report = checker
        .check_pending_transactions(PaymentMedium::Telebirr)
        .await
        .unwrap();
    assert_eq!(report.checked, 0);
}

// ---------------------------------------------------------------------------
// ReconciliationScheduler
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn scheduler_runs_immediately_and_stops_cleanly() {
    let f = checker_fixture();
    seed_pending(&f.transactions, PaymentMedium::Telebirr, Some("P8"), minutes_ago(10)).await;
    f.processor
        .set_status("P8", Ok(status_response(ProviderStatus::Success, "P8")));
    let scheduler = ReconciliationScheduler::new(f.checker.clone(), None, Duration::from_secs(3600));

    assert_eq!(scheduler.stop().await, Err(SchedulerError::NotRunning));
    scheduler.start().await.unwrap();
    assert_eq!(scheduler.start().await, Err(SchedulerError::AlreadyStarted));
    assert!(scheduler.is_running().await);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(f.dispatcher.events().len(), 1);

    scheduler.stop().await.unwrap();
    assert!(!scheduler.is_running().await);
    assert_eq!(scheduler.stop().await, Err(SchedulerError::NotRunning));

    // Restartable after a stop.
    scheduler.start().await.unwrap();
    scheduler.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn scheduler_cycle_processes_pending_tips() {
    let f = checker_fixture();
    let queue = Arc::new(RecordingTipQueue::default());
    let tips = Arc::new(TipProcessingService::new(f.transactions.clone(), queue.clone(), 10));
    let mut parent = transaction(
        Uuid::new_v4(),
        TransactionType::Deposit,
        TransactionStatus::Success,
        PaymentMedium::Telebirr,
        "500",
        minutes_ago(10),
    );
    parent.has_tip = true;
    parent.tip_amount = Some(dec("25"));
    parent.tipee_phone = Some("0912345678".to_string());
    parent.tip_medium = Some(PaymentMedium::Mpesa);
    f.transactions.insert(&parent).await.unwrap();

    let scheduler =
        ReconciliationScheduler::new(f.checker.clone(), Some(tips), Duration::from_secs(60));
    scheduler.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    scheduler.stop().await.unwrap();

    let queued = queue.queued();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].medium, PaymentMedium::Mpesa);
    assert_eq!(queued[0].total_amount, dec("25"));
}
