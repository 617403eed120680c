use anyhow::Context;
use payhub_backend::config::AppConfig;
use payhub_backend::database::{
    self, HostedPaymentRepository, InMemoryHostedPaymentRepository, InMemoryTransactionRepository,
    PgHostedPaymentRepository, PgTransactionRepository, PgWalletLedger, TransactionRepository,
};
use payhub_backend::logging::init_tracing;
use payhub_backend::payments::registry::ProcessorRegistry;
use payhub_backend::services::{
    ConfiguredCommissionCalculator, InMemoryWalletLedger, MerchantNotifier, OrchestratorConfig,
    PaymentOrchestrator, TipPayoutExecutor, TipProcessingService, TransactionCreationService,
    TransactionWebhookDispatcher, WalletLedger,
};
use payhub_backend::workers::{ReconciliationScheduler, TipDispatchPool, TransactionStatusChecker};
use regex::Regex;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;
    config.validate().context("invalid configuration")?;
    init_tracing(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        skip_externals = config.skip_externals,
        sandbox = config.payments.sandbox,
        "Starting payhub backend"
    );

    // Stores and wallet
    let (transactions, hosted_payments, wallet): (
        Arc<dyn TransactionRepository>,
        Arc<dyn HostedPaymentRepository>,
        Arc<dyn WalletLedger>,
    ) = match &config.database {
        Some(db_config) => {
            info!("Initializing database connection pool...");
            let pool = database::init_pool_from_config(db_config)
                .await
                .context("failed to initialize database pool")?;
            database::health_check(&pool)
                .await
                .context("database health check failed")?;
            info!(
                max_connections = pool.options().get_max_connections(),
                "Database connection pool initialized"
            );
            (
                Arc::new(PgTransactionRepository::new(pool.clone())),
                Arc::new(PgHostedPaymentRepository::new(pool.clone())),
                Arc::new(PgWalletLedger::new(pool)),
            )
        }
        None => {
            warn!("Using in-memory stores (SKIP_EXTERNALS=true); data is lost on exit");
            (
                Arc::new(InMemoryTransactionRepository::new()),
                Arc::new(InMemoryHostedPaymentRepository::new()),
                Arc::new(InMemoryWalletLedger::new()),
            )
        }
    };

    // Processors
    let processors = ProcessorRegistry::from_config(&config.payments)
        .context("failed to build payment processor registry")?;
    info!(mediums = ?processors.mediums(), "Payment processors registered");

    // Services
    let tipee_phone = Regex::new(&config.tips.phone_pattern).context("invalid TIPEE_PHONE_PATTERN")?;
    let creation = Arc::new(TransactionCreationService::new(
        Arc::new(ConfiguredCommissionCalculator::new(&config.commission)),
        tipee_phone,
    ));
    let orchestrator = Arc::new(PaymentOrchestrator::new(
        Arc::clone(&transactions),
        Arc::clone(&hosted_payments),
        processors.clone(),
        Arc::clone(&wallet),
        creation,
        OrchestratorConfig::from(&config),
    ));

    let notifier = match MerchantNotifier::new(&config.webhook) {
        Ok(notifier) => Some(Arc::new(notifier)),
        Err(e) => {
            warn!(error = %e, "Merchant notifications disabled");
            None
        }
    };
    let dispatcher = Arc::new(TransactionWebhookDispatcher::new(
        Arc::clone(&transactions),
        Arc::clone(&wallet),
        notifier,
    ));

    // Workers
    let tip_pool = Arc::new(TipDispatchPool::start(
        Arc::new(TipPayoutExecutor::new(
            Arc::clone(&transactions),
            processors.clone(),
            config.payments.payout_credential()?,
            config.payments.provider_timeout,
        )),
        config.tips.workers,
        config.tips.queue_capacity,
    ));
    let tips = Arc::new(TipProcessingService::new(
        Arc::clone(&transactions),
        tip_pool.clone(),
        config.tips.batch_size,
    ));
    let checker = Arc::new(TransactionStatusChecker::new(
        Arc::clone(&transactions),
        processors,
        dispatcher,
        config.reconciliation.clone(),
        config.payments.provider_timeout,
    ));
    let scheduler = ReconciliationScheduler::new(
        checker,
        Some(tips),
        config.reconciliation.interval,
    );
    scheduler.start().await?;

    info!(
        mediums = orchestrator.processors().mediums().len(),
        "Payment orchestration engine is ready"
    );

    shutdown_signal().await;

    if let Err(e) = scheduler.stop().await {
        warn!(error = %e, "Reconciliation scheduler was not running");
    }
    tip_pool.shutdown().await;

    info!("Shutdown complete");
    Ok(())
}
