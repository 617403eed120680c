//! Services module for business logic and integrations

pub mod commission;
pub mod error;
pub mod hosted_checkout;
pub mod notification;
pub mod payment_orchestrator;
pub mod tip_processing;
pub mod transaction_creation;
pub mod wallet_ledger;
pub mod webhook_dispatcher;

pub use commission::{CommissionCalculator, CommissionResult, ConfiguredCommissionCalculator};
pub use error::{OrchestratorError, OrchestratorResult};
pub use hosted_checkout::{
    CheckoutPaymentRequest, CreateHostedCheckoutRequest, HostedCheckoutResponse,
    UpdateHostedCheckoutRequest,
};
pub use notification::{MerchantNotification, MerchantNotifier};
pub use payment_orchestrator::{
    DirectPaymentRequest, OrchestratorConfig, PaymentOrchestrator, PaymentResponse,
    RequestContext, WithdrawalRequest,
};
pub use tip_processing::{
    TipBatchReport, TipOutcome, TipPayoutExecutor, TipPayoutQueue, TipProcessingService,
};
pub use transaction_creation::{
    CreateTransactionRequest, CreateTransactionResponse, TransactionCreationService,
};
pub use wallet_ledger::{InMemoryWalletLedger, WalletError, WalletLedger, WalletReservation};
pub use webhook_dispatcher::{
    DispatchOutcome, TransactionWebhookDispatcher, WebhookDispatchError, WebhookDispatchEvent,
    WebhookDispatcher,
};
