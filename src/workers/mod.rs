pub mod scheduler;
pub mod status_checker;
pub mod tip_dispatch;

pub use scheduler::{ReconciliationScheduler, SchedulerError};
pub use status_checker::{StatusCheckError, StatusCheckReport, TransactionStatusChecker};
pub use tip_dispatch::{TipDispatchError, TipDispatchPool};
