use crate::database::error::DatabaseError;
use crate::error::{
    AppError, AppErrorKind, DomainError, ErrorCode, ErrorResponse, InfrastructureError,
    ValidationError,
};
use crate::payments::error::PaymentError;
use crate::services::wallet_ledger::WalletError;
use thiserror::Error;

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Failure taxonomy shared by the orchestrator, the tip service and the
/// webhook consumer.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("duplicate reference: {reference}")]
    DuplicateReference { reference: String },

    #[error("hosted checkout {checkout_id} has expired")]
    CheckoutExpired { checkout_id: String },

    #[error("hosted checkout {checkout_id} is no longer available")]
    CheckoutUnavailable { checkout_id: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("wallet reservation failed: {0}")]
    WalletReservation(#[source] WalletError),

    #[error("payment provider failed: {0}")]
    Provider(#[source] PaymentError),

    #[error("persistence failed: {0}")]
    Persistence(#[source] DatabaseError),

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl OrchestratorError {
    pub fn validation(message: impl Into<String>, field: Option<&str>) -> Self {
        OrchestratorError::Validation {
            message: message.into(),
            field: field.map(|f| f.to_string()),
        }
    }

    /// Store errors on insert: a uniqueness violation is the same failure as
    /// the reference pre-check.
    pub fn from_insert(err: DatabaseError, reference: &str) -> Self {
        if err.is_unique_violation() {
            OrchestratorError::DuplicateReference {
                reference: reference.to_string(),
            }
        } else {
            OrchestratorError::Persistence(err)
        }
    }

    pub fn code(&self) -> ErrorCode {
        AppError::from(self).error_code()
    }

    pub fn to_response(&self) -> ErrorResponse {
        AppError::from(self).to_response()
    }
}

impl From<PaymentError> for OrchestratorError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::ValidationError { message, field } => {
                OrchestratorError::Validation { message, field }
            }
            PaymentError::UnsupportedMedium { medium } => OrchestratorError::Validation {
                message: format!("Payment medium '{}' is not supported", medium),
                field: Some("medium".to_string()),
            },
            other => OrchestratorError::Provider(other),
        }
    }
}

impl From<DatabaseError> for OrchestratorError {
    fn from(err: DatabaseError) -> Self {
        OrchestratorError::Persistence(err)
    }
}

impl From<WalletError> for OrchestratorError {
    fn from(err: WalletError) -> Self {
        OrchestratorError::WalletReservation(err)
    }
}

impl From<&OrchestratorError> for AppError {
    fn from(err: &OrchestratorError) -> Self {
        let kind = match err {
            OrchestratorError::Validation { message, field } => {
                AppErrorKind::Validation(ValidationError::Invalid {
                    field: field.clone(),
                    message: message.clone(),
                })
            }
            OrchestratorError::DuplicateReference { reference } => {
                AppErrorKind::Domain(DomainError::DuplicateReference {
                    reference: reference.clone(),
                })
            }
            OrchestratorError::CheckoutExpired { checkout_id } => {
                AppErrorKind::Domain(DomainError::CheckoutExpired {
                    checkout_id: checkout_id.clone(),
                })
            }
            OrchestratorError::CheckoutUnavailable { checkout_id } => {
                AppErrorKind::Domain(DomainError::CheckoutUnavailable {
                    checkout_id: checkout_id.clone(),
                })
            }
            OrchestratorError::NotFound { entity, id } => {
                AppErrorKind::Domain(DomainError::NotFound {
                    entity: entity.to_string(),
                    id: id.clone(),
                })
            }
            OrchestratorError::WalletReservation(WalletError::InsufficientFunds { .. }) => {
                AppErrorKind::Domain(DomainError::InsufficientFunds)
            }
            OrchestratorError::WalletReservation(_) => {
                AppErrorKind::Domain(DomainError::WalletUnavailable)
            }
            OrchestratorError::Provider(payment) => return AppError::from(payment),
            OrchestratorError::Persistence(db) => return AppError::from(db),
            OrchestratorError::Internal { message } => {
                AppErrorKind::Infrastructure(InfrastructureError::Internal {
                    message: message.clone(),
                })
            }
        };
        AppError::new(kind)
    }
}
