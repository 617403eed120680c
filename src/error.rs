//! User-facing error taxonomy.
//!
//! Internal causes (SQL errors, provider bodies) stay in logs; every variant
//! here renders a sanitized `{type, message}` envelope for callers.

use crate::database::error::DatabaseError;
use crate::payments::error::PaymentError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable error codes for programmatic handling
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
    #[serde(rename = "DUPLICATE_REFERENCE")]
    DuplicateReference,
    #[serde(rename = "CHECKOUT_EXPIRED")]
    CheckoutExpired,
    #[serde(rename = "CHECKOUT_UNAVAILABLE")]
    CheckoutUnavailable,
    #[serde(rename = "WALLET_RESERVATION_FAILED")]
    WalletReservationFailed,
    #[serde(rename = "PAYMENT_PROVIDER_ERROR")]
    PaymentProviderError,
    #[serde(rename = "PERSISTENCE_ERROR")]
    PersistenceError,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
}

/// Error envelope returned by every orchestrator entry point.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    #[serde(rename = "type")]
    pub error_type: ErrorCode,
    pub message: String,
}

/// Domain-specific business logic errors
#[derive(Debug, Clone)]
pub enum DomainError {
    DuplicateReference { reference: String },
    CheckoutExpired { checkout_id: String },
    CheckoutUnavailable { checkout_id: String },
    NotFound { entity: String, id: String },
    InsufficientFunds,
    WalletUnavailable,
}

/// Infrastructure-level errors (database, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Persistence { message: String, is_retryable: bool },
    Configuration { message: String },
    Internal { message: String },
}

/// External service errors (payment processors)
#[derive(Debug, Clone)]
pub enum ExternalError {
    PaymentProvider {
        provider: String,
        user_message: String,
        is_retryable: bool,
    },
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    Invalid {
        field: Option<String>,
        message: String,
    },
    MissingField { field: String },
}

#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// HTTP status a transport layer should use for this error.
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::DuplicateReference { .. } => 409,
                DomainError::CheckoutExpired { .. } => 410,
                DomainError::CheckoutUnavailable { .. } => 409,
                DomainError::NotFound { .. } => 404,
                DomainError::InsufficientFunds => 422,
                DomainError::WalletUnavailable => 503,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => 502,
                ExternalError::Timeout { .. } => 504,
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::DuplicateReference { .. } => ErrorCode::DuplicateReference,
                DomainError::CheckoutExpired { .. } => ErrorCode::CheckoutExpired,
                DomainError::CheckoutUnavailable { .. } => ErrorCode::CheckoutUnavailable,
                DomainError::NotFound { .. } => ErrorCode::NotFound,
                DomainError::InsufficientFunds | DomainError::WalletUnavailable => {
                    ErrorCode::WalletReservationFailed
                }
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Persistence { .. } => ErrorCode::PersistenceError,
                InfrastructureError::Configuration { .. } | InfrastructureError::Internal { .. } => {
                    ErrorCode::InternalError
                }
            },
            AppErrorKind::External(_) => ErrorCode::PaymentProviderError,
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::DuplicateReference { reference } => {
                    format!("Reference '{}' has already been used", reference)
                }
                DomainError::CheckoutExpired { .. } => "Checkout session has expired".to_string(),
                DomainError::CheckoutUnavailable { .. } => {
                    "Checkout session is no longer available".to_string()
                }
                DomainError::NotFound { entity, id } => format!("{} '{}' not found", entity, id),
                DomainError::InsufficientFunds => {
                    "Insufficient wallet balance for this withdrawal".to_string()
                }
                DomainError::WalletUnavailable => {
                    "Wallet is temporarily unavailable. Please try again later".to_string()
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { user_message, .. } => user_message.clone(),
                ExternalError::Timeout { service, .. } => {
                    format!("{} did not respond in time. Please try again", service)
                }
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::Invalid { message, .. } => message.clone(),
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
            },
        }
    }

    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(err) => matches!(err, DomainError::WalletUnavailable),
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Persistence { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } | InfrastructureError::Internal { .. } => {
                    false
                }
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { is_retryable, .. } => *is_retryable,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            error_type: self.error_code(),
            message: self.user_message(),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

impl From<&PaymentError> for AppError {
    fn from(err: &PaymentError) -> Self {
        let kind = match err {
            PaymentError::ValidationError { message, field } => {
                AppErrorKind::Validation(ValidationError::Invalid {
                    field: field.clone(),
                    message: message.clone(),
                })
            }
            PaymentError::UnsupportedMedium { .. } => {
                AppErrorKind::Validation(ValidationError::Invalid {
                    field: Some("medium".to_string()),
                    message: err.user_message(),
                })
            }
            PaymentError::Timeout { timeout_secs } => AppErrorKind::External(ExternalError::Timeout {
                service: "Payment provider".to_string(),
                timeout_secs: *timeout_secs,
            }),
            PaymentError::ProviderError { provider, .. } => {
                AppErrorKind::External(ExternalError::PaymentProvider {
                    provider: provider.clone(),
                    user_message: err.user_message(),
                    is_retryable: err.is_retryable(),
                })
            }
            _ => AppErrorKind::External(ExternalError::PaymentProvider {
                provider: "unknown".to_string(),
                user_message: err.user_message(),
                is_retryable: err.is_retryable(),
            }),
        };
        AppError::new(kind)
    }
}

impl From<&DatabaseError> for AppError {
    fn from(err: &DatabaseError) -> Self {
        use crate::database::error::DatabaseErrorKind as DK;

        let kind = match &err.kind {
            DK::NotFound { entity, id } => AppErrorKind::Domain(DomainError::NotFound {
                entity: entity.clone(),
                id: id.clone(),
            }),
            DK::ConnectionError { message } => {
                AppErrorKind::Infrastructure(InfrastructureError::Persistence {
                    message: message.clone(),
                    is_retryable: true,
                })
            }
            _ => AppErrorKind::Infrastructure(InfrastructureError::Persistence {
                message: err.to_string(),
                is_retryable: false,
            }),
        };
        AppError::new(kind)
    }
}

pub type AppResult<T> = Result<T, AppError>;
