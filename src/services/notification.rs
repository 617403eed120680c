use crate::config::WebhookConfig;
use crate::domain::{Transaction, TransactionStatus};
use crate::payments::utils::sign_hmac_sha256_hex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

pub const SIGNATURE_HEADER: &str = "X-Signature";

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("failed to build merchant notification client: {0}")]
    Client(String),

    #[error("failed to encode merchant notification: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("merchant endpoint unreachable: {0}")]
    Delivery(String),

    #[error("merchant endpoint answered HTTP {status}")]
    Rejected { status: u16 },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NotificationType {
    #[serde(rename = "transaction.status_changed")]
    TransactionStatusChanged,
}

/// Body POSTed to a merchant's callback URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerchantNotification {
    pub event: NotificationType,
    pub transaction_id: Uuid,
    pub reference: String,
    pub status: TransactionStatus,
    pub previous_status: TransactionStatus,
    pub provider_tx_id: Option<String>,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl MerchantNotification {
    pub fn status_changed(
        transaction: &Transaction,
        previous_status: TransactionStatus,
        message: Option<String>,
    ) -> Self {
        Self {
            event: NotificationType::TransactionStatusChanged,
            transaction_id: transaction.id,
            reference: transaction.reference.clone(),
            status: transaction.status,
            previous_status,
            provider_tx_id: transaction.provider_tx_id.clone(),
            message,
            timestamp: Utc::now(),
        }
    }
}

/// Signed JSON callbacks to merchants.
pub struct MerchantNotifier {
    client: reqwest::Client,
    secret: Option<String>,
}

impl MerchantNotifier {
    pub fn new(config: &WebhookConfig) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| NotificationError::Client(e.to_string()))?;
        Ok(Self {
            client,
            secret: config.secret.clone(),
        })
    }

    /// Hex HMAC-SHA256 of the raw body, or `None` when no secret is configured.
    pub fn signature(&self, body: &[u8]) -> Option<String> {
        self.secret
            .as_deref()
            .map(|secret| sign_hmac_sha256_hex(body, secret))
    }

    pub async fn notify(
        &self,
        callback_url: &str,
        notification: &MerchantNotification,
    ) -> Result<(), NotificationError> {
        let body = serde_json::to_vec(notification)?;
        let mut request = self
            .client
            .post(callback_url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        match self.signature(&body) {
            Some(signature) => request = request.header(SIGNATURE_HEADER, signature),
            None => warn!(
                transaction_id = %notification.transaction_id,
                "merchant webhook secret not configured, sending unsigned notification"
            ),
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| NotificationError::Delivery(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotificationError::Rejected {
                status: status.as_u16(),
            });
        }

        info!(
            transaction_id = %notification.transaction_id,
            status = %notification.status,
            "merchant notified"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn notifier(secret: Option<&str>) -> MerchantNotifier {
        MerchantNotifier::new(&WebhookConfig {
            secret: secret.map(|s| s.to_string()),
            timeout: Duration::from_secs(1),
        })
        .unwrap()
    }

    #[test]
    fn signature_is_hmac_of_body() {
        let body = br#"{"event":"transaction.status_changed"}"#;
        let signature = notifier(Some("whsec")).signature(body).unwrap();
        assert_eq!(signature, sign_hmac_sha256_hex(body, "whsec"));
        assert_eq!(signature.len(), 64);
    }

    #[test]
    fn no_secret_means_no_signature() {
        assert!(notifier(None).signature(b"{}").is_none());
    }

    #[test]
    fn event_name_is_dotted() {
        let json = serde_json::to_value(NotificationType::TransactionStatusChanged).unwrap();
        assert_eq!(json, "transaction.status_changed");
    }
}
