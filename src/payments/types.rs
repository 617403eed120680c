use crate::payments::error::PaymentError;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

/// External payment channel a transaction is routed through.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMedium {
    Telebirr,
    Mpesa,
    CbeBirr,
    Kacha,
    Card,
}

impl PaymentMedium {
    pub const ALL: [PaymentMedium; 5] = [
        PaymentMedium::Telebirr,
        PaymentMedium::Mpesa,
        PaymentMedium::CbeBirr,
        PaymentMedium::Kacha,
        PaymentMedium::Card,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMedium::Telebirr => "TELEBIRR",
            PaymentMedium::Mpesa => "MPESA",
            PaymentMedium::CbeBirr => "CBE_BIRR",
            PaymentMedium::Kacha => "KACHA",
            PaymentMedium::Card => "CARD",
        }
    }
}

impl std::fmt::Display for PaymentMedium {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentMedium {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().replace('-', "_").as_str() {
            "TELEBIRR" => Ok(PaymentMedium::Telebirr),
            "MPESA" | "M_PESA" => Ok(PaymentMedium::Mpesa),
            "CBE_BIRR" | "CBEBIRR" => Ok(PaymentMedium::CbeBirr),
            "KACHA" => Ok(PaymentMedium::Kacha),
            "CARD" => Ok(PaymentMedium::Card),
            _ => Err(PaymentError::UnsupportedMedium {
                medium: value.to_string(),
            }),
        }
    }
}

/// Status as reported by an external processor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Cancelled,
    Reversed,
    Unknown,
}

/// Opaque caller credential handed to processors alongside each initiation.
#[derive(Clone)]
pub struct ProcessorCredential {
    api_key: String,
}

impl ProcessorCredential {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }

    /// SHA-256 fingerprint of the key; the raw key never leaves the process.
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};
        hex::encode(Sha256::digest(self.api_key.as_bytes()))
    }
}

impl std::fmt::Debug for ProcessorCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorCredential")
            .field("api_key", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorRequest {
    pub transaction_id: String,
    #[serde(with = "crate::domain::decimal_string")]
    pub amount: BigDecimal,
    pub currency: String,
    pub phone: Option<String>,
    pub reference: String,
    pub description: Option<String>,
    pub callback_url: Option<String>,
    pub success_url: Option<String>,
    pub failed_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorResponse {
    pub success: bool,
    pub status: ProviderStatus,
    pub message: Option<String>,
    pub payment_url: Option<String>,
    pub processor_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusQueryResponse {
    pub status: ProviderStatus,
    pub provider_tx_id: Option<String>,
    pub provider_data: Option<JsonValue>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn medium_parsing_accepts_aliases() {
        assert_eq!(
            PaymentMedium::from_str("m-pesa").unwrap(),
            PaymentMedium::Mpesa
        );
        assert_eq!(
            PaymentMedium::from_str(" cbebirr ").unwrap(),
            PaymentMedium::CbeBirr
        );
        assert!(matches!(
            PaymentMedium::from_str("paypal"),
            Err(PaymentError::UnsupportedMedium { .. })
        ));
    }

    #[test]
    fn medium_serializes_screaming_snake() {
        let json = serde_json::to_value(PaymentMedium::CbeBirr).unwrap();
        assert_eq!(json, serde_json::json!("CBE_BIRR"));
    }

    #[test]
    fn credential_debug_hides_key() {
        let credential = ProcessorCredential::new("sk_live_secret");
        let debug = format!("{:?}", credential);
        assert!(!debug.contains("sk_live_secret"));
        assert_eq!(credential.fingerprint().len(), 64);
    }

    #[test]
    fn status_query_response_deserializes_from_json() {
        let payload = serde_json::json!({
            "status": "SUCCESS",
            "provider_tx_id": "P1",
            "provider_data": {"channel": "ussd"}
        });
        let parsed: StatusQueryResponse =
            serde_json::from_value(payload).expect("deserialization should succeed");
        assert_eq!(parsed.status, ProviderStatus::Success);
        assert_eq!(parsed.provider_tx_id.as_deref(), Some("P1"));
    }
}
