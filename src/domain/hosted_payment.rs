use crate::domain::string_enum;
use crate::payments::types::PaymentMedium;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostedPaymentStatus {
    Pending,
    Completed,
    Expired,
    Canceled,
}

string_enum!(HostedPaymentStatus, "hosted payment status", {
    Pending => "PENDING",
    Completed => "COMPLETED",
    Expired => "EXPIRED",
    Canceled => "CANCELED",
});

/// A merchant-created checkout session. It is a template for a transaction,
/// not a ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostedPayment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub merchant_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub description: Option<String>,
    pub reference: String,
    pub supported_mediums: Vec<PaymentMedium>,
    pub merchant_pays_fee: bool,
    pub accept_tip: bool,
    pub callback_url: Option<String>,
    pub success_url: Option<String>,
    pub failed_url: Option<String>,
    pub status: HostedPaymentStatus,
    pub expires_at: DateTime<Utc>,
    pub transaction_id: Option<Uuid>,
    pub selected_medium: Option<PaymentMedium>,
    pub selected_phone_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HostedPayment {
    /// Expiry is derived from the clock, not from the stored status.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn supports(&self, medium: PaymentMedium) -> bool {
        self.supported_mediums.contains(&medium)
    }
}
