use crate::domain::string_enum;
use crate::payments::types::{PaymentMedium, ProviderStatus};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Settlement,
    Refund,
}

string_enum!(TransactionType, "transaction type", {
    Deposit => "DEPOSIT",
    Withdrawal => "WITHDRAWAL",
    Settlement => "SETTLEMENT",
    Refund => "REFUND",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionSource {
    Direct,
    HostedCheckout,
    QrPayment,
    WithdrawalTip,
}

string_enum!(TransactionSource, "transaction source", {
    Direct => "DIRECT",
    HostedCheckout => "HOSTED_CHECKOUT",
    QrPayment => "QR_PAYMENT",
    WithdrawalTip => "WITHDRAWAL_TIP",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Initiated,
    Pending,
    Success,
    Failed,
    Refunded,
    Expired,
    Canceled,
}

string_enum!(TransactionStatus, "transaction status", {
    Initiated => "INITIATED",
    Pending => "PENDING",
    Success => "SUCCESS",
    Failed => "FAILED",
    Refunded => "REFUNDED",
    Expired => "EXPIRED",
    Canceled => "CANCELED",
});

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Success
                | TransactionStatus::Failed
                | TransactionStatus::Refunded
                | TransactionStatus::Expired
                | TransactionStatus::Canceled
        )
    }

    /// Lifecycle rule applied to every automated status write. SUCCESS is
    /// terminal for reconciliation but may still be refunded.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;

        if *self == next {
            return false;
        }
        match self {
            Initiated => true,
            Pending => matches!(next, Success | Failed | Expired | Canceled),
            Success => next == Refunded,
            Failed | Refunded | Expired | Canceled => false,
        }
    }

    /// `None` means the provider gave no usable information.
    pub fn from_provider(status: ProviderStatus) -> Option<TransactionStatus> {
        match status {
            ProviderStatus::Pending | ProviderStatus::Processing => Some(TransactionStatus::Pending),
            ProviderStatus::Success => Some(TransactionStatus::Success),
            ProviderStatus::Failed => Some(TransactionStatus::Failed),
            ProviderStatus::Cancelled => Some(TransactionStatus::Canceled),
            ProviderStatus::Reversed => Some(TransactionStatus::Refunded),
            ProviderStatus::Unknown => None,
        }
    }
}

/// Canonical ledger record. Monetary fields are fixed at creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub merchant_id: Uuid,
    pub r#type: TransactionType,
    pub medium: PaymentMedium,
    pub source: TransactionSource,
    pub status: TransactionStatus,
    pub currency: String,

    pub base_amount: BigDecimal,
    pub fee_amount: BigDecimal,
    pub vat_amount: BigDecimal,
    pub admin_net: BigDecimal,
    pub merchant_net: BigDecimal,
    pub customer_net: BigDecimal,
    pub total_amount: BigDecimal,
    pub merchant_pays_fee: bool,

    pub phone_number: Option<String>,
    pub description: Option<String>,
    pub reference: String,
    pub provider_tx_id: Option<String>,
    pub callback_url: Option<String>,
    pub success_url: Option<String>,
    pub failed_url: Option<String>,

    pub has_tip: bool,
    pub tip_amount: Option<BigDecimal>,
    pub tipee_phone: Option<String>,
    pub tip_medium: Option<PaymentMedium>,
    pub tip_transaction_id: Option<Uuid>,
    pub tip_processed: bool,

    pub comment: Option<String>,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// First eight hex characters of the id.
    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }

    /// Key used to re-query the provider. Legacy rows without a provider id
    /// fall back to our own id.
    pub fn status_query_key(&self) -> String {
        self.provider_tx_id
            .clone()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| self.id.to_string())
    }

    pub fn is_tip_payout(&self) -> bool {
        self.source == TransactionSource::WithdrawalTip
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    // ---------------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------------

    #[test]
    fn initiated_can_move_anywhere_else() {
        for next in [
            TransactionStatus::Pending,
            TransactionStatus::Success,
            TransactionStatus::Failed,
            TransactionStatus::Canceled,
        ] {
            assert!(TransactionStatus::Initiated.can_transition_to(next));
        }
        assert!(!TransactionStatus::Initiated.can_transition_to(TransactionStatus::Initiated));
    }

    #[test]
    fn pending_cannot_go_back_or_refund() {
        assert!(TransactionStatus::Pending.can_transition_to(TransactionStatus::Success));
        assert!(TransactionStatus::Pending.can_transition_to(TransactionStatus::Expired));
        assert!(!TransactionStatus::Pending.can_transition_to(TransactionStatus::Initiated));
        assert!(!TransactionStatus::Pending.can_transition_to(TransactionStatus::Refunded));
    }

    #[test]
    fn terminal_states_are_frozen_except_refund() {
        assert!(TransactionStatus::Success.can_transition_to(TransactionStatus::Refunded));
        assert!(!TransactionStatus::Success.can_transition_to(TransactionStatus::Failed));
        for terminal in [
            TransactionStatus::Failed,
            TransactionStatus::Refunded,
            TransactionStatus::Expired,
            TransactionStatus::Canceled,
        ] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(TransactionStatus::Success));
        }
        assert!(!TransactionStatus::Pending.is_terminal());
    }

    // ---------------------------------------------------------------------------
    // Provider mapping
    // ---------------------------------------------------------------------------

    #[test]
    fn provider_status_mapping() {
        assert_eq!(
            TransactionStatus::from_provider(ProviderStatus::Processing),
            Some(TransactionStatus::Pending)
        );
        assert_eq!(
            TransactionStatus::from_provider(ProviderStatus::Cancelled),
            Some(TransactionStatus::Canceled)
        );
        assert_eq!(
            TransactionStatus::from_provider(ProviderStatus::Reversed),
            Some(TransactionStatus::Refunded)
        );
        assert_eq!(TransactionStatus::from_provider(ProviderStatus::Unknown), None);
    }

    // ---------------------------------------------------------------------------
    // String forms
    // ---------------------------------------------------------------------------

    #[test]
    fn enums_round_trip_through_strings() {
        assert_eq!(
            TransactionSource::from_str("hosted_checkout").unwrap(),
            TransactionSource::HostedCheckout
        );
        assert_eq!(TransactionType::Withdrawal.to_string(), "WITHDRAWAL");
        assert!(TransactionStatus::from_str("DONE").is_err());
        assert_eq!(
            serde_json::to_value(TransactionSource::WithdrawalTip).unwrap(),
            serde_json::json!("WITHDRAWAL_TIP")
        );
    }
}
