//! Resolves every monetary field of a new transaction.
//!
//! The only I/O is the commission lookup; given the same request and rate the
//! output amounts are identical.

use crate::domain::{Transaction, TransactionSource, TransactionStatus, TransactionType};
use crate::payments::types::PaymentMedium;
use crate::services::commission::{CommissionCalculator, CommissionResult};
use crate::services::error::{OrchestratorError, OrchestratorResult};
use bigdecimal::BigDecimal;
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTransactionRequest {
    pub user_id: Uuid,
    pub merchant_id: Uuid,
    pub base_amount: BigDecimal,
    pub currency: String,
    pub medium: PaymentMedium,
    pub r#type: TransactionType,
    pub source: TransactionSource,
    pub merchant_pays_fee: bool,
    pub phone_number: Option<String>,
    pub reference: String,
    pub description: Option<String>,
    pub callback_url: Option<String>,
    pub success_url: Option<String>,
    pub failed_url: Option<String>,
    pub tip_amount: Option<BigDecimal>,
    pub tipee_phone: Option<String>,
    pub tip_medium: Option<PaymentMedium>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTransactionResponse {
    pub transaction: Transaction,
    pub commission: CommissionResult,
}

/// Monetary split for one transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct AmountBreakdown {
    pub fee_amount: BigDecimal,
    pub vat_amount: BigDecimal,
    pub admin_net: BigDecimal,
    pub merchant_net: BigDecimal,
    pub customer_net: BigDecimal,
    pub total_amount: BigDecimal,
}

fn vat_on(fee: &BigDecimal) -> BigDecimal {
    fee * BigDecimal::from(15) / BigDecimal::from(100)
}

/// Pure fee arithmetic. `tip` is zero when there is no tip.
pub fn compute_amounts(
    base: &BigDecimal,
    commission: &CommissionResult,
    transaction_type: TransactionType,
    merchant_pays_fee: bool,
    tip: &BigDecimal,
) -> OrchestratorResult<AmountBreakdown> {
    let fee_amount = base * &commission.percent / BigDecimal::from(100) + &commission.cent;
    let vat_amount = vat_on(&fee_amount);
    // VAT is a pass-through liability; platform revenue is the fee alone.
    let admin_net = fee_amount.clone();

    let (total_amount, customer_net, merchant_net) = match (transaction_type, merchant_pays_fee) {
        (TransactionType::Deposit, false) => {
            let total = base + &fee_amount + &vat_amount + tip;
            (total.clone(), total, base.clone())
        }
        (TransactionType::Deposit, true) => {
            let total = base + tip + &fee_amount + &vat_amount;
            (total, base.clone(), base - &fee_amount - &vat_amount)
        }
        (TransactionType::Withdrawal, true) => {
            let total = base + &fee_amount + &vat_amount;
            (total.clone(), base.clone(), total)
        }
        (TransactionType::Withdrawal, false) => {
            let total = base + &vat_amount + &fee_amount;
            (total, base - &fee_amount - &vat_amount, base.clone())
        }
        (other, _) => {
            return Err(OrchestratorError::validation(
                format!("unsupported transaction type: {}", other),
                Some("type"),
            ))
        }
    };

    Ok(AmountBreakdown {
        fee_amount,
        vat_amount,
        admin_net,
        merchant_net,
        customer_net,
        total_amount,
    })
}

pub struct TransactionCreationService {
    commission: Arc<dyn CommissionCalculator>,
    tipee_phone: Regex,
}

impl TransactionCreationService {
    pub fn new(commission: Arc<dyn CommissionCalculator>, tipee_phone: Regex) -> Self {
        Self {
            commission,
            tipee_phone,
        }
    }

    pub async fn create_transaction(
        &self,
        request: CreateTransactionRequest,
    ) -> OrchestratorResult<CreateTransactionResponse> {
        let zero = BigDecimal::from(0);
        if request.base_amount <= zero {
            return Err(OrchestratorError::validation(
                "amount must be greater than zero",
                Some("amount"),
            ));
        }
        if request.reference.trim().is_empty() {
            return Err(OrchestratorError::validation(
                "reference is required",
                Some("reference"),
            ));
        }

        let commission = self
            .commission
            .calculate_commission(&request.base_amount, request.merchant_id)
            .await?;

        let tip = self.validate_tip(&request)?;
        let tip_value = tip
            .as_ref()
            .map(|(amount, _, _)| amount.clone())
            .unwrap_or_else(|| zero.clone());

        let amounts = compute_amounts(
            &request.base_amount,
            &commission,
            request.r#type,
            request.merchant_pays_fee,
            &tip_value,
        )?;
        if amounts.customer_net <= zero || amounts.merchant_net <= zero {
            return Err(OrchestratorError::validation(
                "amount is too small to cover fees",
                Some("amount"),
            ));
        }

        let now = Utc::now();
        let (tip_amount, tipee_phone, tip_medium) = match tip {
            Some((amount, phone, medium)) => (Some(amount), Some(phone), Some(medium)),
            None => (None, None, None),
        };
        let transaction = Transaction {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            merchant_id: request.merchant_id,
            r#type: request.r#type,
            medium: request.medium,
            source: request.source,
            status: TransactionStatus::Initiated,
            currency: request.currency,
            base_amount: request.base_amount,
            fee_amount: amounts.fee_amount,
            vat_amount: amounts.vat_amount,
            admin_net: amounts.admin_net,
            merchant_net: amounts.merchant_net,
            customer_net: amounts.customer_net,
            total_amount: amounts.total_amount,
            merchant_pays_fee: request.merchant_pays_fee,
            phone_number: request.phone_number,
            description: request.description,
            reference: request.reference,
            provider_tx_id: None,
            callback_url: request.callback_url,
            success_url: request.success_url,
            failed_url: request.failed_url,
            has_tip: tip_amount.is_some(),
            tip_amount,
            tipee_phone,
            tip_medium,
            tip_transaction_id: None,
            tip_processed: false,
            comment: None,
            metadata: serde_json::json!({ "commission": &commission }),
            created_at: now,
            updated_at: now,
        };

        debug!(
            transaction_id = %transaction.id,
            merchant_id = %transaction.merchant_id,
            tx_type = %transaction.r#type,
            total_amount = %transaction.total_amount,
            "transaction amounts resolved"
        );

        Ok(CreateTransactionResponse {
            transaction,
            commission,
        })
    }

    fn validate_tip(
        &self,
        request: &CreateTransactionRequest,
    ) -> OrchestratorResult<Option<(BigDecimal, String, PaymentMedium)>> {
        let zero = BigDecimal::from(0);
        let amount = match &request.tip_amount {
            Some(amount) if *amount > zero => amount.clone(),
            Some(amount) if *amount < zero => {
                return Err(OrchestratorError::validation(
                    "tip amount cannot be negative",
                    Some("tipAmount"),
                ))
            }
            _ => return Ok(None),
        };

        if request.r#type != TransactionType::Deposit {
            return Err(OrchestratorError::validation(
                "tips are only accepted on deposits",
                Some("tipAmount"),
            ));
        }
        let phone = request
            .tipee_phone
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                OrchestratorError::validation("tipee phone is required with a tip", Some("tipeePhone"))
            })?;
        let medium = request.tip_medium.ok_or_else(|| {
            OrchestratorError::validation("tip medium is required with a tip", Some("tipMedium"))
        })?;
        if !self.tipee_phone.is_match(phone) {
            return Err(OrchestratorError::validation(
                "tipee phone number is not valid",
                Some("tipeePhone"),
            ));
        }

        Ok(Some((amount, phone.to_string(), medium)))
    }
}
