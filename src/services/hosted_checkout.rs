//! Hosted checkout sessions: `PENDING -> {COMPLETED, EXPIRED, CANCELED}`.
//!
//! Expiry is evaluated on every read, update and consumption by comparing the
//! clock with `expires_at`; nothing sweeps sessions in the background. The
//! conditional `complete` write is the only serialization point between two
//! payers racing for the same session.

use crate::domain::{
    HostedPayment, HostedPaymentStatus, Transaction, TransactionSource, TransactionType,
};
use crate::payments::types::PaymentMedium;
use crate::services::error::{OrchestratorError, OrchestratorResult};
use crate::services::payment_orchestrator::{
    accepted, call_with_deadline, processor_request, PaymentOrchestrator, PaymentResponse,
    RequestContext,
};
use crate::services::transaction_creation::CreateTransactionRequest;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use url::Url;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateHostedCheckoutRequest {
    pub amount: BigDecimal,
    pub currency: Option<String>,
    pub description: Option<String>,
    pub reference: String,
    pub supported_mediums: Vec<PaymentMedium>,
    #[serde(default)]
    pub merchant_pays_fee: bool,
    #[serde(default)]
    pub accept_tip: bool,
    pub callback_url: Option<String>,
    pub success_url: Option<String>,
    pub failed_url: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Omitted fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateHostedCheckoutRequest {
    pub amount: Option<BigDecimal>,
    pub description: Option<String>,
    pub supported_mediums: Option<Vec<PaymentMedium>>,
    pub merchant_pays_fee: Option<bool>,
    pub accept_tip: Option<bool>,
    pub callback_url: Option<String>,
    pub success_url: Option<String>,
    pub failed_url: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl UpdateHostedCheckoutRequest {
    fn is_empty(&self) -> bool {
        self.amount.is_none()
            && self.description.is_none()
            && self.supported_mediums.is_none()
            && self.merchant_pays_fee.is_none()
            && self.accept_tip.is_none()
            && self.callback_url.is_none()
            && self.success_url.is_none()
            && self.failed_url.is_none()
            && self.expires_at.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostedCheckoutResponse {
    pub id: Uuid,
    pub checkout_url: String,
    pub reference: String,
    pub status: HostedPaymentStatus,
    pub expires_at: DateTime<Utc>,
}

/// The payer's choices when paying a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutPaymentRequest {
    pub medium: PaymentMedium,
    pub phone_number: Option<String>,
    pub tip_amount: Option<BigDecimal>,
    pub tipee_phone: Option<String>,
    pub tip_medium: Option<PaymentMedium>,
}

/// Time first, then status: a stale PENDING row past its deadline is expired.
fn ensure_consumable(session: &HostedPayment, now: DateTime<Utc>) -> OrchestratorResult<()> {
    if session.is_expired_at(now) {
        return Err(OrchestratorError::CheckoutExpired {
            checkout_id: session.id.to_string(),
        });
    }
    if session.status != HostedPaymentStatus::Pending {
        return Err(OrchestratorError::CheckoutUnavailable {
            checkout_id: session.id.to_string(),
        });
    }
    Ok(())
}

fn checkout_not_found(id: Uuid) -> OrchestratorError {
    OrchestratorError::NotFound {
        entity: "hosted checkout",
        id: id.to_string(),
    }
}

impl PaymentOrchestrator {
    pub async fn create_hosted_checkout(
        &self,
        ctx: &RequestContext,
        request: CreateHostedCheckoutRequest,
    ) -> OrchestratorResult<HostedCheckoutResponse> {
        if request.amount <= BigDecimal::from(0) {
            return Err(OrchestratorError::validation(
                "amount must be greater than zero",
                Some("amount"),
            ));
        }
        let supported_mediums = self.validate_mediums(&request.supported_mediums)?;
        let now = Utc::now();
        let expires_at = match request.expires_at {
            Some(at) if at <= now => {
                return Err(OrchestratorError::validation(
                    "expiresAt must be in the future",
                    Some("expiresAt"),
                ))
            }
            Some(at) => at,
            None => now + ChronoDuration::minutes(self.config.checkout.default_ttl_minutes),
        };
        self.ensure_reference_available(ctx.merchant_id, &request.reference)
            .await?;

        let session = HostedPayment {
            id: Uuid::new_v4(),
            user_id: ctx.user_id,
            merchant_id: ctx.merchant_id,
            amount: request.amount,
            currency: self.currency_or_default(request.currency),
            description: request.description,
            reference: request.reference,
            supported_mediums,
            merchant_pays_fee: request.merchant_pays_fee,
            accept_tip: request.accept_tip,
            callback_url: request.callback_url,
            success_url: request.success_url,
            failed_url: request.failed_url,
            status: HostedPaymentStatus::Pending,
            expires_at,
            transaction_id: None,
            selected_medium: None,
            selected_phone_number: None,
            created_at: now,
            updated_at: now,
        };
        let checkout_url = self.checkout_url(session.id)?;
        let session = self
            .hosted_payments
            .insert(&session)
            .await
            .map_err(|e| OrchestratorError::from_insert(e, &session.reference))?;

        info!(
            checkout_id = %session.id,
            merchant_id = %session.merchant_id,
            amount = %session.amount,
            expires_at = %session.expires_at,
            "Hosted checkout created"
        );

        Ok(HostedCheckoutResponse {
            id: session.id,
            checkout_url,
            reference: session.reference,
            status: session.status,
            expires_at: session.expires_at,
        })
    }

    pub async fn update_hosted_checkout(
        &self,
        merchant_id: Uuid,
        checkout_id: Uuid,
        request: UpdateHostedCheckoutRequest,
    ) -> OrchestratorResult<HostedPayment> {
        if request.is_empty() {
            return Err(OrchestratorError::validation("no fields provided", None));
        }
        let mut session = self.find_owned_session(merchant_id, checkout_id).await?;
        let now = Utc::now();
        ensure_consumable(&session, now)?;

        if let Some(amount) = request.amount {
            if amount <= BigDecimal::from(0) {
                return Err(OrchestratorError::validation(
                    "amount must be greater than zero",
                    Some("amount"),
                ));
            }
            session.amount = amount;
        }
        if let Some(mediums) = request.supported_mediums {
            session.supported_mediums = self.validate_mediums(&mediums)?;
        }
        if let Some(expires_at) = request.expires_at {
            if expires_at <= now {
                return Err(OrchestratorError::validation(
                    "expiresAt must be in the future",
                    Some("expiresAt"),
                ));
            }
            session.expires_at = expires_at;
        }
        if let Some(description) = request.description {
            session.description = Some(description);
        }
        if let Some(merchant_pays_fee) = request.merchant_pays_fee {
            session.merchant_pays_fee = merchant_pays_fee;
        }
        if let Some(accept_tip) = request.accept_tip {
            session.accept_tip = accept_tip;
        }
        if let Some(url) = request.callback_url {
            session.callback_url = Some(url);
        }
        if let Some(url) = request.success_url {
            session.success_url = Some(url);
        }
        if let Some(url) = request.failed_url {
            session.failed_url = Some(url);
        }

        let updated = self
            .hosted_payments
            .update_pending(&session)
            .await?
            .ok_or_else(|| OrchestratorError::CheckoutUnavailable {
                checkout_id: checkout_id.to_string(),
            })?;
        info!(checkout_id = %checkout_id, merchant_id = %merchant_id, "Hosted checkout updated");
        Ok(updated)
    }

    pub async fn cancel_hosted_checkout(
        &self,
        merchant_id: Uuid,
        checkout_id: Uuid,
    ) -> OrchestratorResult<()> {
        let session = self.find_owned_session(merchant_id, checkout_id).await?;
        ensure_consumable(&session, Utc::now())?;
        if !self.hosted_payments.cancel(checkout_id).await? {
            return Err(OrchestratorError::CheckoutUnavailable {
                checkout_id: checkout_id.to_string(),
            });
        }
        info!(checkout_id = %checkout_id, merchant_id = %merchant_id, "Hosted checkout canceled");
        Ok(())
    }

    /// Payer-facing read.
    pub async fn get_hosted_checkout(&self, checkout_id: Uuid) -> OrchestratorResult<HostedPayment> {
        let session = self
            .hosted_payments
            .find_by_id(checkout_id)
            .await?
            .ok_or_else(|| checkout_not_found(checkout_id))?;
        ensure_consumable(&session, Utc::now())?;
        Ok(session)
    }

    pub async fn get_hosted_checkout_with_merchant(
        &self,
        merchant_id: Uuid,
        checkout_id: Uuid,
    ) -> OrchestratorResult<HostedPayment> {
        let session = self.find_owned_session(merchant_id, checkout_id).await?;
        ensure_consumable(&session, Utc::now())?;
        Ok(session)
    }

    /// Consume a session. The price, fee payer and description come from the
    /// session; the payer only chooses the medium, phone and optional tip.
    pub async fn process_checkout_payment(
        &self,
        ctx: &RequestContext,
        checkout_id: Uuid,
        request: CheckoutPaymentRequest,
    ) -> OrchestratorResult<PaymentResponse> {
        let session = self
            .get_hosted_checkout_with_merchant(ctx.merchant_id, checkout_id)
            .await?;
        if !session.supports(request.medium) {
            return Err(OrchestratorError::validation(
                format!(
                    "Payment medium '{}' is not accepted by this checkout",
                    request.medium
                ),
                Some("medium"),
            ));
        }
        let tipping = request
            .tip_amount
            .as_ref()
            .is_some_and(|tip| *tip > BigDecimal::from(0));
        if tipping && !session.accept_tip {
            return Err(OrchestratorError::validation(
                "this checkout does not accept tips",
                Some("tipAmount"),
            ));
        }
        let processor = self.processors.get(request.medium)?;

        let created = self
            .creation
            .create_transaction(CreateTransactionRequest {
                user_id: session.user_id,
                merchant_id: session.merchant_id,
                base_amount: session.amount.clone(),
                currency: session.currency.clone(),
                medium: request.medium,
                r#type: TransactionType::Deposit,
                source: TransactionSource::HostedCheckout,
                merchant_pays_fee: session.merchant_pays_fee,
                phone_number: request.phone_number.clone(),
                reference: session.reference.clone(),
                description: session.description.clone(),
                callback_url: session.callback_url.clone(),
                success_url: session.success_url.clone(),
                failed_url: session.failed_url.clone(),
                tip_amount: request.tip_amount,
                tipee_phone: request.tipee_phone,
                tip_medium: request.tip_medium,
            })
            .await?;
        let mut pending = created.transaction;
        // One session may be attempted with several mediums.
        pending.reference = format!("{}-{}", session.reference, pending.short_id());
        pending.metadata["checkout_id"] = serde_json::json!(session.id);

        let transaction = self.persist_new(&pending).await?;
        info!(
            transaction_id = %transaction.id,
            checkout_id = %session.id,
            medium = %transaction.medium,
            total_amount = %transaction.total_amount,
            "Checkout payment persisted"
        );

        let outcome = call_with_deadline(
            self.deadline(ctx),
            processor.initiate_payment(
                &ctx.credential(),
                processor_request(&transaction, &transaction.customer_net),
            ),
        )
        .await
        .and_then(accepted);

        let response = match outcome {
            Ok(response) => response,
            Err(err) => {
                // The session stays PENDING so the payer can retry.
                self.mark_failed(&transaction, &err).await;
                return Err(err.into());
            }
        };
        let transaction = self.record_provider_outcome(transaction, &response).await?;

        let linked = self
            .hosted_payments
            .complete(
                session.id,
                transaction.id,
                request.medium,
                request.phone_number.as_deref(),
            )
            .await?;
        if !linked {
            self.flag_orphaned_payment(&session, &transaction).await;
            return Err(OrchestratorError::CheckoutUnavailable {
                checkout_id: session.id.to_string(),
            });
        }

        info!(
            checkout_id = %session.id,
            transaction_id = %transaction.id,
            status = %transaction.status,
            "Hosted checkout completed"
        );
        self.credit_if_settled(&transaction).await;
        Ok(PaymentResponse::from_transaction(&transaction, &response))
    }

    /// The provider already accepted this charge, so its status is kept: a
    /// PENDING row stays in the reconciliation sweep and a settled one is
    /// credited like any other deposit. The row is marked for refund instead.
    async fn flag_orphaned_payment(&self, session: &HostedPayment, transaction: &Transaction) {
        error!(
            checkout_id = %session.id,
            transaction_id = %transaction.id,
            status = %transaction.status,
            provider_tx_id = ?transaction.provider_tx_id,
            refund_required = true,
            "Checkout consumed concurrently; accepted payment left without a session"
        );
        let marker = serde_json::json!({
            "orphaned_checkout": {
                "checkout_id": session.id,
                "refund_required": true,
                "provider_status": transaction.status,
                "flagged_at": Utc::now(),
            }
        });
        if let Err(e) = self.transactions.merge_metadata(transaction.id, marker).await {
            error!(transaction_id = %transaction.id, error = %e, "Failed to flag orphaned checkout payment");
        }
        self.credit_if_settled(transaction).await;
    }

    async fn find_owned_session(
        &self,
        merchant_id: Uuid,
        checkout_id: Uuid,
    ) -> OrchestratorResult<HostedPayment> {
        self.hosted_payments
            .find_by_id(checkout_id)
            .await?
            .filter(|s| s.merchant_id == merchant_id)
            .ok_or_else(|| checkout_not_found(checkout_id))
    }

    fn validate_mediums(&self, mediums: &[PaymentMedium]) -> OrchestratorResult<Vec<PaymentMedium>> {
        if mediums.is_empty() {
            return Err(OrchestratorError::validation(
                "at least one payment medium is required",
                Some("supportedMediums"),
            ));
        }
        let mut unique = Vec::with_capacity(mediums.len());
        for medium in mediums {
            if !self.processors.contains(*medium) {
                return Err(OrchestratorError::validation(
                    format!("Payment medium '{}' is not supported", medium),
                    Some("supportedMediums"),
                ));
            }
            if !unique.contains(medium) {
                unique.push(*medium);
            }
        }
        Ok(unique)
    }

    fn checkout_url(&self, checkout_id: Uuid) -> OrchestratorResult<String> {
        let mut base = self.config.checkout.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        Url::parse(&base)
            .and_then(|url| url.join(&checkout_id.to_string()))
            .map(|url| url.to_string())
            .map_err(|e| OrchestratorError::Internal {
                message: format!("invalid checkout base url: {}", e),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(expires_in: ChronoDuration, status: HostedPaymentStatus) -> HostedPayment {
        let now = Utc::now();
        HostedPayment {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            merchant_id: Uuid::new_v4(),
            amount: BigDecimal::from(100),
            currency: "ETB".to_string(),
            description: None,
            reference: "INV-1".to_string(),
            supported_mediums: vec![PaymentMedium::Telebirr],
            merchant_pays_fee: false,
            accept_tip: false,
            callback_url: None,
            success_url: None,
            failed_url: None,
            status,
            expires_at: now + expires_in,
            transaction_id: None,
            selected_medium: None,
            selected_phone_number: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn expiry_wins_over_terminal_status() {
        let s = session(ChronoDuration::minutes(-1), HostedPaymentStatus::Completed);
        assert!(matches!(
            ensure_consumable(&s, Utc::now()),
            Err(OrchestratorError::CheckoutExpired { .. })
        ));
    }

    #[test]
    fn completed_session_is_unavailable() {
        let s = session(ChronoDuration::minutes(10), HostedPaymentStatus::Completed);
        assert!(matches!(
            ensure_consumable(&s, Utc::now()),
            Err(OrchestratorError::CheckoutUnavailable { .. })
        ));
        let s = session(ChronoDuration::minutes(10), HostedPaymentStatus::Pending);
        assert!(ensure_consumable(&s, Utc::now()).is_ok());
    }

    #[test]
    fn empty_update_is_detected() {
        assert!(UpdateHostedCheckoutRequest::default().is_empty());
        let request = UpdateHostedCheckoutRequest {
            accept_tip: Some(true),
            ..Default::default()
        };
        assert!(!request.is_empty());
    }
}
