use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProcessor;
use crate::payments::types::{
    PaymentMedium, ProcessorCredential, ProcessorRequest, ProcessorResponse, ProviderStatus,
    StatusQueryResponse,
};
use async_trait::async_trait;

/// Phone numbers ending in this suffix are declined, so failure paths can be
/// exercised locally.
pub const SANDBOX_DECLINE_SUFFIX: &str = "0000";

/// In-process processor used with `PAYMENT_SANDBOX=true` or `SKIP_EXTERNALS=true`.
///
/// Payments come back PENDING with a checkout URL, withdrawals come back
/// PROCESSING, and every status query reports SUCCESS.
pub struct SandboxProcessor {
    medium: PaymentMedium,
}

impl SandboxProcessor {
    pub fn new(medium: PaymentMedium) -> Self {
        Self { medium }
    }

    fn processor_ref(&self, request: &ProcessorRequest) -> String {
        format!("SBX-{}-{}", self.medium.as_str(), request.transaction_id)
    }

    fn is_declined(request: &ProcessorRequest) -> bool {
        request
            .phone
            .as_deref()
            .map(|p| p.ends_with(SANDBOX_DECLINE_SUFFIX))
            .unwrap_or(false)
    }
}

#[async_trait]
impl PaymentProcessor for SandboxProcessor {
    fn medium(&self) -> PaymentMedium {
        self.medium
    }

    async fn initiate_payment(
        &self,
        _credential: &ProcessorCredential,
        request: ProcessorRequest,
    ) -> PaymentResult<ProcessorResponse> {
        if Self::is_declined(&request) {
            return Err(PaymentError::PaymentDeclinedError {
                message: "sandbox decline".to_string(),
                provider_code: Some("SBX_DECLINED".to_string()),
            });
        }
        Ok(ProcessorResponse {
            success: true,
            status: ProviderStatus::Pending,
            message: Some("sandbox payment created".to_string()),
            payment_url: Some(format!(
                "https://sandbox.payhub.local/{}/pay/{}",
                self.medium.as_str().to_lowercase(),
                request.transaction_id
            )),
            processor_ref: Some(self.processor_ref(&request)),
        })
    }

    async fn initiate_withdrawal(
        &self,
        _credential: &ProcessorCredential,
        request: ProcessorRequest,
    ) -> PaymentResult<ProcessorResponse> {
        if Self::is_declined(&request) {
            return Err(PaymentError::PaymentDeclinedError {
                message: "sandbox decline".to_string(),
                provider_code: Some("SBX_DECLINED".to_string()),
            });
        }
        Ok(ProcessorResponse {
            success: true,
            status: ProviderStatus::Processing,
            message: Some("sandbox payout queued".to_string()),
            payment_url: None,
            processor_ref: Some(self.processor_ref(&request)),
        })
    }

    async fn query_status(&self, provider_tx_id: &str) -> PaymentResult<StatusQueryResponse> {
        Ok(StatusQueryResponse {
            status: ProviderStatus::Success,
            provider_tx_id: Some(provider_tx_id.to_string()),
            provider_data: Some(serde_json::json!({ "sandbox": true })),
        })
    }
}
