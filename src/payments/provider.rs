use crate::payments::error::PaymentResult;
use crate::payments::types::{
    PaymentMedium, ProcessorCredential, ProcessorRequest, ProcessorResponse, StatusQueryResponse,
};
use async_trait::async_trait;

/// One external payment integration, bound to a single medium.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    fn medium(&self) -> PaymentMedium;

    /// Charge the customer `request.amount`.
    async fn initiate_payment(
        &self,
        credential: &ProcessorCredential,
        request: ProcessorRequest,
    ) -> PaymentResult<ProcessorResponse>;

    /// Pay `request.amount` out to `request.phone`.
    async fn initiate_withdrawal(
        &self,
        credential: &ProcessorCredential,
        request: ProcessorRequest,
    ) -> PaymentResult<ProcessorResponse>;

    async fn query_status(&self, provider_tx_id: &str) -> PaymentResult<StatusQueryResponse>;
}
