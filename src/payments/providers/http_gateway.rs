use crate::config::GatewayConfig;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProcessor;
use crate::payments::types::{
    PaymentMedium, ProcessorCredential, ProcessorRequest, ProcessorResponse, ProviderStatus,
    StatusQueryResponse,
};
use crate::payments::utils::PaymentHttpClient;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::info;

/// Neutral JSON adapter for an aggregator gateway fronting one medium.
pub struct HttpGatewayProcessor {
    medium: PaymentMedium,
    config: GatewayConfig,
    http: PaymentHttpClient,
}

#[derive(Debug, Deserialize)]
struct GatewayEnvelope<T> {
    status: bool,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct GatewayInitiateData {
    status: String,
    #[serde(default)]
    reference: Option<String>,
    #[serde(default)]
    checkout_url: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GatewayStatusData {
    status: String,
    #[serde(default)]
    reference: Option<String>,
    #[serde(default)]
    details: Option<JsonValue>,
}

impl HttpGatewayProcessor {
    pub fn new(medium: PaymentMedium, config: GatewayConfig, http: PaymentHttpClient) -> Self {
        Self {
            medium,
            config,
            http,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn map_status(raw: &str) -> ProviderStatus {
        match raw.to_ascii_lowercase().as_str() {
            "pending" | "initiated" => ProviderStatus::Pending,
            "processing" | "in_progress" => ProviderStatus::Processing,
            "success" | "successful" | "completed" => ProviderStatus::Success,
            "failed" | "declined" | "error" => ProviderStatus::Failed,
            "cancelled" | "canceled" | "abandoned" => ProviderStatus::Cancelled,
            "reversed" | "refunded" => ProviderStatus::Reversed,
            _ => ProviderStatus::Unknown,
        }
    }

    fn envelope_error(&self, message: Option<String>) -> PaymentError {
        PaymentError::ProviderError {
            provider: self.medium.to_string(),
            message: message.unwrap_or_else(|| "gateway rejected the request".to_string()),
            provider_code: None,
            retryable: false,
        }
    }

    async fn initiate(
        &self,
        path: &str,
        credential: &ProcessorCredential,
        request: ProcessorRequest,
    ) -> PaymentResult<ProcessorResponse> {
        let payload = serde_json::json!({
            "medium": self.medium,
            "transaction_id": request.transaction_id,
            "amount": request.amount.to_string(),
            "currency": request.currency,
            "phone": request.phone,
            "reference": request.reference,
            "description": request.description,
            "callback_url": request.callback_url,
            "success_url": request.success_url,
            "failed_url": request.failed_url,
        });
        let fingerprint = credential.fingerprint();

        let raw: GatewayEnvelope<GatewayInitiateData> = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint(path),
                Some(&self.config.api_key),
                Some(&payload),
                &[("X-Merchant-Key-Fingerprint", fingerprint.as_str())],
            )
            .await?;

        if !raw.status {
            return Err(self.envelope_error(raw.message));
        }
        let data = raw.data.ok_or_else(|| self.envelope_error(raw.message.clone()))?;
        let status = Self::map_status(&data.status);
        info!(
            medium = %self.medium,
            reference = %request.reference,
            status = ?status,
            "gateway accepted request"
        );

        Ok(ProcessorResponse {
            success: !matches!(status, ProviderStatus::Failed | ProviderStatus::Cancelled),
            status,
            message: data.message.or(raw.message),
            payment_url: data.checkout_url,
            processor_ref: data.reference,
        })
    }
}

#[async_trait]
impl PaymentProcessor for HttpGatewayProcessor {
    fn medium(&self) -> PaymentMedium {
        self.medium
    }

    async fn initiate_payment(
        &self,
        credential: &ProcessorCredential,
        request: ProcessorRequest,
    ) -> PaymentResult<ProcessorResponse> {
        self.initiate("/payments", credential, request).await
    }

    async fn initiate_withdrawal(
        &self,
        credential: &ProcessorCredential,
        request: ProcessorRequest,
    ) -> PaymentResult<ProcessorResponse> {
        if request.phone.as_deref().unwrap_or("").trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "phone is required for withdrawals".to_string(),
                field: Some("phone".to_string()),
            });
        }
        self.initiate("/withdrawals", credential, request).await
    }

    async fn query_status(&self, provider_tx_id: &str) -> PaymentResult<StatusQueryResponse> {
        let raw: GatewayEnvelope<GatewayStatusData> = self
            .http
            .request_json::<JsonValue, _>(
                reqwest::Method::GET,
                &self.endpoint(&format!("/transactions/{}", provider_tx_id)),
                Some(&self.config.api_key),
                None,
                &[],
            )
            .await?;
        if !raw.status {
            return Err(self.envelope_error(raw.message));
        }
        let data = raw.data.ok_or_else(|| self.envelope_error(raw.message.clone()))?;

        Ok(StatusQueryResponse {
            status: Self::map_status(&data.status),
            provider_tx_id: data.reference.or_else(|| Some(provider_tx_id.to_string())),
            provider_data: data.details,
        })
    }
}
