use crate::config::PaymentsConfig;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProcessor;
use crate::payments::providers::{HttpGatewayProcessor, SandboxProcessor};
use crate::payments::types::PaymentMedium;
use crate::payments::utils::PaymentHttpClient;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Medium -> processor map. Built once at startup and never mutated.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<PaymentMedium, Arc<dyn PaymentProcessor>>,
}

impl ProcessorRegistry {
    /// Later entries win when two processors claim the same medium.
    pub fn from_processors<I>(processors: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn PaymentProcessor>>,
    {
        let processors = processors
            .into_iter()
            .map(|processor| (processor.medium(), processor))
            .collect();
        Self { processors }
    }

    pub fn from_config(config: &PaymentsConfig) -> PaymentResult<Self> {
        let mut processors: Vec<Arc<dyn PaymentProcessor>> = Vec::new();

        if config.sandbox {
            for medium in &config.enabled_mediums {
                processors.push(Arc::new(SandboxProcessor::new(*medium)));
            }
        } else {
            let client = PaymentHttpClient::new(config.provider_timeout, config.max_retries)?;
            for medium in &config.enabled_mediums {
                let gateway =
                    config
                        .gateways
                        .get(medium)
                        .ok_or_else(|| PaymentError::ValidationError {
                            message: format!("no gateway configured for medium {}", medium),
                            field: Some(format!("{}_GATEWAY_URL", medium.as_str())),
                        })?;
                processors.push(Arc::new(HttpGatewayProcessor::new(
                    *medium,
                    gateway.clone(),
                    client.clone(),
                )));
            }
        }

        let registry = Self::from_processors(processors);
        info!(
            mediums = ?registry.mediums(),
            sandbox = config.sandbox,
            "payment processor registry built"
        );
        Ok(registry)
    }

    pub fn get(&self, medium: PaymentMedium) -> PaymentResult<Arc<dyn PaymentProcessor>> {
        self.processors
            .get(&medium)
            .cloned()
            .ok_or_else(|| PaymentError::UnsupportedMedium {
                medium: medium.to_string(),
            })
    }

    pub fn contains(&self, medium: PaymentMedium) -> bool {
        self.processors.contains_key(&medium)
    }

    /// Registered mediums in declaration order.
    pub fn mediums(&self) -> Vec<PaymentMedium> {
        PaymentMedium::ALL
            .iter()
            .copied()
            .filter(|m| self.processors.contains_key(m))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use std::time::Duration;

    fn sandbox_config(mediums: Vec<PaymentMedium>) -> PaymentsConfig {
        PaymentsConfig {
            enabled_mediums: mediums,
            gateways: HashMap::new(),
            provider_timeout: Duration::from_secs(5),
            max_retries: 0,
            sandbox: true,
            default_currency: "ETB".to_string(),
            payout_api_key: None,
        }
    }

    #[test]
    fn registry_dispatches_by_medium() {
        let registry = ProcessorRegistry::from_config(&sandbox_config(vec![
            PaymentMedium::Telebirr,
            PaymentMedium::Mpesa,
        ]))
        .expect("sandbox registry should build");

        let processor = registry.get(PaymentMedium::Mpesa).unwrap();
        assert_eq!(processor.medium(), PaymentMedium::Mpesa);
        assert_eq!(
            registry.mediums(),
            vec![PaymentMedium::Telebirr, PaymentMedium::Mpesa]
        );
    }

    #[test]
    fn unregistered_medium_is_a_hard_error() {
        let registry =
            ProcessorRegistry::from_config(&sandbox_config(vec![PaymentMedium::Telebirr]))
                .unwrap();
        let err = registry.get(PaymentMedium::Card).err().unwrap();
        assert!(matches!(err, PaymentError::UnsupportedMedium { .. }));
        assert!(!registry.contains(PaymentMedium::Card));
    }

    #[test]
    fn live_mode_requires_gateway_per_medium() {
        let mut config = sandbox_config(vec![PaymentMedium::Telebirr, PaymentMedium::Kacha]);
        config.sandbox = false;
        config.gateways.insert(
            PaymentMedium::Telebirr,
            GatewayConfig {
                base_url: "https://gateway.example.com".to_string(),
                api_key: "k".to_string(),
            },
        );

        let err = ProcessorRegistry::from_config(&config).err().unwrap();
        assert!(matches!(err, PaymentError::ValidationError { .. }));
    }
}
