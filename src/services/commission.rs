use crate::config::CommissionConfig;
use crate::services::error::OrchestratorResult;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Merchant-specific rate: `fee = base * percent / 100 + cent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionResult {
    #[serde(with = "crate::domain::decimal_string")]
    pub percent: BigDecimal,
    #[serde(with = "crate::domain::decimal_string")]
    pub cent: BigDecimal,
}

#[async_trait]
pub trait CommissionCalculator: Send + Sync {
    async fn calculate_commission(
        &self,
        base_amount: &BigDecimal,
        merchant_id: Uuid,
    ) -> OrchestratorResult<CommissionResult>;
}

/// Default platform rate with negotiated per-merchant overrides.
pub struct ConfiguredCommissionCalculator {
    default: CommissionResult,
    overrides: HashMap<Uuid, CommissionResult>,
}

impl ConfiguredCommissionCalculator {
    pub fn new(config: &CommissionConfig) -> Self {
        let overrides = config
            .overrides
            .iter()
            .map(|(merchant, (percent, cent))| {
                (
                    *merchant,
                    CommissionResult {
                        percent: percent.clone(),
                        cent: cent.clone(),
                    },
                )
            })
            .collect();
        Self {
            default: CommissionResult {
                percent: config.default_percent.clone(),
                cent: config.default_cent.clone(),
            },
            overrides,
        }
    }
}

#[async_trait]
impl CommissionCalculator for ConfiguredCommissionCalculator {
    async fn calculate_commission(
        &self,
        base_amount: &BigDecimal,
        merchant_id: Uuid,
    ) -> OrchestratorResult<CommissionResult> {
        let rate = self
            .overrides
            .get(&merchant_id)
            .unwrap_or(&self.default)
            .clone();
        debug!(
            merchant_id = %merchant_id,
            base_amount = %base_amount,
            percent = %rate.percent,
            cent = %rate.cent,
            "commission resolved"
        );
        Ok(rate)
    }
}
