//! Application configuration module
//! Loads `.env`, reads typed settings from environment variables and validates them.

use crate::payments::types::{PaymentMedium, ProcessorCredential};
use bigdecimal::BigDecimal;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Boot with in-memory stores, in-memory wallets and sandbox processors.
    pub skip_externals: bool,
    pub database: Option<DatabaseConfig>,
    pub logging: LoggingConfig,
    pub payments: PaymentsConfig,
    pub commission: CommissionConfig,
    pub checkout: CheckoutConfig,
    pub reconciliation: ReconciliationConfig,
    pub tips: TipConfig,
    pub webhook: WebhookConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct PaymentsConfig {
    pub enabled_mediums: Vec<PaymentMedium>,
    pub gateways: HashMap<PaymentMedium, GatewayConfig>,
    pub provider_timeout: Duration,
    pub max_retries: u32,
    pub sandbox: bool,
    pub default_currency: String,
    /// Platform key used for payouts no merchant request is attached to (tips).
    pub payout_api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CommissionConfig {
    pub default_percent: BigDecimal,
    pub default_cent: BigDecimal,
    /// Negotiated per-merchant `(percent, cent)` rates.
    pub overrides: HashMap<Uuid, (BigDecimal, BigDecimal)>,
}

#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    pub base_url: String,
    pub default_ttl_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    pub interval: Duration,
    pub pending_threshold: Duration,
    pub batch_size: i64,
}

#[derive(Debug, Clone)]
pub struct TipConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub batch_size: i64,
    pub phone_pattern: String,
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub secret: Option<String>,
    pub timeout: Duration,
}

fn env_or<T: FromStr>(key: &str, default: &str) -> Result<T, ConfigError> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

fn env_flag(key: &str) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv::dotenv().ok();

        let skip_externals = env_flag("SKIP_EXTERNALS");
        let database = if skip_externals {
            None
        } else {
            Some(DatabaseConfig::from_env()?)
        };
        let mut payments = PaymentsConfig::from_env()?;
        if skip_externals {
            payments.sandbox = true;
        }

        Ok(AppConfig {
            skip_externals,
            database,
            logging: LoggingConfig::from_env()?,
            payments,
            commission: CommissionConfig::from_env()?,
            checkout: CheckoutConfig::from_env()?,
            reconciliation: ReconciliationConfig::from_env()?,
            tips: TipConfig::from_env()?,
            webhook: WebhookConfig::from_env()?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(database) = &self.database {
            database.validate()?;
        }
        self.logging.validate()?;
        self.payments.validate()?;
        self.commission.validate()?;
        self.checkout.validate()?;
        self.reconciliation.validate()?;
        self.tips.validate()?;
        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: env_or("DB_MAX_CONNECTIONS", "20")?,
            min_connections: env_or("DB_MIN_CONNECTIONS", "5")?,
            connection_timeout: env_or("DB_CONNECTION_TIMEOUT", "30")?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }
        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }
        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }
        Ok(())
    }
}

impl PaymentsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let enabled_raw = env::var("ENABLED_PAYMENT_MEDIUMS")
            .unwrap_or_else(|_| "TELEBIRR,MPESA,CBE_BIRR,KACHA,CARD".to_string());
        let mut enabled_mediums = Vec::new();
        for part in enabled_raw.split(',') {
            let value = part.trim();
            if value.is_empty() {
                continue;
            }
            let medium = PaymentMedium::from_str(value)
                .map_err(|_| ConfigError::InvalidValue(format!("ENABLED_PAYMENT_MEDIUMS: {}", value)))?;
            if !enabled_mediums.contains(&medium) {
                enabled_mediums.push(medium);
            }
        }

        let mut gateways = HashMap::new();
        for medium in &enabled_mediums {
            let url = env::var(format!("{}_GATEWAY_URL", medium.as_str())).ok();
            let key = env::var(format!("{}_API_KEY", medium.as_str())).ok();
            if let (Some(base_url), Some(api_key)) = (url, key) {
                gateways.insert(*medium, GatewayConfig { base_url, api_key });
            }
        }

        Ok(PaymentsConfig {
            enabled_mediums,
            gateways,
            provider_timeout: Duration::from_secs(env_or("PROVIDER_TIMEOUT_SECONDS", "30")?),
            max_retries: env_or("PROVIDER_MAX_RETRIES", "2")?,
            sandbox: env_flag("PAYMENT_SANDBOX"),
            default_currency: env::var("DEFAULT_CURRENCY").unwrap_or_else(|_| "ETB".to_string()),
            payout_api_key: env::var("TIP_PAYOUT_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
        })
    }

    /// Credential for background payouts. Sandbox runs fall back to a fixed key.
    pub fn payout_credential(&self) -> Result<ProcessorCredential, ConfigError> {
        match (&self.payout_api_key, self.sandbox) {
            (Some(key), _) => Ok(ProcessorCredential::new(key.clone())),
            (None, true) => Ok(ProcessorCredential::new("sandbox-payout")),
            (None, false) => Err(ConfigError::MissingVariable("TIP_PAYOUT_API_KEY".to_string())),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled_mediums.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "ENABLED_PAYMENT_MEDIUMS must name at least one medium".to_string(),
            ));
        }
        if self.provider_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "PROVIDER_TIMEOUT_SECONDS".to_string(),
            ));
        }
        if self.sandbox {
            return Ok(());
        }
        for medium in &self.enabled_mediums {
            let gateway = self.gateways.get(medium).ok_or_else(|| {
                ConfigError::MissingVariable(format!(
                    "{}_GATEWAY_URL / {}_API_KEY",
                    medium.as_str(),
                    medium.as_str()
                ))
            })?;
            if url::Url::parse(&gateway.base_url).is_err() {
                return Err(ConfigError::InvalidValue(format!(
                    "{}_GATEWAY_URL",
                    medium.as_str()
                )));
            }
        }
        self.payout_credential()?;
        Ok(())
    }
}

impl CommissionConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut overrides = HashMap::new();
        // MERCHANT_COMMISSION_OVERRIDES=<merchant uuid>:<percent>:<cent>,...
        if let Ok(raw) = env::var("MERCHANT_COMMISSION_OVERRIDES") {
            for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
                let invalid =
                    || ConfigError::InvalidValue(format!("MERCHANT_COMMISSION_OVERRIDES: {}", entry));
                let mut parts = entry.split(':');
                let merchant = parts
                    .next()
                    .and_then(|v| Uuid::parse_str(v.trim()).ok())
                    .ok_or_else(invalid)?;
                let percent = parts
                    .next()
                    .and_then(|v| BigDecimal::from_str(v.trim()).ok())
                    .ok_or_else(invalid)?;
                let cent = parts
                    .next()
                    .map(|v| BigDecimal::from_str(v.trim()))
                    .transpose()
                    .map_err(|_| invalid())?
                    .unwrap_or_else(|| BigDecimal::from(0));
                overrides.insert(merchant, (percent, cent));
            }
        }

        Ok(CommissionConfig {
            default_percent: env_or("DEFAULT_COMMISSION_PERCENT", "2.75")?,
            default_cent: env_or("DEFAULT_COMMISSION_CENT", "0")?,
            overrides,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero = BigDecimal::from(0);
        let hundred = BigDecimal::from(100);
        let rates = std::iter::once((&self.default_percent, &self.default_cent))
            .chain(self.overrides.values().map(|(p, c)| (p, c)));
        for (percent, cent) in rates {
            if *percent < zero || *percent > hundred || *cent < zero {
                return Err(ConfigError::ValidationFailed(
                    "commission percent must be within 0..=100 and cent non-negative".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl CheckoutConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(CheckoutConfig {
            base_url: env::var("CHECKOUT_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000/checkout/".to_string()),
            default_ttl_minutes: env_or("CHECKOUT_DEFAULT_TTL_MINUTES", "30")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if url::Url::parse(&self.base_url).is_err() {
            return Err(ConfigError::InvalidValue("CHECKOUT_BASE_URL".to_string()));
        }
        if self.default_ttl_minutes <= 0 {
            return Err(ConfigError::InvalidValue(
                "CHECKOUT_DEFAULT_TTL_MINUTES".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1800),
            pending_threshold: Duration::from_secs(300),
            batch_size: 100,
        }
    }
}

impl ReconciliationConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            interval: Duration::from_secs(env_or("RECONCILIATION_INTERVAL_SECONDS", "1800")?),
            pending_threshold: Duration::from_secs(env_or(
                "RECONCILIATION_PENDING_THRESHOLD_SECONDS",
                "300",
            )?),
            batch_size: env_or("RECONCILIATION_BATCH_SIZE", "100")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "RECONCILIATION_INTERVAL_SECONDS".to_string(),
            ));
        }
        if self.batch_size <= 0 {
            return Err(ConfigError::InvalidValue(
                "RECONCILIATION_BATCH_SIZE".to_string(),
            ));
        }
        Ok(())
    }
}

pub const DEFAULT_TIPEE_PHONE_PATTERN: &str = r"^(\+251|251|0)?[79]\d{8}$";

impl Default for TipConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 256,
            batch_size: 100,
            phone_pattern: DEFAULT_TIPEE_PHONE_PATTERN.to_string(),
        }
    }
}

impl TipConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            workers: env_or("TIP_WORKERS", "4")?,
            queue_capacity: env_or("TIP_QUEUE_CAPACITY", "256")?,
            batch_size: env_or("TIP_BATCH_SIZE", "100")?,
            phone_pattern: env::var("TIPEE_PHONE_PATTERN")
                .unwrap_or_else(|_| DEFAULT_TIPEE_PHONE_PATTERN.to_string()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 || self.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "TIP_WORKERS and TIP_QUEUE_CAPACITY must be positive".to_string(),
            ));
        }
        if regex::Regex::new(&self.phone_pattern).is_err() {
            return Err(ConfigError::InvalidValue("TIPEE_PHONE_PATTERN".to_string()));
        }
        Ok(())
    }
}

impl WebhookConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            secret: env::var("MERCHANT_WEBHOOK_SECRET")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            timeout: Duration::from_secs(env_or("MERCHANT_WEBHOOK_TIMEOUT_SECONDS", "10")?),
        })
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
