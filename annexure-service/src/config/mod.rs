//! Configuration module for annexure-service.

use rust_decimal::Decimal;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct AnnexureConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub store: StoreBackend,
    pub revenue_oracle: RevenueOracleConfig,
    pub invoicing: InvoicingConfig,
    pub reconciliation: ReconciliationConfig,
}

/// Where ledger state lives.
#[derive(Debug, Clone)]
pub enum StoreBackend {
    Postgres(DatabaseConfig),
    Memory,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RevenueOracleConfig {
    /// Base URL of the freight-costing feed; `None` disables lookups.
    pub url: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct InvoicingConfig {
    pub number_prefix: String,
    pub tax_rate: Decimal,
}

impl Default for InvoicingConfig {
    fn default() -> Self {
        Self {
            number_prefix: "INV".to_string(),
            tax_rate: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    /// Largest absolute billed-minus-revenue difference still counted as matched.
    pub tolerance: Decimal,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            tolerance: Decimal::new(1, 2),
        }
    }
}

impl AnnexureConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let store = match env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "postgres".to_string())
            .to_lowercase()
            .as_str()
        {
            "memory" => StoreBackend::Memory,
            "postgres" => StoreBackend::Postgres(DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
                min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2),
            }),
            other => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Unknown STORE_BACKEND '{}'",
                    other
                )))
            }
        };

        let defaults = InvoicingConfig::default();

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "annexure-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            store,
            revenue_oracle: RevenueOracleConfig {
                url: env::var("REVENUE_ORACLE_URL")
                    .ok()
                    .filter(|s| !s.trim().is_empty()),
                timeout_secs: env::var("REVENUE_ORACLE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
            },
            invoicing: InvoicingConfig {
                number_prefix: env::var("INVOICE_NUMBER_PREFIX")
                    .unwrap_or(defaults.number_prefix),
                tax_rate: decimal_var("INVOICE_TAX_RATE")?.unwrap_or(defaults.tax_rate),
            },
            reconciliation: ReconciliationConfig {
                tolerance: decimal_var("RECONCILIATION_TOLERANCE")?
                    .unwrap_or_else(|| ReconciliationConfig::default().tolerance),
            },
        })
    }
}

fn decimal_var(name: &str) -> Result<Option<Decimal>, AppError> {
    match env::var(name) {
        Ok(raw) => Decimal::from_str(raw.trim())
            .map(Some)
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("{} is not a decimal: {}", name, e))),
        Err(_) => Ok(None),
    }
}
