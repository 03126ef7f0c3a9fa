//! Revenue Oracle: the external freight-costing feed.
//!
//! Lookups never fail the caller. Transport or decoding errors are logged
//! and reported as "no records".

use crate::models::CostingRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use service_core::observability::TracedClientExt;
use std::time::Duration;
use tracing::{debug, instrument, warn};

#[async_trait]
pub trait RevenueOracle: Send + Sync {
    async fn costing_for(&self, lr_numbers: &[String]) -> Vec<CostingRecord>;
}

#[derive(Serialize)]
struct CostingQuery<'a> {
    lr_numbers: &'a [String],
}

#[derive(Deserialize)]
struct CostingResponse {
    #[serde(default)]
    records: Vec<CostingRecord>,
}

/// HTTP client for `POST {base}/costing`.
pub struct HttpRevenueOracle {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpRevenueOracle {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/costing", base_url.trim_end_matches('/')),
            timeout,
        }
    }

    async fn fetch(&self, lr_numbers: &[String]) -> Result<Vec<CostingRecord>, reqwest::Error> {
        let response = self
            .client
            .traced_post(&self.endpoint)
            .json(&CostingQuery { lr_numbers })
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;
        let body: CostingResponse = response.json().await?;
        Ok(body.records)
    }
}

#[async_trait]
impl RevenueOracle for HttpRevenueOracle {
    #[instrument(skip(self, lr_numbers), fields(endpoint = %self.endpoint, count = lr_numbers.len()))]
    async fn costing_for(&self, lr_numbers: &[String]) -> Vec<CostingRecord> {
        if lr_numbers.is_empty() {
            return Vec::new();
        }
        match self.fetch(lr_numbers).await {
            Ok(records) => {
                debug!(records = records.len(), "Costing records received");
                records
            }
            Err(e) => {
                warn!(error = %e, "Revenue oracle lookup failed");
                Vec::new()
            }
        }
    }
}

/// Used when no oracle URL is configured.
pub struct DisabledRevenueOracle;

#[async_trait]
impl RevenueOracle for DisabledRevenueOracle {
    async fn costing_for(&self, _lr_numbers: &[String]) -> Vec<CostingRecord> {
        Vec::new()
    }
}
