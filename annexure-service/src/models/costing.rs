//! Revenue-oracle costing records and the annexure cost reconciliation report.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One costing row from the external freight-costing feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostingRecord {
    pub lr_number: String,
    #[serde(default)]
    pub charge_code: String,
    #[serde(default)]
    pub allocated_cost: Decimal,
    #[serde(default)]
    pub revenue: Decimal,
    #[serde(default)]
    pub gl_code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CostStatus {
    Matched,
    Mismatch,
    Missing,
}

#[derive(Debug, Clone, Serialize)]
pub struct CostLine {
    pub lr_number: String,
    pub file_number: Option<String>,
    pub billed: Decimal,
    pub revenue: Decimal,
    pub allocated_cost: Decimal,
    pub variance: Decimal,
    pub status: CostStatus,
    pub records: Vec<CostingRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CostReconciliation {
    pub annexure_id: Uuid,
    pub lines: Vec<CostLine>,
    pub total_billed: Decimal,
    pub total_revenue: Decimal,
    pub total_variance: Decimal,
}

impl CostReconciliation {
    pub fn count(&self, status: CostStatus) -> usize {
        self.lines.iter().filter(|l| l.status == status).count()
    }
}
