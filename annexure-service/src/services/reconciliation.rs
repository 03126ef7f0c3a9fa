//! Cost reconciliation of an annexure against the Revenue Oracle.

use crate::config::ReconciliationConfig;
use crate::models::{CostLine, CostReconciliation, CostStatus, CostingRecord, LrRequest};
use crate::services::revenue_oracle::RevenueOracle;
use crate::store::SharedStore;
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct CostReconciler {
    store: SharedStore,
    oracle: Arc<dyn RevenueOracle>,
    config: ReconciliationConfig,
}

impl CostReconciler {
    pub fn new(
        store: SharedStore,
        oracle: Arc<dyn RevenueOracle>,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            store,
            oracle,
            config,
        }
    }

    #[instrument(skip(self), fields(annexure_id = %annexure_id))]
    pub async fn reconcile_annexure(&self, annexure_id: Uuid) -> Result<CostReconciliation, AppError> {
        if self.store.get_annexure(annexure_id).await?.is_none() {
            return Err(AppError::NotFound(anyhow::anyhow!("Annexure not found")));
        }

        let members = self.store.find_lrs_by_annexure(annexure_id).await?;
        let numbers: Vec<String> = members.iter().map(|lr| lr.lr_number.clone()).collect();
        let records = self.oracle.costing_for(&numbers).await;

        let mut by_lr: HashMap<String, Vec<CostingRecord>> = HashMap::new();
        for record in records {
            let key = record.lr_number.trim().to_uppercase();
            by_lr.entry(key).or_default().push(record);
        }

        let lines: Vec<CostLine> = members
            .iter()
            .map(|lr| {
                cost_line(
                    lr,
                    by_lr.remove(&lr.lr_number).unwrap_or_default(),
                    self.config.tolerance,
                )
            })
            .collect();

        let report = CostReconciliation {
            annexure_id,
            total_billed: lines.iter().map(|l| l.billed).sum(),
            total_revenue: lines.iter().map(|l| l.revenue).sum(),
            total_variance: lines.iter().map(|l| l.variance).sum(),
            lines,
        };

        info!(
            lines = report.lines.len(),
            matched = report.count(CostStatus::Matched),
            mismatched = report.count(CostStatus::Mismatch),
            missing = report.count(CostStatus::Missing),
            "Annexure costs reconciled"
        );

        Ok(report)
    }
}

/// Classify one LR against its oracle records.
pub fn cost_line(lr: &LrRequest, records: Vec<CostingRecord>, tolerance: Decimal) -> CostLine {
    let billed = lr.billed_amount();
    let revenue: Decimal = records.iter().map(|r| r.revenue).sum();
    let allocated_cost: Decimal = records.iter().map(|r| r.allocated_cost).sum();
    let variance = billed - revenue;

    let status = if records.is_empty() {
        CostStatus::Missing
    } else if variance.abs() <= tolerance {
        CostStatus::Matched
    } else {
        CostStatus::Mismatch
    };

    CostLine {
        lr_number: lr.lr_number.clone(),
        file_number: lr.file().map(str::to_string),
        billed,
        revenue,
        allocated_cost,
        variance,
        status,
        records,
    }
}
