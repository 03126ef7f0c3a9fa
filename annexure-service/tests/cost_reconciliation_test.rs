//! Cost reconciliation tests against stubbed and HTTP revenue oracles.

mod common;

use annexure_service::models::{CostStatus, CostingRecord};
use annexure_service::services::{CostReconciler, HttpRevenueOracle, RevenueOracle};
use async_trait::async_trait;
use axum::{routing::post, Json, Router};
use common::{dec, test_config, Ledger};
use serde_json::{json, Value};
use service_core::error::AppError;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Oracle returning fixed records and remembering what it was asked for.
struct StubOracle {
    records: Vec<CostingRecord>,
    asked: Mutex<Vec<String>>,
}

impl StubOracle {
    fn new(records: Vec<CostingRecord>) -> Arc<Self> {
        Arc::new(Self {
            records,
            asked: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl RevenueOracle for StubOracle {
    async fn costing_for(&self, lr_numbers: &[String]) -> Vec<CostingRecord> {
        self.asked.lock().unwrap().extend(lr_numbers.iter().cloned());
        self.records.clone()
    }
}

fn record(lr_number: &str, revenue: &str, cost: &str) -> CostingRecord {
    CostingRecord {
        lr_number: lr_number.to_string(),
        charge_code: "FRT".to_string(),
        allocated_cost: dec(cost),
        revenue: dec(revenue),
        gl_code: "4100".to_string(),
    }
}

fn reconciler(ledger: &Ledger, oracle: Arc<dyn RevenueOracle>) -> CostReconciler {
    CostReconciler::new(ledger.store.clone(), oracle, test_config().reconciliation)
}

#[tokio::test]
async fn test_lines_are_classified_against_oracle_records() {
    let ledger = Ledger::new();
    let annexure = ledger.annexure("Costs").await;
    // Each LR bills 1000 + 50.
    ledger.lr("LR-MATCH", "F-1").await;
    ledger.lr("LR-SPLIT", "F-1").await;
    ledger.lr("LR-OFF", "F-2").await;
    ledger.lr("LR-NONE", "F-3").await;
    ledger
        .attach(&annexure, &["LR-MATCH", "LR-SPLIT", "LR-OFF", "LR-NONE"])
        .await;

    let oracle = StubOracle::new(vec![
        record("LR-MATCH", "1050.005", "800"),
        record("lr-split", "1000", "600"),
        record("LR-SPLIT", "50", "40"),
        record("LR-OFF", "990", "700"),
        record("LR-STRANGER", "5000", "1"),
    ]);

    let report = reconciler(&ledger, oracle.clone())
        .reconcile_annexure(annexure.annexure_id)
        .await
        .expect("reconciliation failed");

    assert_eq!(report.lines.len(), 4);
    let line = |n: &str| report.lines.iter().find(|l| l.lr_number == n).unwrap();

    assert_eq!(line("LR-MATCH").status, CostStatus::Matched);
    assert_eq!(line("LR-SPLIT").status, CostStatus::Matched);
    assert_eq!(line("LR-SPLIT").records.len(), 2);
    assert_eq!(line("LR-SPLIT").allocated_cost, dec("640"));
    assert_eq!(line("LR-OFF").status, CostStatus::Mismatch);
    assert_eq!(line("LR-OFF").variance, dec("60"));
    assert_eq!(line("LR-NONE").status, CostStatus::Missing);
    assert_eq!(line("LR-NONE").file_number.as_deref(), Some("F-3"));

    assert_eq!(report.count(CostStatus::Matched), 2);
    assert_eq!(report.total_billed, dec("4200"));
    assert_eq!(report.total_variance, report.total_billed - report.total_revenue);

    let mut asked = oracle.asked.lock().unwrap().clone();
    asked.sort();
    assert_eq!(asked, vec!["LR-MATCH", "LR-NONE", "LR-OFF", "LR-SPLIT"]);
}

#[tokio::test]
async fn test_unknown_annexure_is_not_found() {
    let ledger = Ledger::new();
    let result = reconciler(&ledger, StubOracle::new(Vec::new()))
        .reconcile_annexure(Uuid::new_v4())
        .await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn test_reconciliation_never_mutates_membership() {
    let ledger = Ledger::new();
    let annexure = ledger.annexure("Read only").await;
    ledger.lr("LR1", "F-1").await;
    ledger.attach(&annexure, &["LR1"]).await;
    let before = ledger.reload("LR1").await;

    reconciler(&ledger, StubOracle::new(vec![record("LR1", "1", "1")]))
        .reconcile_annexure(annexure.annexure_id)
        .await
        .unwrap();

    let after = ledger.reload("LR1").await;
    assert_eq!(before.annexure_id, after.annexure_id);
    assert_eq!(before.is_invoiced, after.is_invoiced);
    assert_eq!(before.updated_utc, after.updated_utc);
}

// ============================================================================
// HTTP oracle
// ============================================================================

async fn costing_handler(Json(body): Json<Value>) -> Json<Value> {
    let records: Vec<Value> = body["lr_numbers"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|n| n.as_str().map(str::to_string))
        .filter(|n| n != "LR-UNKNOWN")
        .map(|n| {
            json!({
                "lr_number": n,
                "charge_code": "FRT",
                "allocated_cost": "700.00",
                "revenue": "1050.00",
                "gl_code": "4100"
            })
        })
        .collect();
    Json(json!({ "records": records }))
}

async fn spawn_oracle() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().route("/costing", post(costing_handler));
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_http_oracle_posts_lr_numbers() {
    common::init_tracing();
    let base = spawn_oracle().await;
    let oracle = HttpRevenueOracle::new(&format!("{}/", base), Duration::from_secs(5));

    let records = oracle
        .costing_for(&["LR1".to_string(), "LR-UNKNOWN".to_string()])
        .await;

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].lr_number, "LR1");
    assert_eq!(records[0].revenue, dec("1050"));
    assert_eq!(records[0].allocated_cost, dec("700"));
}

#[tokio::test]
async fn test_http_oracle_drives_reconciliation() {
    let ledger = Ledger::new();
    let annexure = ledger.annexure("Oracle").await;
    ledger.lr("LR1", "F-1").await;
    ledger.lr("LR-UNKNOWN", "F-2").await;
    ledger.attach(&annexure, &["LR1", "LR-UNKNOWN"]).await;

    let base = spawn_oracle().await;
    let oracle = Arc::new(HttpRevenueOracle::new(&base, Duration::from_secs(5)));
    let report = reconciler(&ledger, oracle)
        .reconcile_annexure(annexure.annexure_id)
        .await
        .unwrap();

    assert_eq!(report.count(CostStatus::Matched), 1);
    assert_eq!(report.count(CostStatus::Missing), 1);
}

#[tokio::test]
async fn test_unreachable_oracle_reports_everything_missing() {
    let ledger = Ledger::new();
    let annexure = ledger.annexure("Offline").await;
    ledger.lr("LR1", "F-1").await;
    ledger.lr("LR2", "F-1").await;
    ledger.attach(&annexure, &["LR1", "LR2"]).await;

    // Bind then drop to get a port nothing listens on.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let oracle = Arc::new(HttpRevenueOracle::new(
        &format!("http://127.0.0.1:{}", port),
        Duration::from_secs(1),
    ));

    let report = reconciler(&ledger, oracle)
        .reconcile_annexure(annexure.annexure_id)
        .await
        .expect("oracle failures must not fail reconciliation");

    assert_eq!(report.count(CostStatus::Missing), 2);
    assert_eq!(report.total_revenue, dec("0"));
    assert!(report.lines.iter().all(|l| l.records.is_empty()));
}
