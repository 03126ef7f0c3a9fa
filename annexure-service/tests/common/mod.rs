//! Common test utilities for annexure-service integration tests.

#![allow(dead_code)]

use annexure_service::config::{
    AnnexureConfig, InvoicingConfig, ReconciliationConfig, RevenueOracleConfig, StoreBackend,
};
use annexure_service::grpc::proto::annexure_service_client::AnnexureServiceClient;
use annexure_service::models::{Annexure, LrRequest, NewAnnexure, NewLrRequest};
use annexure_service::services::{
    DisabledRevenueOracle, FileGroupResolver, InvoiceEngine, LrIntake, MembershipEngine,
    RevenueOracle,
};
use annexure_service::startup::Application;
use annexure_service::store::{MemoryLedgerStore, SharedStore};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use service_core::config::Config as CommonConfig;
use std::str::FromStr;
use std::sync::{Arc, Once};
use tonic::transport::Channel;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,annexure_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

pub fn test_config() -> AnnexureConfig {
    AnnexureConfig {
        common: CommonConfig {
            port: 0,
            ..CommonConfig::default()
        },
        service_name: "annexure-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        store: StoreBackend::Memory,
        revenue_oracle: RevenueOracleConfig {
            url: None,
            timeout_secs: 1,
        },
        invoicing: InvoicingConfig {
            number_prefix: "INV".to_string(),
            tax_rate: dec("0.18"),
        },
        reconciliation: ReconciliationConfig {
            tolerance: dec("0.01"),
        },
    }
}

/// Engines over one fresh in-memory store.
pub struct Ledger {
    pub store: SharedStore,
    pub intake: LrIntake,
    pub resolver: FileGroupResolver,
    pub membership: MembershipEngine,
    pub invoices: InvoiceEngine,
    pub vendor_id: Uuid,
}

impl Ledger {
    pub fn new() -> Self {
        init_tracing();
        let store: SharedStore = Arc::new(MemoryLedgerStore::new());
        Self {
            intake: LrIntake::new(store.clone()),
            resolver: FileGroupResolver::new(store.clone()),
            membership: MembershipEngine::new(store.clone()),
            invoices: InvoiceEngine::new(store.clone(), test_config().invoicing),
            store,
            vendor_id: Uuid::new_v4(),
        }
    }

    pub async fn annexure(&self, name: &str) -> Annexure {
        self.membership
            .create_annexure(NewAnnexure {
                name: name.to_string(),
                from_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
                vendor_id: None,
            })
            .await
            .expect("Failed to create annexure")
    }

    /// LR with a POD, priced at 1000 plus 50 extra.
    pub async fn lr(&self, number: &str, file: &str) -> LrRequest {
        self.lr_with(number, Some(file), Some("https://blob.example/pod.pdf"), "1000", "50")
            .await
    }

    pub async fn lr_without_pod(&self, number: &str, file: &str) -> LrRequest {
        self.lr_with(number, Some(file), None, "1000", "50").await
    }

    pub async fn lr_with(
        &self,
        number: &str,
        file: Option<&str>,
        podlink: Option<&str>,
        price: &str,
        extra: &str,
    ) -> LrRequest {
        self.lr_for_vendor(self.vendor_id, number, file, podlink, price, extra)
            .await
    }

    pub async fn lr_for_vendor(
        &self,
        vendor_id: Uuid,
        number: &str,
        file: Option<&str>,
        podlink: Option<&str>,
        price: &str,
        extra: &str,
    ) -> LrRequest {
        self.intake
            .submit_lr(NewLrRequest {
                lr_number: number.to_string(),
                file_number: file.map(str::to_string),
                vendor_id,
                origin: Some("Pune".to_string()),
                destination: Some("Delhi".to_string()),
                remark: None,
                podlink: podlink.map(str::to_string),
                lr_price: Some(dec(price)),
                price_settled: None,
                extra_cost: dec(extra),
            })
            .await
            .expect("Failed to submit LR")
    }

    pub async fn attach(&self, annexure: &Annexure, numbers: &[&str]) {
        let numbers: Vec<String> = numbers.iter().map(|n| n.to_string()).collect();
        self.membership
            .attach_lrs(annexure.annexure_id, &numbers)
            .await
            .expect("Failed to attach LRs");
    }

    pub async fn reload(&self, number: &str) -> LrRequest {
        use annexure_service::store::LrRepository;
        self.store
            .find_lr_by_number(number)
            .await
            .unwrap()
            .expect("LR missing")
    }
}

pub fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// Test application wrapper.
pub struct TestApp {
    pub grpc_client: AnnexureServiceClient<Channel>,
    pub store: SharedStore,
    pub http_port: u16,
    pub grpc_port: u16,
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with_oracle(Arc::new(DisabledRevenueOracle)).await
}

/// Spawn the service on ephemeral ports over an in-memory store.
pub async fn spawn_app_with_oracle(oracle: Arc<dyn RevenueOracle>) -> TestApp {
    init_tracing();

    let store: SharedStore = Arc::new(MemoryLedgerStore::new());
    let app = Application::build_with_store(test_config(), store.clone(), oracle)
        .await
        .expect("Failed to build application");

    let http_port = app.http_port();
    let grpc_port = app.grpc_port();
    let grpc_addr = format!("http://127.0.0.1:{}", grpc_port);

    tokio::spawn(async move {
        app.run_until_stopped().await.ok();
    });

    let grpc_client = {
        let mut attempts = 0;
        loop {
            match AnnexureServiceClient::connect(grpc_addr.clone()).await {
                Ok(client) => break client,
                Err(_) if attempts < 20 => {
                    attempts += 1;
                    tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
                }
                Err(e) => panic!("Failed to connect gRPC client after 20 attempts: {}", e),
            }
        }
    };

    TestApp {
        grpc_client,
        store,
        http_port,
        grpc_port,
    }
}
