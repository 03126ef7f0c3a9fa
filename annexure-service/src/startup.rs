//! Application startup and lifecycle management.

use crate::config::{AnnexureConfig, StoreBackend};
use crate::grpc::{
    proto::{annexure_service_server::AnnexureServiceServer, FILE_DESCRIPTOR_SET},
    AnnexureServiceImpl,
};
use crate::services::{
    get_metrics, init_metrics, DisabledRevenueOracle, HttpRevenueOracle, RevenueOracle,
};
use crate::store::{MemoryLedgerStore, PgLedgerStore, SharedStore};
use axum::{
    extract::State, http::StatusCode, middleware, response::IntoResponse, routing::get, Json,
    Router,
};
use serde_json::json;
use service_core::error::AppError;
use service_core::grpc::trace_context_interceptor;
use service_core::middleware::{metrics_middleware, request_id_middleware};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tonic::transport::Server as GrpcServer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

#[derive(Clone)]
struct HealthState {
    store: SharedStore,
}

/// Liveness probe.
async fn health_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.store.health_check().await {
        Ok(_) => {
            tracing::debug!("Health check passed");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "service": "annexure-service",
                    "version": env!("CARGO_PKG_VERSION")
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - ledger store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "annexure-service",
                    "error": e.to_string()
                })),
            )
        }
    }
}

async fn readiness_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.store.health_check().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

/// Build the Ledger Store selected by configuration.
pub async fn connect_store(config: &AnnexureConfig) -> Result<SharedStore, AppError> {
    match &config.store {
        StoreBackend::Postgres(db) => {
            let store = PgLedgerStore::new(&db.url, db.max_connections, db.min_connections)
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                    e
                })?;
            store.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory ledger store; state is lost on restart");
            Ok(Arc::new(MemoryLedgerStore::new()))
        }
    }
}

pub fn revenue_oracle(config: &AnnexureConfig) -> Arc<dyn RevenueOracle> {
    match &config.revenue_oracle.url {
        Some(url) => {
            tracing::info!(endpoint = %url, "Revenue oracle enabled");
            Arc::new(HttpRevenueOracle::new(
                url,
                Duration::from_secs(config.revenue_oracle.timeout_secs),
            ))
        }
        None => {
            tracing::info!("Revenue oracle URL not configured - cost lines will be MISSING");
            Arc::new(DisabledRevenueOracle)
        }
    }
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    grpc_port: u16,
    http_listener: TcpListener,
    grpc_listener: TcpListener,
    config: AnnexureConfig,
    store: SharedStore,
    oracle: Arc<dyn RevenueOracle>,
}

impl Application {
    pub async fn build(config: AnnexureConfig) -> Result<Self, AppError> {
        init_metrics();
        let store = connect_store(&config).await?;
        let oracle = revenue_oracle(&config);
        Self::build_with_store(config, store, oracle).await
    }

    /// Build around an existing store and oracle. Used by tests.
    pub async fn build_with_store(
        config: AnnexureConfig,
        store: SharedStore,
        oracle: Arc<dyn RevenueOracle>,
    ) -> Result<Self, AppError> {
        init_metrics();

        let http_addr = config.common.http_addr();
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        let grpc_addr = config.common.grpc_addr();
        let grpc_listener = TcpListener::bind(grpc_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %grpc_addr, "Failed to bind gRPC listener");
            AppError::from(e)
        })?;
        let grpc_port = grpc_listener.local_addr()?.port();

        tracing::info!(
            http_port = http_port,
            grpc_port = grpc_port,
            "Annexure service listeners bound"
        );

        Ok(Self {
            http_port,
            grpc_port,
            http_listener,
            grpc_listener,
            config,
            store,
            oracle,
        })
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn grpc_port(&self) -> u16 {
        self.grpc_port
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let http_router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(metrics_middleware))
            .layer(middleware::from_fn(request_id_middleware))
            .with_state(HealthState {
                store: self.store.clone(),
            });

        let annexure_service = AnnexureServiceImpl::new(
            self.store.clone(),
            self.oracle.clone(),
            self.config.invoicing.clone(),
            self.config.reconciliation.clone(),
        );

        let (mut health_reporter, grpc_health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_serving::<AnnexureServiceServer<AnnexureServiceImpl>>()
            .await;

        let reflection_service = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build_v1()
            .map_err(|e| {
                std::io::Error::other(format!("Failed to build reflection service: {}", e))
            })?;

        let grpc_trace_layer = TraceLayer::new_for_grpc()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::DEBUG));

        let annexure_service_with_interceptor =
            AnnexureServiceServer::with_interceptor(annexure_service, trace_context_interceptor);

        let incoming = tokio_stream::wrappers::TcpListenerStream::new(self.grpc_listener);
        let grpc_server = GrpcServer::builder()
            .layer(grpc_trace_layer)
            .add_service(grpc_health_service)
            .add_service(reflection_service)
            .add_service(annexure_service_with_interceptor)
            .serve_with_incoming(incoming);

        tracing::info!(
            service = "annexure-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            grpc_port = self.grpc_port,
            "Service ready to accept connections"
        );

        tokio::select! {
            result = axum::serve(self.http_listener, http_router) => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "HTTP server error");
                    return Err(std::io::Error::other(format!("HTTP server error: {}", e)));
                }
            }
            result = grpc_server => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "gRPC server error");
                    return Err(std::io::Error::other(format!("gRPC server error: {}", e)));
                }
            }
        }

        Ok(())
    }
}
