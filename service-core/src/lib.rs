//! service-core: shared infrastructure for the logistics back-office services.
pub mod config;
pub mod error;
pub mod grpc;
pub mod middleware;
pub mod observability;

pub use async_trait;
pub use axum;
pub use serde;
pub use serde_json;
pub use tokio;
pub use tonic;
pub use tracing;
pub use validator;
