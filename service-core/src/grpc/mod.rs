//! gRPC utilities shared by the workspace services.

pub mod error;
pub mod interceptors;

pub use error::IntoStatus;
pub use interceptors::{
    REQUEST_ID_KEY, TRACEPARENT_KEY, extract_trace_context, trace_context_interceptor,
};

pub use tonic::{Code, Request, Response, Status};
