//! gRPC interceptors for cross-cutting concerns.

use tonic::metadata::MetadataMap;
use tonic::{Request, Status};

/// gRPC metadata key for W3C traceparent header.
pub const TRACEPARENT_KEY: &str = "traceparent";

/// gRPC metadata key for request ID.
pub const REQUEST_ID_KEY: &str = "x-request-id";

fn metadata_str<'a>(metadata: &'a MetadataMap, key: &str) -> Option<&'a str> {
    metadata.get(key).and_then(|v| v.to_str().ok())
}

/// Extract `(traceparent, request_id)` from incoming request metadata.
pub fn extract_trace_context<T>(request: &Request<T>) -> (Option<String>, Option<String>) {
    let metadata = request.metadata();
    (
        metadata_str(metadata, TRACEPARENT_KEY).map(String::from),
        metadata_str(metadata, REQUEST_ID_KEY).map(String::from),
    )
}

/// Interceptor that records incoming trace context on the current span.
#[allow(clippy::result_large_err)]
pub fn trace_context_interceptor(request: Request<()>) -> Result<Request<()>, Status> {
    let (traceparent, request_id) = extract_trace_context(&request);

    if let Some(ref tp) = traceparent {
        tracing::debug!(traceparent = %tp, "Received trace context");
    }

    if let Some(ref rid) = request_id {
        tracing::Span::current().record("request_id", rid.as_str());
    }

    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_request_id_and_traceparent() {
        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert(REQUEST_ID_KEY, "req-42".parse().unwrap());
        request.metadata_mut().insert(
            TRACEPARENT_KEY,
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01"
                .parse()
                .unwrap(),
        );

        let (tp, rid) = extract_trace_context(&request);
        assert_eq!(rid.as_deref(), Some("req-42"));
        assert!(tp.unwrap().starts_with("00-0af7"));
    }

    #[test]
    fn interceptor_passes_request_through() {
        let request = Request::new(());
        assert!(trace_context_interceptor(request).is_ok());
    }
}
