//! gRPC interceptors and metadata helpers for trace propagation.

use opentelemetry::trace::TraceContextExt;
use tonic::{Request, Status};
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;
use uuid::Uuid;

use super::deadline::Deadline;

/// gRPC metadata key for W3C traceparent header.
pub const TRACEPARENT_KEY: &str = "traceparent";

/// gRPC metadata key for W3C tracestate header.
pub const TRACESTATE_KEY: &str = "tracestate";

/// gRPC metadata key for request ID.
pub const REQUEST_ID_KEY: &str = "x-request-id";

/// Server-side interceptor. Makes sure every inbound call carries an
/// `x-request-id` (generating one when the caller sent none) so handlers can
/// forward it on their own outbound calls, and pins the call's deadline.
#[allow(clippy::result_large_err)]
pub fn trace_context_interceptor(mut request: Request<()>) -> Result<Request<()>, Status> {
    if let Some(traceparent) = extract_traceparent(&request) {
        tracing::debug!(traceparent = %traceparent, "Received trace context");
    }

    if extract_request_id(&request).is_none()
        && let Ok(value) = Uuid::new_v4().to_string().parse()
    {
        request.metadata_mut().insert(REQUEST_ID_KEY, value);
    }

    Deadline::capture(&mut request);

    Ok(request)
}

/// Inject the current span's trace context into outgoing request metadata.
pub fn inject_trace_context<T>(request: &mut Request<T>) {
    let span = Span::current();
    let context = span.context();
    let otel_span = context.span();
    let span_context = otel_span.span_context();

    if !span_context.is_valid() {
        return;
    }

    // version-trace_id-span_id-trace_flags
    let traceparent = format!(
        "00-{}-{}-{:02x}",
        span_context.trace_id(),
        span_context.span_id(),
        span_context.trace_flags().to_u8()
    );
    if let Ok(value) = traceparent.parse() {
        request.metadata_mut().insert(TRACEPARENT_KEY, value);
    }

    let tracestate = span_context.trace_state().header();
    if !tracestate.is_empty()
        && let Ok(value) = tracestate.parse()
    {
        request.metadata_mut().insert(TRACESTATE_KEY, value);
    }
}

pub fn extract_traceparent<T>(request: &Request<T>) -> Option<String> {
    request
        .metadata()
        .get(TRACEPARENT_KEY)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

pub fn extract_request_id<T>(request: &Request<T>) -> Option<String> {
    request
        .metadata()
        .get(REQUEST_ID_KEY)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grpc::deadline::GRPC_TIMEOUT_KEY;

    #[test]
    fn test_interceptor_assigns_request_id() {
        let request = trace_context_interceptor(Request::new(())).unwrap();
        let id = extract_request_id(&request).unwrap();
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn test_interceptor_keeps_caller_request_id() {
        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert(REQUEST_ID_KEY, "req-42".parse().unwrap());

        let request = trace_context_interceptor(request).unwrap();
        assert_eq!(extract_request_id(&request).as_deref(), Some("req-42"));
    }

    #[test]
    fn test_interceptor_pins_deadline() {
        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert(GRPC_TIMEOUT_KEY, "5S".parse().unwrap());

        let request = trace_context_interceptor(request).unwrap();
        let pinned = request.extensions().get::<Deadline>().copied().unwrap();
        assert!(pinned.remaining().is_some());
        assert_eq!(Deadline::from_request(&request), pinned);
    }

    #[test]
    fn test_inject_without_active_span_is_noop() {
        let mut request = Request::new(());
        inject_trace_context(&mut request);
        assert!(extract_traceparent(&request).is_none());
    }
}
