use tonic::metadata::MetadataValue;
use tonic::{Request, Status};

use super::auth_gate::extract_bearer_token;
use super::deadline::Deadline;
use super::interceptors::{REQUEST_ID_KEY, extract_request_id, inject_trace_context};

/// What an outbound call inherits from the inbound request it serves:
/// the caller's bearer credential, the deadline and the request id.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub bearer: Option<String>,
    pub deadline: Deadline,
    pub request_id: Option<String>,
}

impl CallContext {
    pub fn from_request<T>(request: &Request<T>) -> Self {
        Self {
            bearer: extract_bearer_token(request).ok(),
            deadline: Deadline::from_request(request),
            request_id: extract_request_id(request),
        }
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    /// Build an outbound request carrying this context. Fails with
    /// `DEADLINE_EXCEEDED` when the inherited deadline has already passed.
    #[allow(clippy::result_large_err)]
    pub fn outbound<M>(&self, message: M) -> Result<Request<M>, Status> {
        let mut request = Request::new(message);
        self.deadline.apply(&mut request)?;

        if let Some(token) = &self.bearer {
            let value: MetadataValue<_> = format!("Bearer {}", token)
                .parse()
                .map_err(|_| Status::unauthenticated("Invalid authorization header encoding"))?;
            request.metadata_mut().insert("authorization", value);
        }
        if let Some(request_id) = &self.request_id
            && let Ok(value) = request_id.parse()
        {
            request.metadata_mut().insert(REQUEST_ID_KEY, value);
        }
        inject_trace_context(&mut request);

        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_outbound_forwards_bearer_and_request_id() {
        let mut inbound = Request::new(());
        inbound
            .metadata_mut()
            .insert("authorization", "Bearer abc".parse().unwrap());
        inbound
            .metadata_mut()
            .insert(REQUEST_ID_KEY, "req-1".parse().unwrap());

        let ctx = CallContext::from_request(&inbound);
        let outbound = ctx.outbound(()).unwrap();

        assert_eq!(extract_bearer_token(&outbound).unwrap(), "abc");
        assert_eq!(extract_request_id(&outbound).as_deref(), Some("req-1"));
    }

    #[test]
    fn test_outbound_refuses_expired_deadline() {
        let ctx = CallContext::default().with_deadline(Deadline::after(Duration::ZERO));
        let err = ctx.outbound(()).unwrap_err();
        assert_eq!(err.code(), tonic::Code::DeadlineExceeded);
    }
}
