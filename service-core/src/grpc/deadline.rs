//! Deadline propagation for outbound calls.
//!
//! The inbound `grpc-timeout` header is turned into an absolute [`Deadline`].
//! Every outbound call made on behalf of that request re-encodes the time left
//! and is additionally bounded locally, so no outbound call outlives the
//! inbound one.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tonic::metadata::MetadataMap;
use tonic::{Request, Status};

pub const GRPC_TIMEOUT_KEY: &str = "grpc-timeout";

/// Absolute deadline of the request being served. `None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn after(timeout: Duration) -> Self {
        Self(Some(Instant::now() + timeout))
    }

    pub fn from_metadata(metadata: &MetadataMap) -> Self {
        metadata
            .get(GRPC_TIMEOUT_KEY)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_grpc_timeout)
            .map(Self::after)
            .unwrap_or_default()
    }

    /// The deadline captured when the request arrived, falling back to the
    /// `grpc-timeout` header for requests that never went through
    /// [`Deadline::capture`].
    pub fn from_request<T>(request: &Request<T>) -> Self {
        request
            .extensions()
            .get::<Deadline>()
            .copied()
            .unwrap_or_else(|| Self::from_metadata(request.metadata()))
    }

    /// Fix the request's absolute deadline once, on arrival. Later readers
    /// see the same instant however long they run after it.
    pub fn capture<T>(request: &mut Request<T>) -> Self {
        let deadline = Self::from_request(request);
        request.extensions_mut().insert(deadline);
        deadline
    }

    /// Tighter of the two deadlines.
    pub fn min(self, other: Deadline) -> Deadline {
        match (self.0, other.0) {
            (Some(a), Some(b)) => Deadline(Some(a.min(b))),
            (Some(a), None) | (None, Some(a)) => Deadline(Some(a)),
            (None, None) => Deadline(None),
        }
    }

    /// Time left, `None` when unbounded. An expired deadline yields `Some(ZERO)`.
    pub fn remaining(&self) -> Option<Duration> {
        self.0
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.remaining(), Some(d) if d.is_zero())
    }

    /// Stamp the remaining time onto an outbound request.
    #[allow(clippy::result_large_err)]
    pub fn apply<T>(&self, request: &mut Request<T>) -> Result<(), Status> {
        match self.remaining() {
            None => Ok(()),
            Some(left) if left.is_zero() => Err(Status::deadline_exceeded("deadline exceeded")),
            Some(left) => {
                request.set_timeout(left);
                Ok(())
            }
        }
    }

    /// Bound a future by this deadline. Dropping the future on expiry cancels
    /// the in-flight outbound call.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, Status>
    where
        F: Future<Output = Result<T, Status>>,
    {
        match self.remaining() {
            None => fut.await,
            Some(left) if left.is_zero() => Err(Status::deadline_exceeded("deadline exceeded")),
            Some(left) => tokio::time::timeout(left, fut)
                .await
                .map_err(|_| Status::deadline_exceeded("deadline exceeded"))?,
        }
    }
}

/// Parse a `grpc-timeout` header value: up to 8 ASCII digits followed by one
/// unit of `H`, `M`, `S`, `m`, `u` or `n`.
pub fn parse_grpc_timeout(raw: &str) -> Option<Duration> {
    if raw.len() < 2 {
        return None;
    }
    let (digits, unit) = raw.split_at(raw.len() - 1);
    if digits.len() > 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: u64 = digits.parse().ok()?;
    let duration = match unit {
        "H" => Duration::from_secs(value * 60 * 60),
        "M" => Duration::from_secs(value * 60),
        "S" => Duration::from_secs(value),
        "m" => Duration::from_millis(value),
        "u" => Duration::from_micros(value),
        "n" => Duration::from_nanos(value),
        _ => return None,
    };
    Some(duration)
}
