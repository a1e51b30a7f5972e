//! Auth gate shared by every library service.
//!
//! Each handler calls the gate first. The gate:
//! 1. lets allow-listed methods through untouched;
//! 2. extracts the `authorization: Bearer <token>` credential;
//! 3. delegates validation to a [`TokenValidator`] (the accounts service over
//!    gRPC, or the in-process token service inside accounts itself);
//! 4. enforces admin-only methods and the self-or-admin rule for requests that
//!    name a target subject ([`TargetSubject`]).
//!
//! Any path that does not end in an accepted identity is a rejection.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tonic::{Code, Request, Status};

use super::deadline::Deadline;
use crate::identity::Identity;

/// Validates a bearer token and yields the caller identity.
///
/// Implementations report failures as gRPC statuses: `UNAUTHENTICATED` for a
/// bad token, `PERMISSION_DENIED` for a revoked session or inactive account,
/// `UNAVAILABLE` when the token service cannot be reached.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate(&self, token: &str, deadline: Deadline) -> Result<Identity, Status>;
}

/// Request kinds that act on behalf of a specific subject.
///
/// Implement this for every request message routed through the gate. Kinds
/// without a subject use the default (no ownership check).
pub trait TargetSubject {
    fn target_subject(&self) -> Option<String> {
        None
    }
}

impl TargetSubject for () {}

#[derive(Clone)]
pub struct AuthGate {
    public_methods: Arc<HashSet<String>>,
    admin_methods: Arc<HashSet<String>>,
    validator: Arc<dyn TokenValidator>,
}

impl AuthGate {
    pub fn new(validator: Arc<dyn TokenValidator>) -> Self {
        Self {
            public_methods: Arc::new(HashSet::new()),
            admin_methods: Arc::new(HashSet::new()),
            validator,
        }
    }

    /// Full gRPC method paths that bypass authentication,
    /// e.g. `/library.accounts.v1.AccountsService/Login`.
    pub fn with_public_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.public_methods = Arc::new(methods.into_iter().map(Into::into).collect());
        self
    }

    /// Methods that additionally require the admin role.
    pub fn with_admin_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.admin_methods = Arc::new(methods.into_iter().map(Into::into).collect());
        self
    }

    pub fn is_public(&self, method: &str) -> bool {
        self.public_methods.contains(method)
    }

    /// Run the gate. `Ok(None)` means the method is allow-listed.
    pub async fn check<T: TargetSubject>(
        &self,
        method: &str,
        request: &Request<T>,
    ) -> Result<Option<Identity>, Status> {
        if self.is_public(method) {
            return Ok(None);
        }

        let started = Instant::now();
        let result = self.authenticate(method, request).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(identity) => tracing::info!(
                method = method,
                latency_ms = latency_ms,
                outcome = "ok",
                subject_id = %identity.subject_id,
                role = %identity.role,
                "Auth gate"
            ),
            Err(status) => tracing::info!(
                method = method,
                latency_ms = latency_ms,
                outcome = outcome_label(status.code()),
                "Auth gate"
            ),
        }

        result.map(Some)
    }

    /// Run the gate for a method that always needs a caller identity.
    pub async fn authorize<T: TargetSubject>(
        &self,
        method: &str,
        request: &Request<T>,
    ) -> Result<Identity, Status> {
        self.check(method, request).await?.ok_or_else(|| {
            tracing::error!(method = method, "Authenticated handler is allow-listed");
            Status::internal("internal error")
        })
    }

    async fn authenticate<T: TargetSubject>(
        &self,
        method: &str,
        request: &Request<T>,
    ) -> Result<Identity, Status> {
        let token = extract_bearer_token(request)?;
        let deadline = Deadline::from_request(request);

        let identity = self
            .validator
            .validate(&token, deadline)
            .await
            .map_err(|status| reclassify(method, status))?;

        if self.admin_methods.contains(method) && !identity.role.is_admin() {
            return Err(Status::permission_denied("permission denied"));
        }

        if let Some(target) = request.get_ref().target_subject()
            && !identity.may_act_for(&target)
        {
            return Err(Status::permission_denied("permission denied"));
        }

        Ok(identity)
    }
}

/// Map a token-service failure into what the gate reports to its caller.
fn reclassify(method: &str, status: Status) -> Status {
    match status.code() {
        Code::Unavailable => {
            tracing::error!(method = method, error = %status.message(), "Token service unavailable");
            Status::unavailable("error connecting to accounts service")
        }
        Code::Unauthenticated => Status::unauthenticated("invalid token"),
        Code::PermissionDenied => Status::permission_denied("permission denied"),
        Code::DeadlineExceeded | Code::Cancelled => Status::deadline_exceeded("deadline exceeded"),
        code => {
            tracing::error!(
                method = method,
                code = ?code,
                error = %status.message(),
                "Unexpected error during token validation"
            );
            Status::internal("internal error")
        }
    }
}

fn outcome_label(code: Code) -> &'static str {
    match code {
        Code::Unauthenticated => "unauthenticated",
        Code::PermissionDenied => "permission_denied",
        Code::Unavailable => "unavailable",
        Code::DeadlineExceeded => "deadline_exceeded",
        _ => "internal",
    }
}

/// Extract bearer token from gRPC request metadata. Metadata keys are
/// lower-cased on the wire, so any casing of `Authorization` matches.
#[allow(clippy::result_large_err)]
pub fn extract_bearer_token<T>(request: &Request<T>) -> Result<String, Status> {
    let token = request
        .metadata()
        .get("authorization")
        .ok_or_else(|| Status::unauthenticated("Missing authorization header"))?
        .to_str()
        .map_err(|_| Status::unauthenticated("Invalid authorization header encoding"))?
        .strip_prefix("Bearer ")
        .ok_or_else(|| Status::unauthenticated("Invalid Bearer token format"))?
        .trim();

    if token.is_empty() {
        return Err(Status::unauthenticated("Invalid Bearer token format"));
    }
    Ok(token.to_string())
}
