//! The loans service's own identity toward the catalog.
//!
//! Stock adjustments are admin-only on the catalog side, so loans presents a
//! bearer for its configured service account instead of the end user's.
//! The bearer is reused until shortly before it expires or until the catalog
//! refuses it.

use async_trait::async_trait;
use service_core::grpc::{AccountsClient, LoginToken, Status};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info};

/// Renew this long before the server-side expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(30);
/// Reuse window when the login response carried no expiry.
const DEFAULT_REUSE: Duration = Duration::from_secs(60);

/// Source of the bearer presented on service-to-service calls.
#[async_trait]
pub trait ServiceCredentials: Send + Sync {
    async fn bearer(&self) -> Result<String, Status>;

    /// Forget a bearer that was refused, so the next call logs in again.
    fn invalidate(&self) {}
}

/// One login round trip.
#[async_trait]
pub trait ServiceLogin: Send + Sync {
    async fn login(&self) -> Result<LoginToken, Status>;
}

/// Logs in to the accounts service with a fixed email and password.
pub struct AccountLogin {
    client: AccountsClient,
    email: String,
    password: String,
}

impl AccountLogin {
    pub fn new(client: AccountsClient, email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            client,
            email: email.into(),
            password: password.into(),
        }
    }
}

#[async_trait]
impl ServiceLogin for AccountLogin {
    async fn login(&self) -> Result<LoginToken, Status> {
        self.client.login(&self.email, &self.password).await
    }
}

/// How long a freshly issued bearer may be reused.
pub fn reuse_window(expires_at: Option<SystemTime>, now: SystemTime) -> Duration {
    match expires_at {
        Some(at) => at
            .duration_since(now)
            .unwrap_or(Duration::ZERO)
            .saturating_sub(EXPIRY_MARGIN),
        None => DEFAULT_REUSE,
    }
}

struct CachedBearer {
    token: String,
    renew_at: Instant,
}

/// Caches the bearer of a [`ServiceLogin`]. Concurrent callers that find no
/// usable bearer share a single login.
pub struct CachedLogin<L> {
    login: L,
    cached: Mutex<Option<CachedBearer>>,
    refresh: tokio::sync::Mutex<()>,
}

impl<L: ServiceLogin> CachedLogin<L> {
    pub fn new(login: L) -> Self {
        Self {
            login,
            cached: Mutex::new(None),
            refresh: tokio::sync::Mutex::new(()),
        }
    }

    fn current(&self) -> Option<String> {
        let cached = self.lock();
        cached
            .as_ref()
            .filter(|c| Instant::now() < c.renew_at)
            .map(|c| c.token.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<CachedBearer>> {
        self.cached.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl<L: ServiceLogin> ServiceCredentials for CachedLogin<L> {
    async fn bearer(&self) -> Result<String, Status> {
        if let Some(token) = self.current() {
            return Ok(token);
        }

        let _guard = self.refresh.lock().await;
        if let Some(token) = self.current() {
            return Ok(token);
        }

        let issued = self.login.login().await?;
        let window = reuse_window(issued.expires_at, SystemTime::now());
        info!(reuse_secs = window.as_secs(), "Service account signed in");
        *self.lock() = Some(CachedBearer {
            token: issued.token.clone(),
            renew_at: Instant::now() + window,
        });
        Ok(issued.token)
    }

    fn invalidate(&self) {
        debug!("Dropping cached service bearer");
        *self.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingLogin {
        calls: Arc<AtomicUsize>,
        lifetime: Option<Duration>,
    }

    #[async_trait]
    impl ServiceLogin for CountingLogin {
        async fn login(&self) -> Result<LoginToken, Status> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(LoginToken {
                token: format!("token-{}", n),
                expires_at: self.lifetime.map(|l| SystemTime::now() + l),
            })
        }
    }

    fn cached(lifetime: Option<Duration>) -> (CachedLogin<CountingLogin>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let login = CountingLogin {
            calls: calls.clone(),
            lifetime,
        };
        (CachedLogin::new(login), calls)
    }

    #[test]
    fn test_reuse_window() {
        let now = SystemTime::now();
        assert_eq!(
            reuse_window(Some(now + Duration::from_secs(3600)), now),
            Duration::from_secs(3570)
        );
        assert_eq!(reuse_window(Some(now + Duration::from_secs(10)), now), Duration::ZERO);
        assert_eq!(reuse_window(Some(now - Duration::from_secs(10)), now), Duration::ZERO);
        assert_eq!(reuse_window(None, now), DEFAULT_REUSE);
    }

    #[tokio::test]
    async fn test_bearer_is_reused_until_invalidated() {
        let (credentials, calls) = cached(Some(Duration::from_secs(3600)));

        assert_eq!(credentials.bearer().await.unwrap(), "token-1");
        assert_eq!(credentials.bearer().await.unwrap(), "token-1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        credentials.invalidate();
        assert_eq!(credentials.bearer().await.unwrap(), "token-2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_nearly_expired_bearer_is_renewed() {
        let (credentials, calls) = cached(Some(Duration::from_secs(5)));

        credentials.bearer().await.unwrap();
        credentials.bearer().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_login() {
        let (credentials, calls) = cached(Some(Duration::from_secs(3600)));

        let (a, b) = tokio::join!(credentials.bearer(), credentials.bearer());
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
