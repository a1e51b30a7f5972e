//! Cross-service workflow integration tests library.
//!
//! Runs accounts, catalog and loans in-process on OS-assigned ports, wired
//! to each other over real gRPC channels the way they are in production.
//! Storage is in memory, so no Postgres or Redis is needed.
//!
//! ## Usage
//!
//! ```bash
//! cargo test -p workflow-tests
//! ```

use accounts_service::config::{InitialAdmin, JwtConfig};
use accounts_service::services::{InMemoryCredentialStore, MockSessionStore};
use anyhow::{anyhow, Result};
use catalog_service::services::InMemoryBookStore;
use loans_service::services::{
    AccountLogin, CachedLogin, CatalogStockLedger, InMemoryLoanStore,
};
use service_core::config::Config as CommonConfig;
use service_core::grpc::{AccountsClient, CatalogClient, ChannelConfig};
use std::sync::{Arc, Once};
use std::time::Duration;
use tonic::transport::Channel;
use tonic::Request;

pub use loans_service::grpc::proto::loans_service_client::LoansServiceClient;
pub use service_core::grpc::proto::accounts::accounts_service_client::AccountsServiceClient;
pub use service_core::grpc::proto::catalog::catalog_service_client::CatalogServiceClient;

// Re-export proto modules for request/response types
pub mod proto {
    pub mod accounts {
        pub use service_core::grpc::proto::accounts::*;
    }
    pub mod catalog {
        pub use service_core::grpc::proto::catalog::*;
    }
    pub mod loans {
        pub use loans_service::grpc::proto::*;
    }
}

use proto::accounts::{AccountResponse, AccountRole, LoginRequest, RegisterRequest};

/// Password every test account is registered with.
pub const TEST_PASSWORD: &str = "pw";
/// Admin account the loans service signs in as to change stock.
pub const LOANS_SERVICE_EMAIL: &str = "loans-service@library.local";

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,workflow_tests=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Where the running services listen.
#[derive(Debug, Clone)]
pub struct ServiceEndpoints {
    pub accounts: String,
    pub catalog: String,
    pub loans: String,
    http_ports: Vec<(&'static str, u16)>,
}

impl ServiceEndpoints {
    /// Liveness URLs for all services.
    pub fn health_urls(&self) -> Vec<(&'static str, String)> {
        self.urls("health")
    }

    /// Readiness URLs for all services.
    pub fn ready_urls(&self) -> Vec<(&'static str, String)> {
        self.urls("ready")
    }

    fn urls(&self, path: &str) -> Vec<(&'static str, String)> {
        self.http_ports
            .iter()
            .map(|(name, port)| (*name, format!("http://127.0.0.1:{}/{}", port, path)))
            .collect()
    }
}

/// The three services running in this process, plus handles on their
/// in-memory stores.
pub struct Mesh {
    pub endpoints: ServiceEndpoints,
    pub sessions: Arc<MockSessionStore>,
    pub books: Arc<InMemoryBookStore>,
    pub loans: Arc<InMemoryLoanStore>,
}

fn grpc_url(port: u16) -> String {
    format!("http://127.0.0.1:{}", port)
}

fn serve<F>(name: &'static str, server: F)
where
    F: std::future::Future<Output = std::io::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = server.await {
            tracing::error!(service = name, error = %e, "Service stopped");
        }
    });
}

impl Mesh {
    /// Start accounts, then catalog and loans pointed at it. Admin
    /// registration is enabled so tests can create admin accounts, and the
    /// loans service account is seeded before loans starts.
    pub async fn start() -> Result<Self> {
        init_tracing();
        let common = CommonConfig { port: 0 };

        let sessions = Arc::new(MockSessionStore::new());
        let jwt = JwtConfig {
            secret: "workflow-test-secret".to_string(),
            token_lifetime_minutes: 60,
        };
        let accounts_state = accounts_service::startup::AppState::new(
            &jwt,
            Arc::new(InMemoryCredentialStore::new()),
            sessions.clone(),
            true,
        );
        let service_account = InitialAdmin {
            email: LOANS_SERVICE_EMAIL.to_string(),
            password: TEST_PASSWORD.to_string(),
        };
        accounts_state
            .accounts
            .seed_admin(&service_account)
            .await
            .map_err(|e| anyhow!("Failed to seed the loans service account: {}", e))?;
        let accounts_app = accounts_service::startup::Application::with_state(&common, accounts_state)
            .await
            .map_err(|e| anyhow!("Failed to build accounts-service: {}", e))?;
        let accounts_url = grpc_url(accounts_app.grpc_port());
        let accounts_http = accounts_app.http_port();
        serve("accounts-service", accounts_app.run_until_stopped());

        let books = Arc::new(InMemoryBookStore::new());
        let catalog_validator = AccountsClient::connect(&ChannelConfig::new(&accounts_url))
            .await
            .map_err(|e| anyhow!("Failed to connect catalog to accounts-service: {}", e))?;
        let catalog_state =
            catalog_service::startup::AppState::new(books.clone(), Arc::new(catalog_validator));
        let catalog_app = catalog_service::startup::Application::with_state(&common, catalog_state)
            .await
            .map_err(|e| anyhow!("Failed to build catalog-service: {}", e))?;
        let catalog_url = grpc_url(catalog_app.grpc_port());
        let catalog_http = catalog_app.http_port();
        serve("catalog-service", catalog_app.run_until_stopped());

        let loans = Arc::new(InMemoryLoanStore::new());
        let catalog_client = CatalogClient::connect(&ChannelConfig::new(&catalog_url))
            .await
            .map_err(|e| anyhow!("Failed to connect loans to catalog-service: {}", e))?;
        let loans_validator = AccountsClient::connect(&ChannelConfig::new(&accounts_url))
            .await
            .map_err(|e| anyhow!("Failed to connect loans to accounts-service: {}", e))?;
        let credentials = Arc::new(CachedLogin::new(AccountLogin::new(
            loans_validator.clone(),
            service_account.email,
            service_account.password,
        )));
        let loans_state = loans_service::startup::AppState::new(
            loans.clone(),
            Arc::new(CatalogStockLedger::new(catalog_client, credentials)),
            Arc::new(loans_validator),
        );
        let loans_app = loans_service::startup::Application::with_state(&common, loans_state)
            .await
            .map_err(|e| anyhow!("Failed to build loans-service: {}", e))?;
        let loans_url = grpc_url(loans_app.grpc_port());
        let loans_http = loans_app.http_port();
        serve("loans-service", loans_app.run_until_stopped());

        Ok(Self {
            endpoints: ServiceEndpoints {
                accounts: accounts_url,
                catalog: catalog_url,
                loans: loans_url,
                http_ports: vec![
                    ("accounts", accounts_http),
                    ("catalog", catalog_http),
                    ("loans", loans_http),
                ],
            },
            sessions,
            books,
            loans,
        })
    }
}

/// Context for workflow tests with a client for every service.
pub struct WorkflowTestContext {
    pub mesh: Mesh,
    /// Auth token for authenticated requests
    pub auth_token: Option<String>,

    pub accounts: AccountsServiceClient<Channel>,
    pub catalog: CatalogServiceClient<Channel>,
    pub loans: LoansServiceClient<Channel>,
}

impl WorkflowTestContext {
    /// Connect clients to a running mesh.
    pub async fn new(mesh: Mesh) -> Result<Self> {
        let accounts = AccountsServiceClient::connect(mesh.endpoints.accounts.clone())
            .await
            .map_err(|e| anyhow!("Failed to connect to accounts-service: {}", e))?;

        let catalog = CatalogServiceClient::connect(mesh.endpoints.catalog.clone())
            .await
            .map_err(|e| anyhow!("Failed to connect to catalog-service: {}", e))?;

        let loans = LoansServiceClient::connect(mesh.endpoints.loans.clone())
            .await
            .map_err(|e| anyhow!("Failed to connect to loans-service: {}", e))?;

        Ok(Self {
            mesh,
            auth_token: None,
            accounts,
            catalog,
            loans,
        })
    }

    /// Wrap a message, adding the Bearer token when one is set.
    pub fn with_auth<T>(&self, message: T) -> Request<T> {
        match &self.auth_token {
            Some(token) => with_bearer(message, token),
            None => Request::new(message),
        }
    }

    /// Set the auth token for this context.
    pub fn set_auth_token(&mut self, token: String) {
        self.auth_token = Some(token);
    }

    pub async fn register(&mut self, email: &str, role: AccountRole) -> Result<AccountResponse> {
        let response = self
            .accounts
            .register(Request::new(RegisterRequest {
                name: email.split('@').next().unwrap_or(email).to_string(),
                email: email.to_string(),
                password: TEST_PASSWORD.to_string(),
                role: role as i32,
            }))
            .await
            .map_err(|s| anyhow!("Register {} failed: {}", email, s))?;
        Ok(response.into_inner())
    }

    pub async fn login(&mut self, email: &str) -> Result<String> {
        let response = self
            .accounts
            .login(Request::new(LoginRequest {
                email: email.to_string(),
                password: TEST_PASSWORD.to_string(),
            }))
            .await
            .map_err(|s| anyhow!("Login {} failed: {}", email, s))?;
        Ok(response.into_inner().token)
    }

    /// Register and log in, returning the account id and its token.
    pub async fn sign_up(&mut self, email: &str, role: AccountRole) -> Result<(i64, String)> {
        let account = self.register(email, role).await?;
        let token = self.login(email).await?;
        Ok((account.id, token))
    }
}

/// Attach `Bearer <token>` to a message.
pub fn with_bearer<T>(message: T, token: &str) -> Request<T> {
    let mut request = Request::new(message);
    if let Ok(value) = format!("Bearer {}", token).parse() {
        request.metadata_mut().insert("authorization", value);
    }
    request
}

/// Wait for all services to be healthy.
///
/// Polls health endpoints until all services respond with 200 OK.
/// Times out after the specified duration.
pub async fn wait_for_services(endpoints: &ServiceEndpoints, timeout: Duration) -> Result<()> {
    let health_urls = endpoints.health_urls();
    let client = reqwest::Client::new();
    let start = std::time::Instant::now();

    tracing::info!("Waiting for {} services to be healthy...", health_urls.len());

    loop {
        let mut unhealthy_services = Vec::new();

        for (name, url) in &health_urls {
            match client.get(url).timeout(Duration::from_secs(2)).send().await {
                Ok(resp) if resp.status().is_success() => {}
                Ok(resp) => {
                    unhealthy_services.push(format!("{} (status: {})", name, resp.status()));
                }
                Err(e) => {
                    unhealthy_services.push(format!("{} (error: {})", name, e));
                }
            }
        }

        if unhealthy_services.is_empty() {
            tracing::info!("All services are healthy");
            return Ok(());
        }

        if start.elapsed() > timeout {
            return Err(anyhow!(
                "Timeout waiting for services. Unhealthy: {}",
                unhealthy_services.join(", ")
            ));
        }

        tracing::debug!("Waiting for services: {}", unhealthy_services.join(", "));
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
