//! Common test utilities for accounts-service integration tests.

#![allow(dead_code)]

use accounts_service::config::JwtConfig;
use accounts_service::grpc::proto::{
    accounts_service_client::AccountsServiceClient, AccountResponse, AccountRole, LoginRequest,
    RegisterRequest,
};
use accounts_service::services::{InMemoryCredentialStore, MockSessionStore};
use accounts_service::startup::{AppState, Application};
use service_core::config::Config as CommonConfig;
use std::sync::{Arc, Once};
use tonic::transport::Channel;
use tonic::Request;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,accounts_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub struct TestApp {
    pub client: AccountsServiceClient<Channel>,
    pub grpc_addr: String,
    pub http_port: u16,
    pub credentials: Arc<InMemoryCredentialStore>,
    pub sessions: Arc<MockSessionStore>,
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(false).await
}

/// Spawn the service on OS-assigned ports over in-memory stores.
pub async fn spawn_app_with(allow_admin_registration: bool) -> TestApp {
    init_tracing();

    let credentials = Arc::new(InMemoryCredentialStore::new());
    let sessions = Arc::new(MockSessionStore::new());
    let jwt = JwtConfig {
        secret: "integration-test-secret".to_string(),
        token_lifetime_minutes: 60,
    };
    let state = AppState::new(
        &jwt,
        credentials.clone(),
        sessions.clone(),
        allow_admin_registration,
    );

    let app = Application::with_state(&CommonConfig { port: 0 }, state)
        .await
        .expect("Failed to build application");

    let http_port = app.http_port();
    let grpc_addr = format!("http://127.0.0.1:{}", app.grpc_port());

    tokio::spawn(async move {
        app.run_until_stopped().await.ok();
    });

    let client = {
        let mut attempts = 0;
        loop {
            match AccountsServiceClient::connect(grpc_addr.clone()).await {
                Ok(client) => break client,
                Err(_) if attempts < 20 => {
                    attempts += 1;
                    tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
                }
                Err(e) => panic!("Failed to connect gRPC client after 20 attempts: {}", e),
            }
        }
    };

    TestApp {
        client,
        grpc_addr,
        http_port,
        credentials,
        sessions,
    }
}

/// Wrap a message with `authorization: Bearer <token>`.
pub fn with_bearer<T>(message: T, token: &str) -> Request<T> {
    let mut request = Request::new(message);
    request.metadata_mut().insert(
        "authorization",
        format!("Bearer {}", token).parse().expect("valid header"),
    );
    request
}

pub async fn register(
    client: &mut AccountsServiceClient<Channel>,
    email: &str,
    role: AccountRole,
) -> AccountResponse {
    client
        .register(RegisterRequest {
            name: "Test".to_string(),
            email: email.to_string(),
            password: "pw".to_string(),
            role: role as i32,
        })
        .await
        .expect("Failed to register")
        .into_inner()
}

pub async fn login(client: &mut AccountsServiceClient<Channel>, email: &str) -> String {
    client
        .login(LoginRequest {
            email: email.to_string(),
            password: "pw".to_string(),
        })
        .await
        .expect("Failed to login")
        .into_inner()
        .token
}
