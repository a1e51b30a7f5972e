//! Common test utilities for catalog-service integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use catalog_service::grpc::proto::{
    catalog_service_client::CatalogServiceClient, BookResponse, CreateBookRequest,
};
use catalog_service::services::InMemoryBookStore;
use catalog_service::startup::{AppState, Application};
use service_core::config::Config as CommonConfig;
use service_core::grpc::{Deadline, TokenValidator};
use service_core::identity::{Identity, Role};
use std::sync::{Arc, Once};
use tonic::transport::Channel;
use tonic::{Request, Status};

pub const ADMIN_TOKEN: &str = "admin-token";
pub const USER_TOKEN: &str = "user-token";
/// Makes the validator behave as if accounts were down.
pub const OUTAGE_TOKEN: &str = "outage-token";

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,catalog_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Stands in for the accounts service.
pub struct StaticValidator;

#[async_trait]
impl TokenValidator for StaticValidator {
    async fn validate(&self, token: &str, _deadline: Deadline) -> Result<Identity, Status> {
        match token {
            ADMIN_TOKEN => Ok(Identity::new("1", Role::Admin)),
            USER_TOKEN => Ok(Identity::new("2", Role::Operation)),
            OUTAGE_TOKEN => Err(Status::unavailable("connection refused")),
            _ => Err(Status::unauthenticated("invalid token")),
        }
    }
}

pub struct TestApp {
    pub client: CatalogServiceClient<Channel>,
    pub store: Arc<InMemoryBookStore>,
}

pub async fn spawn_app() -> TestApp {
    init_tracing();

    let store = Arc::new(InMemoryBookStore::new());
    let state = AppState::new(store.clone(), Arc::new(StaticValidator));

    let app = Application::with_state(&CommonConfig { port: 0 }, state)
        .await
        .expect("Failed to build application");
    let grpc_addr = format!("http://127.0.0.1:{}", app.grpc_port());

    tokio::spawn(async move {
        app.run_until_stopped().await.ok();
    });

    let client = {
        let mut attempts = 0;
        loop {
            match CatalogServiceClient::connect(grpc_addr.clone()).await {
                Ok(client) => break client,
                Err(_) if attempts < 20 => {
                    attempts += 1;
                    tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
                }
                Err(e) => panic!("Failed to connect gRPC client after 20 attempts: {}", e),
            }
        }
    };

    TestApp { client, store }
}

pub fn with_bearer<T>(message: T, token: &str) -> Request<T> {
    let mut request = Request::new(message);
    request.metadata_mut().insert(
        "authorization",
        format!("Bearer {}", token).parse().expect("valid header"),
    );
    request
}

pub async fn create_book(
    client: &mut CatalogServiceClient<Channel>,
    title: &str,
    stock: i32,
) -> BookResponse {
    client
        .create(with_bearer(
            CreateBookRequest {
                title: title.to_string(),
                author: "Author".to_string(),
                category: "fiction".to_string(),
                stock,
            },
            USER_TOKEN,
        ))
        .await
        .expect("Failed to create book")
        .into_inner()
}
