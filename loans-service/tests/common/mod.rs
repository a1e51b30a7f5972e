//! Common test utilities for loans-service integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use loans_service::grpc::proto::{
    loans_service_client::LoansServiceClient, BorrowRequest, LoanResponse,
};
use loans_service::services::{InMemoryLoanStore, InMemoryStockLedger};
use loans_service::startup::{AppState, Application};
use service_core::config::Config as CommonConfig;
use service_core::grpc::{Deadline, TokenValidator};
use service_core::identity::{Identity, Role};
use std::sync::{Arc, Once};
use tonic::transport::Channel;
use tonic::{Request, Status};

pub const ADMIN_TOKEN: &str = "admin-token";
/// Account 2.
pub const ALICE_TOKEN: &str = "alice-token";
/// Account 3.
pub const BOB_TOKEN: &str = "bob-token";

pub const ALICE: &str = "2";
pub const BOB: &str = "3";

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,loans_service=debug")
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
            ALICE_TOKEN => Ok(Identity::new(ALICE, Role::Operation)),
            BOB_TOKEN => Ok(Identity::new(BOB, Role::Operation)),
            _ => Err(Status::unauthenticated("invalid token")),
        }
    }
}

pub struct TestApp {
    pub client: LoansServiceClient<Channel>,
    pub loans: Arc<InMemoryLoanStore>,
    pub ledger: Arc<InMemoryStockLedger>,
}

/// Spawn loans over an in-memory store and a ledger holding `books`.
pub async fn spawn_app(books: &[(&str, i32)]) -> TestApp {
    init_tracing();

    let loans = Arc::new(InMemoryLoanStore::new());
    let ledger = Arc::new(InMemoryStockLedger::new());
    for (book_id, stock) in books {
        ledger.set_stock(book_id, *stock);
    }
    let state = AppState::new(loans.clone(), ledger.clone(), Arc::new(StaticValidator));

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
            match LoansServiceClient::connect(grpc_addr.clone()).await {
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
        loans,
        ledger,
    }
}

pub fn with_bearer<T>(message: T, token: &str) -> Request<T> {
    let mut request = Request::new(message);
    request.metadata_mut().insert(
        "authorization",
        format!("Bearer {}", token).parse().expect("valid header"),
    );
    request
}

pub fn borrow_request(user_id: &str, book_id: &str) -> BorrowRequest {
    BorrowRequest {
        user_id: user_id.to_string(),
        book_id: book_id.to_string(),
    }
}

pub async fn borrow(
    client: &mut LoansServiceClient<Channel>,
    token: &str,
    user_id: &str,
    book_id: &str,
) -> Result<LoanResponse, Status> {
    client
        .borrow(with_bearer(borrow_request(user_id, book_id), token))
        .await
        .map(|r| r.into_inner())
}
