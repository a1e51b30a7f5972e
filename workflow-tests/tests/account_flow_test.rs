//! Token lifecycle as seen from the other services.

mod common;

use accounts_service::services::SessionStore;
use std::sync::atomic::Ordering;
use tonic::Code;
use workflow_tests::proto::accounts::{AccountRole, RegisterRequest, ValidateTokenRequest};
use workflow_tests::proto::catalog::ListBooksRequest;
use workflow_tests::proto::loans::HistoryRequest;
use workflow_tests::with_bearer;

#[tokio::test]
async fn register_login_validate() {
    let mut ctx = common::setup().await;
    let (id, token) = ctx
        .sign_up("a@x.com", AccountRole::Unspecified)
        .await
        .unwrap();

    let validated = ctx
        .accounts
        .validate_token(ValidateTokenRequest { token })
        .await
        .unwrap()
        .into_inner();

    assert!(validated.valid);
    assert_eq!(validated.subject_id, id);
    assert_eq!(validated.role, AccountRole::Operation as i32);
}

#[tokio::test]
async fn duplicate_registration_is_already_exists() {
    let mut ctx = common::setup().await;
    ctx.register("a@x.com", AccountRole::Operation).await.unwrap();

    let status = ctx
        .accounts
        .register(RegisterRequest {
            name: "again".to_string(),
            email: "a@x.com".to_string(),
            password: "other".to_string(),
            role: AccountRole::Operation as i32,
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::AlreadyExists);
}

#[tokio::test]
async fn token_from_accounts_opens_catalog_and_loans() {
    let mut ctx = common::setup().await;
    let (id, token) = ctx
        .sign_up("reader@x.com", AccountRole::Operation)
        .await
        .unwrap();

    ctx.catalog
        .list_books(with_bearer(ListBooksRequest {}, &token))
        .await
        .unwrap();
    let history = ctx
        .loans
        .history(with_bearer(
            HistoryRequest {
                user_id: id.to_string(),
            },
            &token,
        ))
        .await
        .unwrap()
        .into_inner();
    assert!(history.transactions.is_empty());
}

#[tokio::test]
async fn evicted_session_is_refused_everywhere() {
    let mut ctx = common::setup().await;
    let (id, token) = ctx
        .sign_up("reader@x.com", AccountRole::Operation)
        .await
        .unwrap();

    ctx.mesh.sessions.evict(id).await.unwrap();

    let status = ctx
        .catalog
        .list_books(with_bearer(ListBooksRequest {}, &token))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);

    let status = ctx
        .loans
        .history(with_bearer(
            HistoryRequest {
                user_id: id.to_string(),
            },
            &token,
        ))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);
}

#[tokio::test]
async fn forged_token_is_unauthenticated() {
    let mut ctx = common::setup().await;

    let status = ctx
        .catalog
        .list_books(with_bearer(ListBooksRequest {}, "not-a-jwt"))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);
}

#[tokio::test]
async fn session_cache_outage_is_unavailable_downstream() {
    let mut ctx = common::setup().await;
    let (_, token) = ctx
        .sign_up("reader@x.com", AccountRole::Operation)
        .await
        .unwrap();

    ctx.mesh.sessions.unavailable.store(true, Ordering::SeqCst);

    let status = ctx
        .catalog
        .list_books(with_bearer(ListBooksRequest {}, &token))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unavailable);
}
