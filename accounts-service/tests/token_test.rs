//! Token issue, validation and revocation over gRPC.

mod common;

use accounts_service::grpc::proto::{AccountRole, LogoutRequest, ValidateTokenRequest};
use accounts_service::services::SessionStore;
use common::{login, register, spawn_app, with_bearer};
use service_core::grpc::{AccountsClient, ChannelConfig, Deadline, TokenValidator};
use service_core::identity::Role;
use tonic::Code;

#[tokio::test]
async fn register_login_validate_yields_same_subject() {
    let mut app = spawn_app().await;
    let account = register(&mut app.client, "a@x.com", AccountRole::Operation).await;
    let token = login(&mut app.client, "a@x.com").await;

    let response = app
        .client
        .validate_token(ValidateTokenRequest { token })
        .await
        .unwrap()
        .into_inner();

    assert!(response.valid);
    assert_eq!(response.subject_id, account.id);
    assert_eq!(response.role, AccountRole::Operation as i32);
    assert_eq!(response.email, "a@x.com");
}

#[tokio::test]
async fn evicted_session_is_permission_denied() {
    let mut app = spawn_app().await;
    let account = register(&mut app.client, "a@x.com", AccountRole::Operation).await;
    let token = login(&mut app.client, "a@x.com").await;

    app.sessions.evict(account.id).await.unwrap();

    let status = app
        .client
        .validate_token(ValidateTokenRequest { token })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);
}

#[tokio::test]
async fn garbage_token_is_unauthenticated() {
    let mut app = spawn_app().await;

    let status = app
        .client
        .validate_token(ValidateTokenRequest {
            token: "not.a.token".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);
}

#[tokio::test]
async fn deactivated_account_token_is_permission_denied() {
    let mut app = spawn_app().await;
    let account = register(&mut app.client, "a@x.com", AccountRole::Operation).await;
    let token = login(&mut app.client, "a@x.com").await;

    app.credentials.set_active(account.id, false);

    let status = app
        .client
        .validate_token(ValidateTokenRequest { token })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);
}

#[tokio::test]
async fn logout_revokes_outstanding_tokens() {
    let mut app = spawn_app().await;
    register(&mut app.client, "a@x.com", AccountRole::Operation).await;
    let token = login(&mut app.client, "a@x.com").await;

    app.client
        .logout(with_bearer(LogoutRequest {}, &token))
        .await
        .unwrap();

    let status = app
        .client
        .validate_token(ValidateTokenRequest {
            token: token.clone(),
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);

    let status = app
        .client
        .logout(with_bearer(LogoutRequest {}, &token))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);
}

#[tokio::test]
async fn login_fails_when_session_cache_is_down() {
    let mut app = spawn_app().await;
    register(&mut app.client, "a@x.com", AccountRole::Operation).await;

    app.sessions
        .unavailable
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let status = app
        .client
        .login(accounts_service::grpc::proto::LoginRequest {
            email: "a@x.com".to_string(),
            password: "pw".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unavailable);
}

#[tokio::test]
async fn remote_validator_returns_identity() {
    let mut app = spawn_app().await;
    let account = register(&mut app.client, "a@x.com", AccountRole::Operation).await;
    let token = login(&mut app.client, "a@x.com").await;

    let validator = AccountsClient::connect(&ChannelConfig::new(app.grpc_addr.clone()))
        .await
        .unwrap();
    let identity = validator.validate(&token, Deadline::none()).await.unwrap();

    assert_eq!(identity.subject_id, account.id.to_string());
    assert_eq!(identity.role, Role::Operation);

    let status = validator
        .validate("garbage", Deadline::none())
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);
}
