//! Account registration, login and profile integration tests.

mod common;

use accounts_service::grpc::proto::{
    AccountRole, GetAccountRequest, HealthCheckRequest, LoginRequest, RegisterRequest,
    UpdateAccountRequest,
};
use common::{login, register, spawn_app, spawn_app_with, with_bearer};
use tonic::Code;

#[tokio::test]
async fn register_hashes_password_and_defaults_to_operation() {
    let mut app = spawn_app().await;

    let account = app
        .client
        .register(RegisterRequest {
            name: "A".to_string(),
            email: "a@x.com".to_string(),
            password: "pw".to_string(),
            role: AccountRole::Unspecified as i32,
        })
        .await
        .unwrap()
        .into_inner();

    assert_eq!(account.email, "a@x.com");
    assert_eq!(account.role, AccountRole::Operation as i32);
    assert!(account.active);
}

#[tokio::test]
async fn duplicate_registration_is_already_exists_without_mutation() {
    let mut app = spawn_app().await;
    register(&mut app.client, "a@x.com", AccountRole::Operation).await;

    let status = app
        .client
        .register(RegisterRequest {
            name: "Other".to_string(),
            email: "a@x.com".to_string(),
            password: "other".to_string(),
            role: AccountRole::Operation as i32,
        })
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::AlreadyExists);
    assert_eq!(app.credentials.len(), 1);
}

#[tokio::test]
async fn invalid_registration_is_invalid_argument() {
    let mut app = spawn_app().await;

    let status = app
        .client
        .register(RegisterRequest {
            name: "A".to_string(),
            email: "not-an-email".to_string(),
            password: "pw".to_string(),
            role: AccountRole::Operation as i32,
        })
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::InvalidArgument);
    assert!(app.credentials.is_empty());
}

#[tokio::test]
async fn admin_self_registration_is_denied_unless_enabled() {
    let mut app = spawn_app().await;
    let status = app
        .client
        .register(RegisterRequest {
            name: "Root".to_string(),
            email: "root@x.com".to_string(),
            password: "pw".to_string(),
            role: AccountRole::Admin as i32,
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);

    let mut app = spawn_app_with(true).await;
    let admin = register(&mut app.client, "root@x.com", AccountRole::Admin).await;
    assert_eq!(admin.role, AccountRole::Admin as i32);
}

#[tokio::test]
async fn wrong_password_is_unauthenticated() {
    let mut app = spawn_app().await;
    register(&mut app.client, "a@x.com", AccountRole::Operation).await;

    let status = app
        .client
        .login(LoginRequest {
            email: "a@x.com".to_string(),
            password: "wrong".to_string(),
        })
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::Unauthenticated);
}

#[tokio::test]
async fn get_requires_bearer_token() {
    let mut app = spawn_app().await;
    let account = register(&mut app.client, "a@x.com", AccountRole::Operation).await;

    let status = app
        .client
        .get(GetAccountRequest { id: account.id })
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::Unauthenticated);
}

#[tokio::test]
async fn ownership_is_enforced_on_get_and_update() {
    let mut app = spawn_app_with(true).await;
    let a = register(&mut app.client, "a@x.com", AccountRole::Operation).await;
    let b = register(&mut app.client, "b@x.com", AccountRole::Operation).await;
    register(&mut app.client, "root@x.com", AccountRole::Admin).await;

    let token_a = login(&mut app.client, "a@x.com").await;
    let token_admin = login(&mut app.client, "root@x.com").await;

    // A targeting B
    let status = app
        .client
        .get(with_bearer(GetAccountRequest { id: b.id }, &token_a))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);

    let status = app
        .client
        .update(with_bearer(
            UpdateAccountRequest {
                id: b.id,
                name: Some("Mallory".to_string()),
                email: None,
            },
            &token_a,
        ))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);

    // A targeting A
    let own = app
        .client
        .get(with_bearer(GetAccountRequest { id: a.id }, &token_a))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(own.email, "a@x.com");

    // Admin targeting anyone
    let other = app
        .client
        .get(with_bearer(GetAccountRequest { id: b.id }, &token_admin))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(other.email, "b@x.com");
}

#[tokio::test]
async fn update_changes_only_given_fields() {
    let mut app = spawn_app().await;
    let a = register(&mut app.client, "a@x.com", AccountRole::Operation).await;
    let token = login(&mut app.client, "a@x.com").await;

    let updated = app
        .client
        .update(with_bearer(
            UpdateAccountRequest {
                id: a.id,
                name: Some("Alice".to_string()),
                email: None,
            },
            &token,
        ))
        .await
        .unwrap()
        .into_inner();

    assert_eq!(updated.name, "Alice");
    assert_eq!(updated.email, "a@x.com");
}

#[tokio::test]
async fn update_to_taken_email_is_already_exists() {
    let mut app = spawn_app().await;
    register(&mut app.client, "a@x.com", AccountRole::Operation).await;
    let b = register(&mut app.client, "b@x.com", AccountRole::Operation).await;
    let token_b = login(&mut app.client, "b@x.com").await;

    let status = app
        .client
        .update(with_bearer(
            UpdateAccountRequest {
                id: b.id,
                name: None,
                email: Some("a@x.com".to_string()),
            },
            &token_b,
        ))
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::AlreadyExists);
}

#[tokio::test]
async fn health_reports_cache_outage() {
    let mut app = spawn_app().await;

    let healthy = app
        .client
        .health(HealthCheckRequest {})
        .await
        .unwrap()
        .into_inner();
    assert_eq!(healthy.status, "HEALTHY");
    assert_eq!(healthy.components.len(), 2);

    app.sessions
        .unavailable
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let report = app
        .client
        .health(HealthCheckRequest {})
        .await
        .unwrap()
        .into_inner();
    assert_eq!(report.status, "UNHEALTHY");
    let cache = report
        .components
        .iter()
        .find(|c| c.name == "cache")
        .unwrap();
    assert_eq!(cache.status, "DOWN");
}
