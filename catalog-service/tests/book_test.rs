//! Book catalog integration tests.

mod common;

use catalog_service::grpc::proto::{
    GetBookRequest, HealthCheckRequest, ListBooksRequest, RecommendRequest, UpdateBookRequest,
};
use common::{create_book, spawn_app, with_bearer, ADMIN_TOKEN, OUTAGE_TOKEN, USER_TOKEN};
use tonic::Code;

#[tokio::test]
async fn create_then_get_round_trips() {
    let mut app = spawn_app().await;
    let created = create_book(&mut app.client, "Dune", 2).await;

    let fetched = app
        .client
        .get_book(with_bearer(
            GetBookRequest {
                id: created.id.clone(),
            },
            USER_TOKEN,
        ))
        .await
        .unwrap()
        .into_inner();

    assert_eq!(fetched.title, "Dune");
    assert_eq!(fetched.stock, 2);
}

#[tokio::test]
async fn unknown_book_is_not_found() {
    let mut app = spawn_app().await;

    let status = app
        .client
        .get_book(with_bearer(
            GetBookRequest {
                id: "nope".to_string(),
            },
            USER_TOKEN,
        ))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);
}

#[tokio::test]
async fn requests_without_token_are_unauthenticated() {
    let mut app = spawn_app().await;

    let status = app.client.list_books(ListBooksRequest {}).await.unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);

    let status = app
        .client
        .list_books(with_bearer(ListBooksRequest {}, "forged"))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);
}

#[tokio::test]
async fn accounts_outage_is_unavailable() {
    let mut app = spawn_app().await;

    let status = app
        .client
        .list_books(with_bearer(ListBooksRequest {}, OUTAGE_TOKEN))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unavailable);
}

#[tokio::test]
async fn list_is_newest_first() {
    let mut app = spawn_app().await;
    create_book(&mut app.client, "First", 1).await;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    create_book(&mut app.client, "Second", 1).await;

    let books = app
        .client
        .list_books(with_bearer(ListBooksRequest {}, USER_TOKEN))
        .await
        .unwrap()
        .into_inner()
        .books;

    let titles: Vec<_> = books.iter().map(|b| b.title.as_str()).collect();
    assert_eq!(titles, vec!["Second", "First"]);
}

#[tokio::test]
async fn recommend_returns_only_books_in_stock() {
    let mut app = spawn_app().await;
    create_book(&mut app.client, "Empty", 0).await;
    let stocked = create_book(&mut app.client, "Stocked", 3).await;

    let books = app
        .client
        .recommend(with_bearer(RecommendRequest { limit: 5 }, USER_TOKEN))
        .await
        .unwrap()
        .into_inner()
        .books;

    assert_eq!(books.len(), 1);
    assert_eq!(books[0].id, stocked.id);
}

#[tokio::test]
async fn update_book_is_admin_only() {
    let mut app = spawn_app().await;
    let book = create_book(&mut app.client, "Dune", 1).await;
    let update = UpdateBookRequest {
        id: book.id.clone(),
        title: Some("Dune Messiah".to_string()),
        author: None,
        category: None,
        stock: None,
    };

    let status = app
        .client
        .update_book(with_bearer(update.clone(), USER_TOKEN))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);

    let updated = app
        .client
        .update_book(with_bearer(update, ADMIN_TOKEN))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(updated.title, "Dune Messiah");
    assert_eq!(updated.stock, 1);
}

#[tokio::test]
async fn health_is_public() {
    let mut app = spawn_app().await;

    let report = app
        .client
        .health(HealthCheckRequest {})
        .await
        .unwrap()
        .into_inner();
    assert_eq!(report.status, "HEALTHY");
    assert_eq!(report.components[0].name, "database");
}
