use service_core::grpc::{ComponentHealth, HealthReport};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use super::database::BookStore;
use super::error::CatalogError;
use super::metrics::STOCK_ADJUSTMENTS_TOTAL;
use crate::models::{Book, BookChanges, NewBook, StockAdjustment};

pub const DEFAULT_RECOMMEND_LIMIT: i64 = 10;
pub const MAX_RECOMMEND_LIMIT: i64 = 100;

/// Parse a wire book id. An id that cannot name any book is simply not found.
pub fn parse_book_id(id: &str) -> Result<Uuid, CatalogError> {
    if id.is_empty() {
        return Err(CatalogError::InvalidInput("book id is required".to_string()));
    }
    Uuid::parse_str(id).map_err(|_| CatalogError::NotFound)
}

#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn BookStore>,
}

impl CatalogService {
    pub fn new(store: Arc<dyn BookStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, book), fields(title = %book.title))]
    pub async fn create(&self, book: NewBook) -> Result<Book, CatalogError> {
        book.validate()?;
        self.store.create(&book).await
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> Result<Book, CatalogError> {
        let id = parse_book_id(id)?;
        self.store.get(id).await?.ok_or(CatalogError::NotFound)
    }

    pub async fn list(&self) -> Result<Vec<Book>, CatalogError> {
        self.store.list().await
    }

    /// Books currently on the shelf, newest first. A non-positive limit means
    /// the default.
    #[instrument(skip(self))]
    pub async fn recommend(&self, limit: i32) -> Result<Vec<Book>, CatalogError> {
        let limit = if limit <= 0 {
            DEFAULT_RECOMMEND_LIMIT
        } else {
            i64::from(limit).min(MAX_RECOMMEND_LIMIT)
        };
        self.store.list_in_stock(limit).await
    }

    #[instrument(skip(self, changes))]
    pub async fn update(&self, id: &str, changes: BookChanges) -> Result<Book, CatalogError> {
        let id = parse_book_id(id)?;
        changes.validate()?;
        if changes.is_empty() {
            return self.store.get(id).await?.ok_or(CatalogError::NotFound);
        }

        let book = self
            .store
            .update(id, &changes)
            .await?
            .ok_or(CatalogError::NotFound)?;
        info!(book_id = %book.id, "Book updated");
        Ok(book)
    }

    /// Apply a signed stock delta at most once per idempotency key.
    #[instrument(skip(self))]
    pub async fn adjust_stock(
        &self,
        book_id: &str,
        delta: i32,
        idempotency_key: &str,
    ) -> Result<StockAdjustment, CatalogError> {
        let id = parse_book_id(book_id)?;
        if idempotency_key.is_empty() {
            return Err(CatalogError::InvalidInput(
                "idempotency key is required".to_string(),
            ));
        }
        if delta == 0 {
            return Err(CatalogError::InvalidInput("delta must not be zero".to_string()));
        }

        let result = self.store.adjust_stock(id, delta, idempotency_key).await;
        let outcome = match &result {
            Ok(adjustment) if adjustment.replayed => "replayed",
            Ok(_) => "applied",
            Err(CatalogError::InsufficientStock) => "insufficient",
            Err(CatalogError::NotFound) => "not_found",
            Err(CatalogError::KeyReused) => "key_reused",
            Err(_) => "error",
        };
        STOCK_ADJUSTMENTS_TOTAL.with_label_values(&[outcome]).inc();
        result
    }

    /// Check the book store. Never fails.
    pub async fn health(&self) -> HealthReport {
        HealthReport::new(vec![ComponentHealth::from_check(
            "database",
            self.store.ping().await,
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::database::InMemoryBookStore;

    fn service() -> (CatalogService, Arc<InMemoryBookStore>) {
        let store = Arc::new(InMemoryBookStore::new());
        (CatalogService::new(store.clone()), store)
    }

    fn new_book(title: &str, stock: i32) -> NewBook {
        NewBook {
            title: title.to_string(),
            author: "Author".to_string(),
            category: "fiction".to_string(),
            stock,
        }
    }

    #[test]
    fn test_parse_book_id() {
        assert!(matches!(
            parse_book_id(""),
            Err(CatalogError::InvalidInput(_))
        ));
        assert!(matches!(parse_book_id("nope"), Err(CatalogError::NotFound)));
        assert!(parse_book_id(&Uuid::new_v4().to_string()).is_ok());
    }

    #[tokio::test]
    async fn test_create_rejects_negative_stock() {
        let (catalog, _) = service();
        let err = catalog.create(new_book("Dune", -1)).await.unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
    }

    #[tokio::test]
    async fn test_recommend_caps_limit() {
        let (catalog, _) = service();
        for i in 0..3 {
            catalog
                .create(new_book(&format!("Book {}", i), 1))
                .await
                .unwrap();
        }
        catalog.create(new_book("Gone", 0)).await.unwrap();

        assert_eq!(catalog.recommend(0).await.unwrap().len(), 3);
        assert_eq!(catalog.recommend(2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_update_keeps_absent_fields() {
        let (catalog, _) = service();
        let book = catalog.create(new_book("Dune", 1)).await.unwrap();

        let updated = catalog
            .update(
                &book.id.to_string(),
                BookChanges {
                    stock: Some(5),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.stock, 5);
        assert_eq!(updated.title, "Dune");
    }

    #[tokio::test]
    async fn test_adjust_stock_requires_key_and_delta() {
        let (catalog, store) = service();
        let book = catalog.create(new_book("Dune", 1)).await.unwrap();
        let id = book.id.to_string();

        assert!(matches!(
            catalog.adjust_stock(&id, -1, "").await,
            Err(CatalogError::InvalidInput(_))
        ));
        assert!(matches!(
            catalog.adjust_stock(&id, 0, "k").await,
            Err(CatalogError::InvalidInput(_))
        ));
        assert_eq!(store.stock_of(book.id), Some(1));
    }

    #[tokio::test]
    async fn test_concurrent_decrements_never_go_negative() {
        let (catalog, store) = service();
        let book = catalog.create(new_book("Dune", 1)).await.unwrap();
        let id = book.id.to_string();

        let (a, b) = tokio::join!(
            catalog.adjust_stock(&id, -1, "a:borrow"),
            catalog.adjust_stock(&id, -1, "b:borrow"),
        );
        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        assert_eq!(store.stock_of(book.id), Some(0));
    }
}
