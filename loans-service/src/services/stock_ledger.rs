//! Stock Ledger Adapter: the loans view of the catalog's stock.

use async_trait::async_trait;
use service_core::grpc::{CallContext, CatalogClient, Code, Status};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{instrument, warn};

use super::credentials::ServiceCredentials;

#[derive(Error, Debug)]
pub enum StockLedgerError {
    #[error("Book not found")]
    BookNotFound,

    #[error("Insufficient stock")]
    InsufficientStock,

    #[error("Catalog unavailable: {0}")]
    Unavailable(String),

    #[error("Deadline exceeded calling catalog")]
    DeadlineExceeded,

    #[error("Catalog error: {0}")]
    Remote(Status),
}

impl StockLedgerError {
    /// The catalog gave a final answer; retrying the same change cannot help.
    pub fn is_definitive(&self) -> bool {
        matches!(
            self,
            StockLedgerError::BookNotFound | StockLedgerError::InsufficientStock
        )
    }
}

/// What loans needs to know about a book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookSnapshot {
    pub id: String,
    pub title: String,
    pub stock: i32,
}

#[async_trait]
pub trait StockLedger: Send + Sync {
    /// Look a book up. Any catalog failure other than a spent deadline reads
    /// as [`StockLedgerError::BookNotFound`].
    async fn get_by_id(
        &self,
        ctx: &CallContext,
        book_id: &str,
    ) -> Result<BookSnapshot, StockLedgerError>;

    /// Apply `delta` in one atomic step on the catalog side, at most once per
    /// `idempotency_key`. A decrement past zero is refused with
    /// [`StockLedgerError::InsufficientStock`]. The change is made under the
    /// loans service's own identity, never the caller's.
    async fn update_stock(
        &self,
        ctx: &CallContext,
        book_id: &str,
        delta: i32,
        idempotency_key: &str,
    ) -> Result<BookSnapshot, StockLedgerError>;
}

/// Ledger backed by the catalog service over gRPC. Lookups carry the
/// caller's bearer; stock changes carry the service account's.
#[derive(Clone)]
pub struct CatalogStockLedger {
    client: CatalogClient,
    credentials: Arc<dyn ServiceCredentials>,
}

impl CatalogStockLedger {
    pub fn new(client: CatalogClient, credentials: Arc<dyn ServiceCredentials>) -> Self {
        Self {
            client,
            credentials,
        }
    }
}

fn is_deadline(status: &Status) -> bool {
    matches!(status.code(), Code::DeadlineExceeded | Code::Cancelled)
}

/// Classify a failed AdjustStock. Only a missing book and an empty shelf are
/// final; anything else leaves the change indeterminate.
fn adjust_error(status: Status) -> StockLedgerError {
    match status.code() {
        Code::NotFound => StockLedgerError::BookNotFound,
        Code::FailedPrecondition => StockLedgerError::InsufficientStock,
        Code::Unavailable => StockLedgerError::Unavailable(status.message().to_string()),
        Code::DeadlineExceeded | Code::Cancelled => StockLedgerError::DeadlineExceeded,
        _ => StockLedgerError::Remote(status),
    }
}

/// A service login that failed. The stock change was never sent, but the
/// loan stays pending for the reconciler either way.
fn login_error(status: Status) -> StockLedgerError {
    match status.code() {
        Code::NotFound | Code::FailedPrecondition => StockLedgerError::Remote(status),
        _ => adjust_error(status),
    }
}

#[async_trait]
impl StockLedger for CatalogStockLedger {
    #[instrument(skip(self, ctx))]
    async fn get_by_id(
        &self,
        ctx: &CallContext,
        book_id: &str,
    ) -> Result<BookSnapshot, StockLedgerError> {
        match self.client.get_book(ctx, book_id).await {
            Ok(book) => Ok(BookSnapshot {
                id: book.id,
                title: book.title,
                stock: book.stock,
            }),
            Err(status) if is_deadline(&status) => Err(StockLedgerError::DeadlineExceeded),
            Err(status) => {
                if status.code() != Code::NotFound {
                    warn!(
                        book_id = book_id,
                        code = ?status.code(),
                        error = %status.message(),
                        "Catalog lookup failed, treating book as not found"
                    );
                }
                Err(StockLedgerError::BookNotFound)
            }
        }
    }

    #[instrument(skip(self, ctx))]
    async fn update_stock(
        &self,
        ctx: &CallContext,
        book_id: &str,
        delta: i32,
        idempotency_key: &str,
    ) -> Result<BookSnapshot, StockLedgerError> {
        let token = self.credentials.bearer().await.map_err(|status| {
            warn!(code = ?status.code(), error = %status.message(), "Service login failed");
            login_error(status)
        })?;
        let service_ctx = ctx.clone().with_bearer(token);

        let response = self
            .client
            .adjust_stock(&service_ctx, book_id, delta, idempotency_key)
            .await
            .map_err(|status| {
                if matches!(
                    status.code(),
                    Code::Unauthenticated | Code::PermissionDenied
                ) {
                    warn!(code = ?status.code(), "Catalog refused the service bearer");
                    self.credentials.invalidate();
                }
                adjust_error(status)
            })?;

        let book = response
            .book
            .ok_or_else(|| StockLedgerError::Remote(Status::internal("empty stock response")))?;
        Ok(BookSnapshot {
            id: book.id,
            title: book.title,
            stock: book.stock,
        })
    }
}

/// In-memory ledger for tests: atomic per-key stock changes plus a switch
/// that makes every call fail as if the catalog were down.
#[derive(Default)]
pub struct InMemoryStockLedger {
    inner: Mutex<InMemoryStock>,
    unavailable: AtomicBool,
}

#[derive(Default)]
struct InMemoryStock {
    stock: HashMap<String, i32>,
    applied_keys: HashSet<String>,
}

impl InMemoryStockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_book(self, book_id: &str, stock: i32) -> Self {
        self.set_stock(book_id, stock);
        self
    }

    pub fn set_stock(&self, book_id: &str, stock: i32) {
        self.lock().stock.insert(book_id.to_string(), stock);
    }

    pub fn stock_of(&self, book_id: &str) -> Option<i32> {
        self.lock().stock.get(book_id).copied()
    }

    pub fn remove_book(&self, book_id: &str) {
        self.lock().stock.remove(book_id);
    }

    pub fn applied_keys(&self) -> usize {
        self.lock().applied_keys.len()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StockLedgerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StockLedgerError::Unavailable(
                "catalog is down".to_string(),
            ));
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InMemoryStock> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn snapshot(book_id: &str, stock: i32) -> BookSnapshot {
    BookSnapshot {
        id: book_id.to_string(),
        title: book_id.to_string(),
        stock,
    }
}

#[async_trait]
impl StockLedger for InMemoryStockLedger {
    async fn get_by_id(
        &self,
        ctx: &CallContext,
        book_id: &str,
    ) -> Result<BookSnapshot, StockLedgerError> {
        if ctx.deadline.is_expired() {
            return Err(StockLedgerError::DeadlineExceeded);
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StockLedgerError::BookNotFound);
        }
        self.lock()
            .stock
            .get(book_id)
            .map(|stock| snapshot(book_id, *stock))
            .ok_or(StockLedgerError::BookNotFound)
    }

    async fn update_stock(
        &self,
        ctx: &CallContext,
        book_id: &str,
        delta: i32,
        idempotency_key: &str,
    ) -> Result<BookSnapshot, StockLedgerError> {
        if ctx.deadline.is_expired() {
            return Err(StockLedgerError::DeadlineExceeded);
        }
        self.check_available()?;

        let mut inner = self.lock();
        let current = *inner
            .stock
            .get(book_id)
            .ok_or(StockLedgerError::BookNotFound)?;
        if inner.applied_keys.contains(idempotency_key) {
            return Ok(snapshot(book_id, current));
        }

        let next = current
            .checked_add(delta)
            .filter(|s| *s >= 0)
            .ok_or(StockLedgerError::InsufficientStock)?;
        inner.stock.insert(book_id.to_string(), next);
        inner.applied_keys.insert(idempotency_key.to_string());
        Ok(snapshot(book_id, next))
    }
}
