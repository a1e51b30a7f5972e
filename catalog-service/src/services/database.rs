//! Book store: books in Postgres, plus an in-memory implementation with the
//! same stock semantics for tests.

use async_trait::async_trait;
use chrono::Utc;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::error::CatalogError;
use super::metrics::DB_QUERY_DURATION;
use crate::models::{Book, BookChanges, NewBook, StockAdjustment};

const BOOK_COLUMNS: &str =
    "id, title, author, category, stock, created_at, updated_at, deleted_at";

#[async_trait]
pub trait BookStore: Send + Sync {
    async fn create(&self, book: &NewBook) -> Result<Book, CatalogError>;
    async fn get(&self, id: Uuid) -> Result<Option<Book>, CatalogError>;
    /// Live books, newest first.
    async fn list(&self) -> Result<Vec<Book>, CatalogError>;
    /// Live books with stock left, newest first.
    async fn list_in_stock(&self, limit: i64) -> Result<Vec<Book>, CatalogError>;
    async fn update(&self, id: Uuid, changes: &BookChanges) -> Result<Option<Book>, CatalogError>;
    /// Apply `delta` to the book's stock in one atomic step, at most once per
    /// `idempotency_key`. Fails with [`CatalogError::InsufficientStock`] when
    /// the result would be negative, leaving stock unchanged.
    async fn adjust_stock(
        &self,
        id: Uuid,
        delta: i32,
        idempotency_key: &str,
    ) -> Result<StockAdjustment, CatalogError>;
    async fn ping(&self) -> Result<(), CatalogError>;
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    #[instrument(skip(database_url), fields(service = "catalog-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn fetch_live(&self, id: Uuid) -> Result<Option<Book>, CatalogError> {
        Ok(sqlx::query_as::<_, Book>(&format!(
            "SELECT {BOOK_COLUMNS} FROM books WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }
}

#[async_trait]
impl BookStore for Database {
    #[instrument(skip(self, book), fields(title = %book.title))]
    async fn create(&self, book: &NewBook) -> Result<Book, CatalogError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_book"])
            .start_timer();

        let created = sqlx::query_as::<_, Book>(&format!(
            r#"
            INSERT INTO books (id, title, author, category, stock)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {BOOK_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&book.title)
        .bind(&book.author)
        .bind(&book.category)
        .bind(book.stock)
        .fetch_one(&self.pool)
        .await?;

        timer.observe_duration();
        info!(book_id = %created.id, "Book created");
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn get(&self, id: Uuid) -> Result<Option<Book>, CatalogError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_book"])
            .start_timer();
        let book = self.fetch_live(id).await?;
        timer.observe_duration();
        Ok(book)
    }

    #[instrument(skip(self))]
    async fn list(&self) -> Result<Vec<Book>, CatalogError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_books"])
            .start_timer();

        let books = sqlx::query_as::<_, Book>(&format!(
            "SELECT {BOOK_COLUMNS} FROM books WHERE deleted_at IS NULL ORDER BY created_at DESC, id"
        ))
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(books)
    }

    #[instrument(skip(self))]
    async fn list_in_stock(&self, limit: i64) -> Result<Vec<Book>, CatalogError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_in_stock"])
            .start_timer();

        let books = sqlx::query_as::<_, Book>(&format!(
            r#"
            SELECT {BOOK_COLUMNS} FROM books
            WHERE deleted_at IS NULL AND stock > 0
            ORDER BY created_at DESC, id
            LIMIT $1
            "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(books)
    }

    #[instrument(skip(self, changes))]
    async fn update(&self, id: Uuid, changes: &BookChanges) -> Result<Option<Book>, CatalogError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_book"])
            .start_timer();

        let book = sqlx::query_as::<_, Book>(&format!(
            r#"
            UPDATE books
            SET title = COALESCE($2, title),
                author = COALESCE($3, author),
                category = COALESCE($4, category),
                stock = COALESCE($5, stock),
                updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING {BOOK_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(changes.title.as_deref())
        .bind(changes.author.as_deref())
        .bind(changes.category.as_deref())
        .bind(changes.stock)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(book)
    }

    #[instrument(skip(self))]
    async fn adjust_stock(
        &self,
        id: Uuid,
        delta: i32,
        idempotency_key: &str,
    ) -> Result<StockAdjustment, CatalogError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["adjust_stock"])
            .start_timer();

        let mut tx = self.pool.begin().await?;

        // Claim the key first. A concurrent holder of the same key blocks this
        // insert until it commits, after which the claim is a no-op.
        let claimed = sqlx::query(
            r#"
            INSERT INTO stock_adjustments (idempotency_key, book_id, delta)
            VALUES ($1, $2, $3)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(idempotency_key)
        .bind(id)
        .bind(delta)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if claimed == 0 {
            let (claimed_book, claimed_delta): (Uuid, i32) = sqlx::query_as(
                "SELECT book_id, delta FROM stock_adjustments WHERE idempotency_key = $1",
            )
            .bind(idempotency_key)
            .fetch_one(&mut *tx)
            .await?;
            tx.rollback().await.ok();
            timer.observe_duration();

            if claimed_book != id || claimed_delta != delta {
                warn!(
                    idempotency_key = idempotency_key,
                    book_id = %id,
                    delta = delta,
                    "Idempotency key reused for a different stock change"
                );
                return Err(CatalogError::KeyReused);
            }
            info!(idempotency_key = idempotency_key, "Stock adjustment replayed");
            let book = self.fetch_live(id).await?.ok_or(CatalogError::NotFound)?;
            return Ok(StockAdjustment {
                book,
                replayed: true,
            });
        }

        let updated = sqlx::query_as::<_, Book>(&format!(
            r#"
            UPDATE books
            SET stock = stock + $2, updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL AND stock + $2 >= 0
            RETURNING {BOOK_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(delta)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(book) = updated else {
            tx.rollback().await.ok();
            timer.observe_duration();
            // No row: either the book is gone or the guard refused the delta.
            return match self.fetch_live(id).await? {
                Some(book) => {
                    warn!(book_id = %id, stock = book.stock, delta = delta, "Insufficient stock");
                    Err(CatalogError::InsufficientStock)
                }
                None => Err(CatalogError::NotFound),
            };
        };

        tx.commit().await?;
        timer.observe_duration();

        info!(book_id = %id, delta = delta, stock = book.stock, "Stock adjusted");
        Ok(StockAdjustment {
            book,
            replayed: false,
        })
    }

    async fn ping(&self) -> Result<(), CatalogError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// In-memory book store. Stock changes and key claims happen under one lock,
/// mirroring the single database transaction.
#[derive(Default)]
pub struct InMemoryBookStore {
    inner: Mutex<InMemoryBooks>,
}

#[derive(Default)]
struct InMemoryBooks {
    rows: HashMap<Uuid, Book>,
    /// Applied keys with the book and delta they were applied to.
    applied_keys: HashMap<String, (Uuid, i32)>,
}

impl InMemoryBooks {
    fn live(&self, id: Uuid) -> Option<&Book> {
        self.rows.get(&id).filter(|b| !b.is_deleted())
    }

    fn sorted_live(&self) -> Vec<Book> {
        let mut books: Vec<Book> = self
            .rows
            .values()
            .filter(|b| !b.is_deleted())
            .cloned()
            .collect();
        books.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        books
    }
}

impl InMemoryBookStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current stock of a book, deleted or not.
    pub fn stock_of(&self, id: Uuid) -> Option<i32> {
        self.lock().rows.get(&id).map(|b| b.stock)
    }

    /// Number of stock adjustments actually applied.
    pub fn applied_adjustments(&self) -> usize {
        self.lock().applied_keys.len()
    }

    /// Soft-delete a book, as an operator would.
    pub fn soft_delete(&self, id: Uuid) {
        if let Some(book) = self.lock().rows.get_mut(&id) {
            book.deleted_at = Some(Utc::now());
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InMemoryBooks> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl BookStore for InMemoryBookStore {
    async fn create(&self, book: &NewBook) -> Result<Book, CatalogError> {
        let now = Utc::now();
        let created = Book {
            id: Uuid::new_v4(),
            title: book.title.clone(),
            author: book.author.clone(),
            category: book.category.clone(),
            stock: book.stock,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.lock().rows.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Book>, CatalogError> {
        Ok(self.lock().live(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Book>, CatalogError> {
        Ok(self.lock().sorted_live())
    }

    async fn list_in_stock(&self, limit: i64) -> Result<Vec<Book>, CatalogError> {
        Ok(self
            .lock()
            .sorted_live()
            .into_iter()
            .filter(Book::in_stock)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn update(&self, id: Uuid, changes: &BookChanges) -> Result<Option<Book>, CatalogError> {
        let mut inner = self.lock();
        let Some(book) = inner.rows.get_mut(&id).filter(|b| !b.is_deleted()) else {
            return Ok(None);
        };
        if let Some(title) = &changes.title {
            book.title = title.clone();
        }
        if let Some(author) = &changes.author {
            book.author = author.clone();
        }
        if let Some(category) = &changes.category {
            book.category = category.clone();
        }
        if let Some(stock) = changes.stock {
            book.stock = stock;
        }
        book.updated_at = Utc::now();
        Ok(Some(book.clone()))
    }

    async fn adjust_stock(
        &self,
        id: Uuid,
        delta: i32,
        idempotency_key: &str,
    ) -> Result<StockAdjustment, CatalogError> {
        let mut inner = self.lock();

        if let Some(claimed) = inner.applied_keys.get(idempotency_key) {
            if *claimed != (id, delta) {
                return Err(CatalogError::KeyReused);
            }
            let book = inner.live(id).cloned().ok_or(CatalogError::NotFound)?;
            return Ok(StockAdjustment {
                book,
                replayed: true,
            });
        }

        let book = inner
            .rows
            .get_mut(&id)
            .filter(|b| !b.is_deleted())
            .ok_or(CatalogError::NotFound)?;
        let next = book
            .stock
            .checked_add(delta)
            .filter(|s| *s >= 0)
            .ok_or(CatalogError::InsufficientStock)?;
        book.stock = next;
        book.updated_at = Utc::now();
        let book = book.clone();

        inner
            .applied_keys
            .insert(idempotency_key.to_string(), (id, delta));
        Ok(StockAdjustment {
            book,
            replayed: false,
        })
    }

    async fn ping(&self) -> Result<(), CatalogError> {
        Ok(())
    }
}
