//! Loan store: loans in Postgres, plus an in-memory implementation with the
//! same transition rules for tests.

use async_trait::async_trait;
use chrono::Utc;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use super::error::LoanError;
use super::metrics::DB_QUERY_DURATION;
use crate::models::{Loan, StockPhase, StockState};

const LOAN_COLUMNS: &str = "id, user_id, book_id, borrowed_at, returned_at, stock_state, \
                            created_at, updated_at, cancelled_at";

#[async_trait]
pub trait LoanStore: Send + Sync {
    /// Record a new borrow with its stock change still pending.
    async fn create(&self, user_id: i64, book_id: &str) -> Result<Loan, LoanError>;
    /// A loan that was not cancelled.
    async fn get(&self, id: Uuid) -> Result<Option<Loan>, LoanError>;
    /// The user's loans, most recently borrowed first.
    async fn list_by_user(&self, user_id: i64) -> Result<Vec<Loan>, LoanError>;
    /// Set `returned_at` and reopen the stock state, only if the loan is still
    /// out. `None` means another caller returned it first.
    async fn mark_returned(&self, id: Uuid) -> Result<Option<Loan>, LoanError>;
    /// Confirm the stock change of `phase`, only if the loan is still pending
    /// on that phase. `false` means the loan has moved on since it was read.
    async fn mark_applied(&self, id: Uuid, phase: StockPhase) -> Result<bool, LoanError>;
    /// Withdraw a borrow the catalog refused, only while its decrement is
    /// still pending. `false` means the loan has moved on.
    async fn cancel(&self, id: Uuid) -> Result<bool, LoanError>;
    /// Loans whose latest stock change is unconfirmed, oldest first.
    async fn list_pending(&self, limit: i64) -> Result<Vec<Loan>, LoanError>;
    async fn ping(&self) -> Result<(), LoanError>;
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    #[instrument(skip(database_url), fields(service = "loans-service"))]
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
}

#[async_trait]
impl LoanStore for Database {
    #[instrument(skip(self))]
    async fn create(&self, user_id: i64, book_id: &str) -> Result<Loan, LoanError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_loan"])
            .start_timer();

        let loan = sqlx::query_as::<_, Loan>(&format!(
            r#"
            INSERT INTO loans (id, user_id, book_id, stock_state)
            VALUES ($1, $2, $3, $4)
            RETURNING {LOAN_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(book_id)
        .bind(StockState::Pending.as_str())
        .fetch_one(&self.pool)
        .await?;

        timer.observe_duration();
        info!(loan_id = %loan.id, "Loan recorded");
        Ok(loan)
    }

    #[instrument(skip(self))]
    async fn get(&self, id: Uuid) -> Result<Option<Loan>, LoanError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_loan"])
            .start_timer();

        let loan = sqlx::query_as::<_, Loan>(&format!(
            "SELECT {LOAN_COLUMNS} FROM loans WHERE id = $1 AND cancelled_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(loan)
    }

    #[instrument(skip(self))]
    async fn list_by_user(&self, user_id: i64) -> Result<Vec<Loan>, LoanError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_loans"])
            .start_timer();

        let loans = sqlx::query_as::<_, Loan>(&format!(
            r#"
            SELECT {LOAN_COLUMNS} FROM loans
            WHERE user_id = $1 AND cancelled_at IS NULL
            ORDER BY borrowed_at DESC, id
            "#
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(loans)
    }

    #[instrument(skip(self))]
    async fn mark_returned(&self, id: Uuid) -> Result<Option<Loan>, LoanError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_returned"])
            .start_timer();

        let loan = sqlx::query_as::<_, Loan>(&format!(
            r#"
            UPDATE loans
            SET returned_at = NOW(), stock_state = $2, updated_at = NOW()
            WHERE id = $1 AND returned_at IS NULL AND cancelled_at IS NULL
            RETURNING {LOAN_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(StockState::Pending.as_str())
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(loan)
    }

    #[instrument(skip(self))]
    async fn mark_applied(&self, id: Uuid, phase: StockPhase) -> Result<bool, LoanError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_applied"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE loans
            SET stock_state = $2, updated_at = NOW()
            WHERE id = $1 AND stock_state = $3 AND cancelled_at IS NULL
              AND (returned_at IS NOT NULL) = $4
            "#,
        )
        .bind(id)
        .bind(StockState::Applied.as_str())
        .bind(StockState::Pending.as_str())
        .bind(phase == StockPhase::Return)
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn cancel(&self, id: Uuid) -> Result<bool, LoanError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["cancel_loan"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE loans
            SET cancelled_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND cancelled_at IS NULL AND returned_at IS NULL
              AND stock_state = $2
            "#,
        )
        .bind(id)
        .bind(StockState::Pending.as_str())
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        let cancelled = result.rows_affected() == 1;
        if cancelled {
            info!(loan_id = %id, "Loan cancelled");
        }
        Ok(cancelled)
    }

    #[instrument(skip(self))]
    async fn list_pending(&self, limit: i64) -> Result<Vec<Loan>, LoanError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_pending"])
            .start_timer();

        let loans = sqlx::query_as::<_, Loan>(&format!(
            r#"
            SELECT {LOAN_COLUMNS} FROM loans
            WHERE stock_state = $1 AND cancelled_at IS NULL
            ORDER BY updated_at, id
            LIMIT $2
            "#
        ))
        .bind(StockState::Pending.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(loans)
    }

    async fn ping(&self) -> Result<(), LoanError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// In-memory loan store. Every transition happens under one lock, so the
/// conditional return behaves like the guarded UPDATE.
#[derive(Default)]
pub struct InMemoryLoanStore {
    rows: Mutex<HashMap<Uuid, Loan>>,
}

impl InMemoryLoanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored loan, cancelled ones included.
    pub fn all(&self) -> Vec<Loan> {
        self.lock().values().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Loan>> {
        self.rows.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LoanStore for InMemoryLoanStore {
    async fn create(&self, user_id: i64, book_id: &str) -> Result<Loan, LoanError> {
        let now = Utc::now();
        let loan = Loan {
            id: Uuid::new_v4(),
            user_id,
            book_id: book_id.to_string(),
            borrowed_at: now,
            returned_at: None,
            stock_state: StockState::Pending.as_str().to_string(),
            created_at: now,
            updated_at: now,
            cancelled_at: None,
        };
        self.lock().insert(loan.id, loan.clone());
        Ok(loan)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Loan>, LoanError> {
        Ok(self.lock().get(&id).filter(|l| !l.is_cancelled()).cloned())
    }

    async fn list_by_user(&self, user_id: i64) -> Result<Vec<Loan>, LoanError> {
        let mut loans: Vec<Loan> = self
            .lock()
            .values()
            .filter(|l| l.user_id == user_id && !l.is_cancelled())
            .cloned()
            .collect();
        loans.sort_by(|a, b| b.borrowed_at.cmp(&a.borrowed_at).then(a.id.cmp(&b.id)));
        Ok(loans)
    }

    async fn mark_returned(&self, id: Uuid) -> Result<Option<Loan>, LoanError> {
        let mut rows = self.lock();
        let Some(loan) = rows
            .get_mut(&id)
            .filter(|l| !l.is_returned() && !l.is_cancelled())
        else {
            return Ok(None);
        };
        let now = Utc::now();
        loan.returned_at = Some(now);
        loan.stock_state = StockState::Pending.as_str().to_string();
        loan.updated_at = now;
        Ok(Some(loan.clone()))
    }

    async fn mark_applied(&self, id: Uuid, phase: StockPhase) -> Result<bool, LoanError> {
        let mut rows = self.lock();
        let Some(loan) = rows
            .get_mut(&id)
            .filter(|l| l.is_pending() && !l.is_cancelled() && l.phase() == phase)
        else {
            return Ok(false);
        };
        loan.stock_state = StockState::Applied.as_str().to_string();
        loan.updated_at = Utc::now();
        Ok(true)
    }

    async fn cancel(&self, id: Uuid) -> Result<bool, LoanError> {
        let mut rows = self.lock();
        let Some(loan) = rows
            .get_mut(&id)
            .filter(|l| l.is_pending() && !l.is_cancelled() && !l.is_returned())
        else {
            return Ok(false);
        };
        let now = Utc::now();
        loan.cancelled_at = Some(now);
        loan.updated_at = now;
        Ok(true)
    }

    async fn list_pending(&self, limit: i64) -> Result<Vec<Loan>, LoanError> {
        let mut loans: Vec<Loan> = self
            .lock()
            .values()
            .filter(|l| l.is_pending() && !l.is_cancelled())
            .cloned()
            .collect();
        loans.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.id.cmp(&b.id)));
        loans.truncate(limit.max(0) as usize);
        Ok(loans)
    }

    async fn ping(&self) -> Result<(), LoanError> {
        Ok(())
    }
}
