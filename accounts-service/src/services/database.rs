//! Credential store: account records in Postgres, plus an in-memory
//! implementation with the same uniqueness semantics for tests.

use async_trait::async_trait;
use chrono::Utc;
use service_core::error::AppError;
use service_core::identity::Role;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{info, instrument};

use super::error::AccountError;
use super::metrics::DB_QUERY_DURATION;
use crate::models::{Account, AccountChanges, NewAccount};

const ACCOUNT_COLUMNS: &str =
    "id, name, email, password_hash, role, active, created_at, updated_at, deleted_at";

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert a new account. A duplicate live email fails with
    /// [`AccountError::EmailTaken`] and leaves the store unchanged.
    async fn create(&self, account: &NewAccount) -> Result<Account, AccountError>;
    async fn find_by_id(&self, id: i64) -> Result<Option<Account>, AccountError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AccountError>;
    /// Apply a partial update. `None` when no live account has this id.
    async fn update(
        &self,
        id: i64,
        changes: &AccountChanges,
    ) -> Result<Option<Account>, AccountError>;
    async fn ping(&self) -> Result<(), AccountError>;
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    #[instrument(skip(database_url), fields(service = "accounts-service"))]
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

fn map_write_error(e: sqlx::Error) -> AccountError {
    match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            AccountError::EmailTaken
        }
        other => AccountError::Database(other),
    }
}

#[async_trait]
impl CredentialStore for Database {
    #[instrument(skip(self, account), fields(email = %account.email))]
    async fn create(&self, account: &NewAccount) -> Result<Account, AccountError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_account"])
            .start_timer();

        let created = sqlx::query_as::<_, Account>(&format!(
            r#"
            INSERT INTO accounts (name, email, password_hash, role)
            VALUES ($1, $2, $3, $4)
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(&account.name)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(account.role.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(map_write_error)?;

        timer.observe_duration();
        info!(account_id = created.id, "Account created");
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, id: i64) -> Result<Option<Account>, AccountError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_account_by_id"])
            .start_timer();

        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(account)
    }

    #[instrument(skip(self, email))]
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AccountError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_account_by_email"])
            .start_timer();

        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = $1 AND deleted_at IS NULL"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(account)
    }

    #[instrument(skip(self, changes))]
    async fn update(
        &self,
        id: i64,
        changes: &AccountChanges,
    ) -> Result<Option<Account>, AccountError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_account"])
            .start_timer();

        let account = sqlx::query_as::<_, Account>(&format!(
            r#"
            UPDATE accounts
            SET name = COALESCE($2, name),
                email = COALESCE($3, email),
                updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(changes.name.as_deref())
        .bind(changes.email.as_deref())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_write_error)?;

        timer.observe_duration();
        Ok(account)
    }

    async fn ping(&self) -> Result<(), AccountError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// In-memory credential store. Email uniqueness is checked under the same
/// lock as the insert, mirroring the unique index.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    inner: Mutex<InMemoryAccounts>,
}

#[derive(Default)]
struct InMemoryAccounts {
    next_id: i64,
    rows: HashMap<i64, Account>,
}

impl InMemoryAccounts {
    fn email_in_use(&self, email: &str, except: Option<i64>) -> bool {
        self.rows
            .values()
            .any(|a| a.deleted_at.is_none() && a.email == email && Some(a.id) != except)
    }
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows, live or not.
    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flip the active flag, as an operator would.
    pub fn set_active(&self, id: i64, active: bool) {
        if let Some(account) = self.lock().rows.get_mut(&id) {
            account.active = active;
        }
    }

    /// Change the stored role, as an operator would.
    pub fn set_role(&self, id: i64, role: Role) {
        if let Some(account) = self.lock().rows.get_mut(&id) {
            account.role = role.as_str().to_string();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InMemoryAccounts> {
        // A poisoned lock only means another test thread panicked mid-write.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn create(&self, account: &NewAccount) -> Result<Account, AccountError> {
        let mut inner = self.lock();
        if inner.email_in_use(&account.email, None) {
            return Err(AccountError::EmailTaken);
        }

        inner.next_id += 1;
        let now = Utc::now();
        let created = Account {
            id: inner.next_id,
            name: account.name.clone(),
            email: account.email.clone(),
            password_hash: account.password_hash.clone(),
            role: account.role.as_str().to_string(),
            active: true,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        inner.rows.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Account>, AccountError> {
        Ok(self.lock().rows.get(&id).filter(|a| !a.is_deleted()).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, AccountError> {
        Ok(self
            .lock()
            .rows
            .values()
            .find(|a| !a.is_deleted() && a.email == email)
            .cloned())
    }

    async fn update(
        &self,
        id: i64,
        changes: &AccountChanges,
    ) -> Result<Option<Account>, AccountError> {
        let mut inner = self.lock();
        if let Some(email) = &changes.email {
            if inner.email_in_use(email, Some(id)) {
                return Err(AccountError::EmailTaken);
            }
        }

        let Some(account) = inner.rows.get_mut(&id).filter(|a| !a.is_deleted()) else {
            return Ok(None);
        };
        if let Some(name) = &changes.name {
            account.name = name.clone();
        }
        if let Some(email) = &changes.email {
            account.email = email.clone();
        }
        account.updated_at = Utc::now();
        Ok(Some(account.clone()))
    }

    async fn ping(&self) -> Result<(), AccountError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_core::identity::Role;

    fn new_account(email: &str) -> NewAccount {
        NewAccount {
            name: "A".to_string(),
            email: email.to_string(),
            password_hash: "hash".to_string(),
            role: Role::Operation,
        }
    }

    #[tokio::test]
    async fn test_duplicate_email_leaves_store_unchanged() {
        let store = InMemoryCredentialStore::new();
        store.create(&new_account("a@x.com")).await.unwrap();

        let err = store.create(&new_account("a@x.com")).await.unwrap_err();
        assert!(matches!(err, AccountError::EmailTaken));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_email_match_is_case_sensitive() {
        let store = InMemoryCredentialStore::new();
        store.create(&new_account("a@x.com")).await.unwrap();
        store.create(&new_account("A@x.com")).await.unwrap();

        assert!(store.find_by_email("A@X.COM").await.unwrap().is_none());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_partial_update() {
        let store = InMemoryCredentialStore::new();
        let created = store.create(&new_account("a@x.com")).await.unwrap();

        let changes = AccountChanges {
            name: Some("Alice".to_string()),
            email: None,
        };
        let updated = store.update(created.id, &changes).await.unwrap().unwrap();
        assert_eq!(updated.name, "Alice");
        assert_eq!(updated.email, "a@x.com");

        assert!(store.update(999, &changes).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_to_taken_email_conflicts() {
        let store = InMemoryCredentialStore::new();
        store.create(&new_account("a@x.com")).await.unwrap();
        let b = store.create(&new_account("b@x.com")).await.unwrap();

        let changes = AccountChanges {
            name: None,
            email: Some("a@x.com".to_string()),
        };
        let err = store.update(b.id, &changes).await.unwrap_err();
        assert!(matches!(err, AccountError::EmailTaken));
    }
}
