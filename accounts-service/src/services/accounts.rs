use service_core::grpc::{ComponentHealth, HealthReport};
use service_core::identity::Role;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use validator::Validate;

use super::database::CredentialStore;
use super::error::{AccountError, TokenError};
use super::metrics::LOGINS_TOTAL;
use super::session::SessionStore;
use super::token::{IssuedToken, TokenService};
use crate::config::InitialAdmin;
use crate::models::{Account, AccountChanges, NewAccount, RegisterInput, UpdateInput};
use crate::utils::{hash_password, verify_password, Password, PasswordHashString};

#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn CredentialStore>,
    sessions: Arc<dyn SessionStore>,
    tokens: Arc<TokenService>,
    allow_admin_registration: bool,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        sessions: Arc<dyn SessionStore>,
        tokens: Arc<TokenService>,
        allow_admin_registration: bool,
    ) -> Self {
        Self {
            store,
            sessions,
            tokens,
            allow_admin_registration,
        }
    }

    #[instrument(skip(self, input), fields(email = %input.email, role = %input.role))]
    pub async fn register(&self, input: RegisterInput) -> Result<Account, AccountError> {
        input.validate()?;

        if input.role == Role::Admin && !self.allow_admin_registration {
            warn!("Rejected self-registration as admin");
            return Err(AccountError::AdminRegistrationDisabled);
        }

        let password_hash = hash_password(&Password::new(input.password))?;

        let account = self
            .store
            .create(&NewAccount {
                name: input.name,
                email: input.email,
                password_hash: password_hash.into_string(),
                role: input.role,
            })
            .await?;

        info!(account_id = account.id, "Account registered");
        Ok(account)
    }

    /// Verify credentials and issue a token. Unknown email and wrong password
    /// are indistinguishable to the caller.
    #[instrument(skip(self, email, password))]
    pub async fn login(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(Account, IssuedToken), TokenError> {
        let result = self.login_inner(email, password).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(TokenError::CredentialStore(AccountError::InvalidCredentials)) => {
                "invalid_credentials"
            }
            Err(TokenError::CredentialStore(AccountError::Inactive)) => "inactive",
            Err(_) => "error",
        };
        LOGINS_TOTAL.with_label_values(&[outcome]).inc();
        result
    }

    async fn login_inner(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(Account, IssuedToken), TokenError> {
        if email.is_empty() || password.is_empty() {
            return Err(AccountError::InvalidInput("email and password are required".into()).into());
        }

        let account = self
            .store
            .find_by_email(email)
            .await?
            .ok_or(AccountError::InvalidCredentials)?;

        let matches = verify_password(
            &Password::new(password),
            &PasswordHashString::new(account.password_hash.clone()),
        )
        .map_err(AccountError::Internal)?;
        if !matches {
            return Err(AccountError::InvalidCredentials.into());
        }
        if !account.active {
            return Err(AccountError::Inactive.into());
        }

        let issued = self.tokens.issue(&account).await?;
        info!(account_id = account.id, "Login succeeded");
        Ok((account, issued))
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: i64) -> Result<Account, AccountError> {
        self.store.find_by_id(id).await?.ok_or(AccountError::NotFound)
    }

    #[instrument(skip(self, input))]
    pub async fn update(&self, id: i64, input: UpdateInput) -> Result<Account, AccountError> {
        input.validate()?;
        let changes = AccountChanges {
            name: input.name,
            email: input.email,
        };
        if changes.is_empty() {
            return self.get(id).await;
        }

        let account = self
            .store
            .update(id, &changes)
            .await?
            .ok_or(AccountError::NotFound)?;
        info!(account_id = account.id, "Account updated");
        Ok(account)
    }

    /// Revoke every token of the account by dropping its session entry.
    #[instrument(skip(self))]
    pub async fn logout(&self, id: i64) -> Result<(), TokenError> {
        self.tokens.revoke(id).await?;
        info!(account_id = id, "Session revoked");
        Ok(())
    }

    /// Create the configured admin unless an account already holds its email.
    /// Runs on every start, so a second run is a no-op.
    #[instrument(skip(self, admin), fields(email = %admin.email))]
    pub async fn seed_admin(&self, admin: &InitialAdmin) -> Result<Option<Account>, AccountError> {
        if let Some(existing) = self.store.find_by_email(&admin.email).await? {
            if existing.role() != Role::Admin {
                warn!(
                    account_id = existing.id,
                    "Initial admin email belongs to a non-admin account"
                );
            }
            return Ok(None);
        }

        let password_hash = hash_password(&Password::new(admin.password.clone()))?;
        let created = self
            .store
            .create(&NewAccount {
                name: "Admin".to_string(),
                email: admin.email.clone(),
                password_hash: password_hash.into_string(),
                role: Role::Admin,
            })
            .await;

        match created {
            Ok(account) => {
                info!(account_id = account.id, "Initial admin created");
                Ok(Some(account))
            }
            // Another replica seeded it between the lookup and the insert.
            Err(AccountError::EmailTaken) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Check the credential store and the session cache. Never fails.
    pub async fn health(&self) -> HealthReport {
        let (database, cache) = tokio::join!(self.store.ping(), self.sessions.health_check());
        HealthReport::new(vec![
            ComponentHealth::from_check("database", database),
            ComponentHealth::from_check("cache", cache),
        ])
    }
}
