use service_core::error::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AccountError {
    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Email already exists")]
    EmailTaken,

    #[error("Account not found")]
    NotFound,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Account is inactive")]
    Inactive,

    #[error("Admin registration is disabled")]
    AdminRegistrationDisabled,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<AccountError> for AppError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::Validation(e) => AppError::ValidationError(e),
            AccountError::InvalidInput(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            AccountError::EmailTaken => AppError::Conflict(anyhow::anyhow!("email already exists")),
            AccountError::NotFound => AppError::NotFound(anyhow::anyhow!("account not found")),
            AccountError::InvalidCredentials => {
                AppError::Unauthorized(anyhow::anyhow!("invalid email or password"))
            }
            AccountError::Inactive => AppError::Forbidden(anyhow::anyhow!("account is inactive")),
            AccountError::AdminRegistrationDisabled => {
                AppError::Forbidden(anyhow::anyhow!("admin registration is disabled"))
            }
            AccountError::Database(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            AccountError::Internal(e) => AppError::InternalError(e),
        }
    }
}

/// Token issue/validation failures.
#[derive(Error, Debug)]
pub enum TokenError {
    /// Malformed, expired or wrongly signed token.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Well-formed token whose session was revoked or whose account is gone
    /// or inactive.
    #[error("Unauthorized: {0}")]
    Unauthorized(&'static str),

    #[error("Session store error: {0}")]
    SessionStore(anyhow::Error),

    #[error("Credential store error: {0}")]
    CredentialStore(#[from] AccountError),

    #[error("Token signing failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Unauthenticated(reason) => {
                tracing::debug!(reason = %reason, "Token rejected");
                AppError::Unauthorized(anyhow::anyhow!("invalid token"))
            }
            TokenError::Unauthorized(reason) => {
                tracing::debug!(reason = reason, "Session rejected");
                AppError::Forbidden(anyhow::anyhow!("permission denied"))
            }
            TokenError::SessionStore(e) => AppError::ServiceUnavailable(e.to_string()),
            TokenError::CredentialStore(e) => e.into(),
            TokenError::Signing(e) => AppError::InternalError(anyhow::Error::new(e)),
        }
    }
}
