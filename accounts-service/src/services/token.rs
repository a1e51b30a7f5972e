//! Token service: issues HS256 bearer tokens and validates them against the
//! revocation table and the credential store.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use service_core::grpc::{Deadline, IntoStatus, TokenValidator};
use service_core::identity::{Identity, Role};
use std::sync::Arc;
use tonic::Status;
use tracing::instrument;

use super::database::CredentialStore;
use super::error::TokenError;
use super::metrics::TOKEN_VALIDATIONS_TOTAL;
use super::session::SessionStore;
use crate::config::JwtConfig;
use crate::models::{Account, SessionSnapshot};

/// Signed token payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Account id.
    pub sub: String,
    pub email: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn account_id(&self) -> Result<i64, TokenError> {
        self.sub
            .parse()
            .map_err(|_| TokenError::Unauthenticated("subject is not an account id".to_string()))
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    lifetime: Duration,
    sessions: Arc<dyn SessionStore>,
    credentials: Arc<dyn CredentialStore>,
}

impl TokenService {
    pub fn new(
        config: &JwtConfig,
        sessions: Arc<dyn SessionStore>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            lifetime: Duration::minutes(config.token_lifetime_minutes),
            sessions,
            credentials,
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Sign a token for `account` and record its session entry. The token is
    /// not handed out unless the session entry was written.
    #[instrument(skip(self, account), fields(account_id = account.id))]
    pub async fn issue(&self, account: &Account) -> Result<IssuedToken, TokenError> {
        let now = Utc::now();
        let expires_at = now + self.lifetime;
        let claims = Claims {
            sub: account.id.to_string(),
            email: account.email.clone(),
            role: account.role(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;

        let ttl = self
            .lifetime
            .to_std()
            .map_err(|e| TokenError::SessionStore(anyhow::anyhow!("Invalid lifetime: {}", e)))?;
        self.sessions
            .put(&SessionSnapshot::from(account), ttl)
            .await
            .map_err(TokenError::SessionStore)?;

        Ok(IssuedToken { token, expires_at })
    }

    /// Check signature and expiry, then require a live session entry and an
    /// active account. A missing session entry is never bypassed. The role
    /// returned is the stored one, not the one signed into the token.
    #[instrument(skip(self, token))]
    pub async fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        let result = self.validate_inner(token).await;
        let outcome = match &result {
            Ok(_) => "valid",
            Err(TokenError::Unauthenticated(_)) => "unauthenticated",
            Err(TokenError::Unauthorized(_)) => "unauthorized",
            Err(_) => "error",
        };
        TOKEN_VALIDATIONS_TOTAL.with_label_values(&[outcome]).inc();
        result
    }

    async fn validate_inner(&self, token: &str) -> Result<Claims, TokenError> {
        let mut claims = self.decode(token)?;
        let account_id = claims.account_id()?;

        let snapshot = self
            .sessions
            .get(account_id)
            .await
            .map_err(TokenError::SessionStore)?
            .ok_or(TokenError::Unauthorized("session revoked or expired"))?;
        if !snapshot.active {
            return Err(TokenError::Unauthorized("account inactive"));
        }

        let account = self
            .credentials
            .find_by_id(account_id)
            .await?
            .ok_or(TokenError::Unauthorized("account not found"))?;
        if !account.active {
            return Err(TokenError::Unauthorized("account inactive"));
        }

        claims.role = account.role();
        Ok(claims)
    }

    fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| TokenError::Unauthenticated(e.to_string()))
    }

    /// Drop the account's session entry, revoking all of its tokens.
    #[instrument(skip(self))]
    pub async fn revoke(&self, account_id: i64) -> Result<(), TokenError> {
        self.sessions
            .evict(account_id)
            .await
            .map_err(TokenError::SessionStore)
    }
}

/// In-process validation for the accounts service's own auth gate.
#[async_trait]
impl TokenValidator for TokenService {
    async fn validate(&self, token: &str, deadline: Deadline) -> Result<Identity, Status> {
        let claims = deadline
            .run(async {
                TokenService::validate(self, token)
                    .await
                    .map_err(|e| AppError::from(e).into_status())
            })
            .await?;
        Ok(Identity::new(claims.sub, claims.role))
    }
}
