//! Configuration module for accounts-service.

use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone)]
pub struct AccountsConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    /// Honor `ACCOUNT_ROLE_ADMIN` on self-registration.
    pub allow_admin_registration: bool,
    /// Admin account created at startup when its email is not yet taken.
    pub initial_admin: Option<InitialAdmin>,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Clone)]
pub struct JwtConfig {
    /// Shared HS256 signing secret.
    pub secret: String,
    /// Token lifetime; also the TTL of the session entry written at login.
    pub token_lifetime_minutes: i64,
}

// Keep the secret out of logs.
impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field("token_lifetime_minutes", &self.token_lifetime_minutes)
            .finish()
    }
}

#[derive(Clone)]
pub struct InitialAdmin {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for InitialAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitialAdmin")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl InitialAdmin {
    /// Both values or neither. Half a configuration is an error.
    pub fn from_parts(
        email: Option<String>,
        password: Option<String>,
    ) -> Result<Option<Self>, AppError> {
        let email = email.filter(|v| !v.is_empty());
        let password = password.filter(|v| !v.is_empty());
        match (email, password) {
            (Some(email), Some(password)) => Ok(Some(Self { email, password })),
            (None, None) => Ok(None),
            _ => Err(AppError::ConfigError(anyhow::anyhow!(
                "INITIAL_ADMIN_EMAIL and INITIAL_ADMIN_PASSWORD must be set together"
            ))),
        }
    }
}

impl AccountsConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let secret = env::var("JWT_SECRET")
            .map_err(|_| AppError::ConfigError(anyhow::anyhow!("JWT_SECRET is required")))?;
        if secret.is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_SECRET must not be empty"
            )));
        }

        let token_lifetime_minutes = match env::var("TOKEN_LIFETIME_MINUTES") {
            Ok(raw) => raw.parse::<i64>().ok().filter(|m| *m > 0).ok_or_else(|| {
                AppError::ConfigError(anyhow::anyhow!(
                    "TOKEN_LIFETIME_MINUTES must be a positive integer, got '{}'",
                    raw
                ))
            })?,
            Err(_) => 60,
        };

        let initial_admin = InitialAdmin::from_parts(
            env::var("INITIAL_ADMIN_EMAIL").ok(),
            env::var("INITIAL_ADMIN_PASSWORD").ok(),
        )?;

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "accounts-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
                min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://redis:6379".to_string()),
            },
            jwt: JwtConfig {
                secret,
                token_lifetime_minutes,
            },
            allow_admin_registration: env::var("ALLOW_ADMIN_REGISTRATION")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false),
            initial_admin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_admin_needs_both_parts() {
        assert!(InitialAdmin::from_parts(None, None).unwrap().is_none());
        assert!(InitialAdmin::from_parts(Some("root@x.com".into()), None).is_err());
        assert!(InitialAdmin::from_parts(Some(String::new()), Some("pw".into())).is_err());

        let admin = InitialAdmin::from_parts(Some("root@x.com".into()), Some("pw".into()))
            .unwrap()
            .unwrap();
        assert_eq!(admin.email, "root@x.com");
        assert!(!format!("{:?}", admin).contains("\"pw\""));
    }
}
