//! Configuration module for loans-service.

use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct LoansConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub accounts_service: ServiceEndpoint,
    pub catalog_service: ServiceEndpoint,
    pub service_account: ServiceAccountConfig,
    pub reconciler: ReconcilerConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct ServiceEndpoint {
    pub url: String,
}

/// Admin account loans signs in as to change catalog stock.
#[derive(Clone)]
pub struct ServiceAccountConfig {
    pub email: String,
    pub password: String,
}

impl ServiceAccountConfig {
    pub fn from_parts(email: Option<String>, password: Option<String>) -> Result<Self, AppError> {
        match (
            email.filter(|e| !e.is_empty()),
            password.filter(|p| !p.is_empty()),
        ) {
            (Some(email), Some(password)) => Ok(Self { email, password }),
            _ => Err(AppError::ConfigError(anyhow::anyhow!(
                "LOANS_SERVICE_EMAIL and LOANS_SERVICE_PASSWORD must both be set"
            ))),
        }
    }
}

impl std::fmt::Debug for ServiceAccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountConfig")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Background re-drive of loans whose stock change was never confirmed.
/// Disabled unless an interval is configured.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub interval: Option<Duration>,
    pub batch_size: i32,
}

impl ReconcilerConfig {
    pub fn is_enabled(&self) -> bool {
        self.interval.is_some()
    }
}

impl LoansConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let interval = match env::var("RECONCILE_INTERVAL_SECONDS") {
            Ok(raw) => {
                let secs = raw.parse::<u64>().map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!(
                        "RECONCILE_INTERVAL_SECONDS must be a non-negative integer, got '{}'",
                        raw
                    ))
                })?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            Err(_) => None,
        };

        let service_account = ServiceAccountConfig::from_parts(
            env::var("LOANS_SERVICE_EMAIL").ok(),
            env::var("LOANS_SERVICE_PASSWORD").ok(),
        )?;

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "loans-service".to_string()),
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
            accounts_service: ServiceEndpoint {
                url: env::var("ACCOUNTS_SERVICE_URL")
                    .unwrap_or_else(|_| "http://accounts-service:3001".to_string()),
            },
            catalog_service: ServiceEndpoint {
                url: env::var("CATALOG_SERVICE_URL")
                    .unwrap_or_else(|_| "http://catalog-service:3003".to_string()),
            },
            service_account,
            reconciler: ReconcilerConfig {
                interval,
                batch_size: env::var("RECONCILE_BATCH_SIZE")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(100),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconciler_needs_interval() {
        let config = ReconcilerConfig {
            interval: None,
            batch_size: 100,
        };
        assert!(!config.is_enabled());
        assert!(ReconcilerConfig {
            interval: Some(Duration::from_secs(30)),
            ..config
        }
        .is_enabled());
    }

    #[test]
    fn test_service_account_is_required() {
        assert!(ServiceAccountConfig::from_parts(None, None).is_err());
        assert!(
            ServiceAccountConfig::from_parts(Some("loans@x.com".to_string()), Some(String::new()))
                .is_err()
        );

        let account = ServiceAccountConfig::from_parts(
            Some("loans@x.com".to_string()),
            Some("pw".to_string()),
        )
        .unwrap();
        assert_eq!(account.email, "loans@x.com");
        assert!(!format!("{:?}", account).contains("\"pw\""));
    }
}
