use crate::error::AppError;
use config::{Config as Cfg, File};
use serde::Deserialize;

/// Settings shared by every library service. Loaded from an optional
/// `configuration` file, then `APP__*` environment variables
/// (e.g. `APP__PORT=3001`).
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// HTTP port; the gRPC server binds `port + 1`.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8080
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let config = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// gRPC port derived from the HTTP port. Port 0 stays 0 (OS-assigned).
    pub fn grpc_port(&self) -> u16 {
        if self.port == 0 { 0 } else { self.port + 1 }
    }
}
