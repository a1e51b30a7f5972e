//! service-core: Shared infrastructure for the library services.
pub mod config;
pub mod error;
pub mod grpc;
pub mod identity;
pub mod middleware;
pub mod observability;

pub use async_trait;
pub use axum;
pub use prost;
pub use prost_types;
pub use serde;
pub use serde_json;
pub use tokio;
pub use tonic;
pub use tracing;
pub use validator;
