//! Services layer for catalog-service.

pub mod catalog;
pub mod database;
pub mod error;
pub mod metrics;

pub use catalog::CatalogService;
pub use database::{BookStore, Database, InMemoryBookStore};
pub use error::CatalogError;
pub use metrics::{get_metrics, init_metrics};
