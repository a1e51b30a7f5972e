//! Services layer for loans-service.

pub mod credentials;
pub mod database;
pub mod error;
pub mod metrics;
pub mod reconciler;
pub mod stock_ledger;
pub mod workflow;

pub use credentials::{AccountLogin, CachedLogin, ServiceCredentials, ServiceLogin};
pub use database::{Database, InMemoryLoanStore, LoanStore};
pub use error::LoanError;
pub use metrics::{get_metrics, init_metrics};
pub use reconciler::Reconciler;
pub use stock_ledger::{
    BookSnapshot, CatalogStockLedger, InMemoryStockLedger, StockLedger, StockLedgerError,
};
pub use workflow::{LoanWorkflow, ReconcileReport};
