//! Services layer for accounts-service.

pub mod accounts;
pub mod database;
pub mod error;
pub mod metrics;
pub mod session;
pub mod token;

pub use accounts::AccountService;
pub use database::{CredentialStore, Database, InMemoryCredentialStore};
pub use error::{AccountError, TokenError};
pub use metrics::{get_metrics, init_metrics};
pub use session::{MockSessionStore, RedisSessionStore, SessionStore};
pub use token::{Claims, IssuedToken, TokenService};
