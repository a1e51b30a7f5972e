//! gRPC utilities for the library services.
//!
//! - Error conversion between `AppError` and `tonic::Status`
//! - The auth gate every service runs in front of its handlers
//! - Deadline and trace propagation for outbound calls
//! - Typed clients for the accounts and catalog services
//! - Health reporting

pub mod accounts_client;
pub mod auth_gate;
pub mod call_context;
pub mod catalog_client;
pub mod deadline;
pub mod error;
pub mod health;
pub mod interceptors;
pub mod retry;

// Include the generated proto code for clients
pub mod proto {
    pub mod accounts {
        tonic::include_proto!("library.accounts.v1");
    }
    pub mod catalog {
        tonic::include_proto!("library.catalog.v1");
    }
}

pub use accounts_client::{AccountsClient, LoginToken};
pub use auth_gate::{AuthGate, TargetSubject, TokenValidator, extract_bearer_token};
pub use call_context::CallContext;
pub use catalog_client::CatalogClient;
pub use deadline::Deadline;
pub use error::{GrpcResult, IntoStatus};
pub use health::{
    ComponentHealth, HealthComponents, HealthReport, HealthReporter, create_health_service,
};
pub use interceptors::{
    REQUEST_ID_KEY, extract_request_id, inject_trace_context, trace_context_interceptor,
};
pub use retry::{ChannelConfig, RetryConfig, connect_with_retry};

// Re-export commonly used tonic types
pub use tonic::{Code, Request, Response, Status};
