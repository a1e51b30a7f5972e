//! Health reporting.
//!
//! [`HealthReport`] is what every service's `Health` RPC and HTTP `/ready`
//! route return: one entry per dependency, and the service is healthy only
//! when every dependency is up. Building a report never fails.
//!
//! The standard `grpc.health.v1` service (via `tonic-health`) is kept in sync
//! with the same report through [`HealthReporter`].

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tonic_health::server::HealthReporter as TonicHealthReporter;

pub const STATUS_HEALTHY: &str = "HEALTHY";
pub const STATUS_UNHEALTHY: &str = "UNHEALTHY";
pub const COMPONENT_UP: &str = "UP";
pub const COMPONENT_DOWN: &str = "DOWN";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub up: bool,
    pub message: String,
}

impl ComponentHealth {
    pub fn up(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            up: true,
            message: "ok".to_string(),
        }
    }

    pub fn down(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            up: false,
            message: message.into(),
        }
    }

    /// Fold a check result into a component entry.
    pub fn from_check<E: std::fmt::Display>(name: &str, result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self::up(name),
            Err(e) => {
                tracing::warn!(component = name, error = %e, "Health check failed");
                Self::down(name, e.to_string())
            }
        }
    }

    pub fn status(&self) -> &'static str {
        if self.up { COMPONENT_UP } else { COMPONENT_DOWN }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub components: Vec<ComponentHealth>,
}

impl HealthReport {
    pub fn new(components: Vec<ComponentHealth>) -> Self {
        Self { components }
    }

    pub fn is_healthy(&self) -> bool {
        self.components.iter().all(|c| c.up)
    }

    pub fn status(&self) -> &'static str {
        if self.is_healthy() {
            STATUS_HEALTHY
        } else {
            STATUS_UNHEALTHY
        }
    }
}

/// Reporter for the standard gRPC health service.
#[derive(Clone)]
pub struct HealthReporter {
    inner: Arc<RwLock<TonicHealthReporter>>,
    service_name: String,
}

impl HealthReporter {
    pub fn new(reporter: TonicHealthReporter, service_name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(reporter)),
            service_name: service_name.into(),
        }
    }

    /// Publish the outcome of a health report.
    pub async fn publish(&self, report: &HealthReport) {
        let status = if report.is_healthy() {
            tonic_health::ServingStatus::Serving
        } else {
            tonic_health::ServingStatus::NotServing
        };
        let mut reporter = self.inner.write().await;
        reporter
            .set_service_status(&self.service_name, status)
            .await;
    }
}

/// Health service components returned by `create_health_service`.
pub struct HealthComponents<S> {
    /// The health server to add to the gRPC router.
    pub server: tonic_health::pb::health_server::HealthServer<S>,
    pub reporter: HealthReporter,
}

/// Create the standard health service, initially serving.
pub async fn create_health_service(
    service_name: impl Into<String>,
) -> HealthComponents<impl tonic_health::pb::health_server::Health> {
    let service_name = service_name.into();
    let (mut reporter, health_server) = tonic_health::server::health_reporter();

    reporter
        .set_service_status(&service_name, tonic_health::ServingStatus::Serving)
        .await;

    HealthComponents {
        server: health_server,
        reporter: HealthReporter::new(reporter, service_name),
    }
}
