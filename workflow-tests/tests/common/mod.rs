//! Common test utilities for workflow integration tests.

#![allow(dead_code)]

use std::time::Duration;
use workflow_tests::{wait_for_services, Mesh, WorkflowTestContext};

/// Default timeout for waiting on services.
pub const SERVICE_TIMEOUT: Duration = Duration::from_secs(10);

/// Start the mesh and connect a workflow test context to it.
///
/// This is the main entry point for workflow tests.
pub async fn setup() -> WorkflowTestContext {
    let mesh = Mesh::start().await.expect("Failed to start services");

    wait_for_services(&mesh.endpoints, SERVICE_TIMEOUT)
        .await
        .expect("Services not healthy");

    WorkflowTestContext::new(mesh)
        .await
        .expect("Failed to create workflow test context")
}
