//! Periodic reconciliation of loans left pending by a catalog outage.
//!
//! The pass runs without an inbound request. Stock changes carry the
//! ledger's service bearer, so the pass needs no identity of its own.

use service_core::grpc::CallContext;
use std::time::Duration;
use tracing::{error, info, instrument};

use super::error::LoanError;
use super::workflow::{LoanWorkflow, ReconcileReport};

pub struct Reconciler {
    workflow: LoanWorkflow,
    interval: Duration,
    batch_size: i32,
}

impl Reconciler {
    pub fn new(workflow: LoanWorkflow, interval: Duration, batch_size: i32) -> Self {
        Self {
            workflow,
            interval,
            batch_size,
        }
    }

    /// One reconciliation pass.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<ReconcileReport, LoanError> {
        self.workflow
            .reconcile(&CallContext::default(), self.batch_size)
            .await
    }

    /// Run passes forever, one per interval. Failed passes are logged and
    /// retried on the next tick.
    pub async fn run(self) {
        info!(
            interval_secs = self.interval.as_secs(),
            batch_size = self.batch_size,
            "Loan reconciler started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        // The first tick fires immediately; start with a full interval wait.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                error!(error = %e, "Reconciliation pass failed");
            }
        }
    }
}
