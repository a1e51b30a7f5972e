//! LoansService gRPC implementation.

use crate::grpc::access;
use crate::grpc::proto::{
    loans_service_server::LoansService as LoansRpc, BorrowRequest, ComponentStatus,
    HealthCheckRequest, HealthCheckResponse, HistoryRequest, HistoryResponse, LoanResponse,
    ReconcileRequest, ReconcileResponse, ReturnRequest,
};
use crate::models::Loan;
use crate::services::metrics::{GRPC_REQUESTS_TOTAL, GRPC_REQUEST_DURATION};
use crate::services::{LoanError, LoanWorkflow};
use chrono::{DateTime, Utc};
use prost_types::Timestamp;
use service_core::error::AppError;
use service_core::grpc::{AuthGate, CallContext, HealthReport, HealthReporter, IntoStatus};
use tonic::{Request, Response, Status};
use tracing::instrument;

pub struct LoansServiceImpl {
    workflow: LoanWorkflow,
    gate: AuthGate,
    health_reporter: Option<HealthReporter>,
}

impl LoansServiceImpl {
    pub fn new(workflow: LoanWorkflow, gate: AuthGate) -> Self {
        Self {
            workflow,
            gate,
            health_reporter: None,
        }
    }

    pub fn with_health_reporter(mut self, reporter: HealthReporter) -> Self {
        self.health_reporter = Some(reporter);
        self
    }

    fn loan_to_proto(loan: &Loan) -> LoanResponse {
        LoanResponse {
            transaction_id: loan.id.to_string(),
            user_id: loan.user_id.to_string(),
            book_id: loan.book_id.clone(),
            borrowed_at: Some(to_timestamp(&loan.borrowed_at)),
            returned_at: loan.returned_at.as_ref().map(to_timestamp),
            stock_state: loan.state().to_string(),
        }
    }

    fn health_to_proto(report: &HealthReport) -> HealthCheckResponse {
        HealthCheckResponse {
            status: report.status().to_string(),
            components: report
                .components
                .iter()
                .map(|c| ComponentStatus {
                    name: c.name.clone(),
                    status: c.status().to_string(),
                    message: c.message.clone(),
                })
                .collect(),
        }
    }
}

fn to_timestamp(at: &DateTime<Utc>) -> Timestamp {
    Timestamp {
        seconds: at.timestamp(),
        nanos: at.timestamp_subsec_nanos() as i32,
    }
}

fn finish<T>(method: &str, result: Result<T, LoanError>) -> Result<Response<T>, Status> {
    match result {
        Ok(value) => {
            GRPC_REQUESTS_TOTAL
                .with_label_values(&[method, "ok"])
                .inc();
            Ok(Response::new(value))
        }
        Err(e) => {
            let status = AppError::from(e).into_status();
            GRPC_REQUESTS_TOTAL
                .with_label_values(&[method, &format!("{:?}", status.code())])
                .inc();
            Err(status)
        }
    }
}

#[tonic::async_trait]
impl LoansRpc for LoansServiceImpl {
    #[instrument(skip(self, request), fields(service = "loans-service", method = "Borrow"))]
    async fn borrow(
        &self,
        request: Request<BorrowRequest>,
    ) -> Result<Response<LoanResponse>, Status> {
        let _timer = GRPC_REQUEST_DURATION
            .with_label_values(&["Borrow"])
            .start_timer();
        let ctx = CallContext::from_request(&request);
        self.gate.authorize(access::BORROW, &request).await?;

        let req = request.into_inner();
        let result = self
            .workflow
            .borrow(&ctx, &req.user_id, &req.book_id)
            .await
            .map(|loan| Self::loan_to_proto(&loan));

        finish("Borrow", result)
    }

    #[instrument(skip(self, request), fields(service = "loans-service", method = "Return"))]
    async fn r#return(
        &self,
        request: Request<ReturnRequest>,
    ) -> Result<Response<LoanResponse>, Status> {
        let _timer = GRPC_REQUEST_DURATION
            .with_label_values(&["Return"])
            .start_timer();
        let ctx = CallContext::from_request(&request);
        let identity = self.gate.authorize(access::RETURN, &request).await?;

        let transaction_id = request.into_inner().transaction_id;
        let result = self
            .workflow
            .return_book(&ctx, &identity, &transaction_id)
            .await
            .map(|loan| Self::loan_to_proto(&loan));

        finish("Return", result)
    }

    #[instrument(skip(self, request), fields(service = "loans-service", method = "History"))]
    async fn history(
        &self,
        request: Request<HistoryRequest>,
    ) -> Result<Response<HistoryResponse>, Status> {
        let _timer = GRPC_REQUEST_DURATION
            .with_label_values(&["History"])
            .start_timer();
        self.gate.authorize(access::HISTORY, &request).await?;

        let user_id = request.into_inner().user_id;
        let result = self
            .workflow
            .history(&user_id)
            .await
            .map(|loans| HistoryResponse {
                transactions: loans.iter().map(Self::loan_to_proto).collect(),
            });

        finish("History", result)
    }

    #[instrument(
        skip(self, request),
        fields(service = "loans-service", method = "Reconcile")
    )]
    async fn reconcile(
        &self,
        request: Request<ReconcileRequest>,
    ) -> Result<Response<ReconcileResponse>, Status> {
        let _timer = GRPC_REQUEST_DURATION
            .with_label_values(&["Reconcile"])
            .start_timer();
        let ctx = CallContext::from_request(&request);
        let identity = self.gate.authorize(access::RECONCILE, &request).await?;

        let limit = request.into_inner().limit;
        tracing::info!(caller = %identity.subject_id, limit = limit, "Reconciliation requested");
        let result = self
            .workflow
            .reconcile(&ctx, limit)
            .await
            .map(|report| ReconcileResponse {
                examined: report.examined,
                applied: report.applied,
                cancelled: report.cancelled,
                still_pending: report.still_pending,
            });

        finish("Reconcile", result)
    }

    #[instrument(skip(self, request), fields(service = "loans-service", method = "Health"))]
    async fn health(
        &self,
        request: Request<HealthCheckRequest>,
    ) -> Result<Response<HealthCheckResponse>, Status> {
        self.gate.check(access::HEALTH, &request).await?;

        let report = self.workflow.health().await;
        if let Some(reporter) = &self.health_reporter {
            reporter.publish(&report).await;
        }

        finish("Health", Ok(Self::health_to_proto(&report)))
    }
}
