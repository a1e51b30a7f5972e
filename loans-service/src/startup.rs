//! Application startup and lifecycle management.

use crate::config::{LoansConfig, ReconcilerConfig};
use crate::grpc::{
    access::build_gate,
    proto::{loans_service_server::LoansServiceServer, FILE_DESCRIPTOR_SET},
    LoansServiceImpl,
};
use crate::services::{
    get_metrics, init_metrics, AccountLogin, CachedLogin, CatalogStockLedger, Database,
    LoanStore, LoanWorkflow, Reconciler, ServiceCredentials, StockLedger,
};
use axum::{
    extract::State, http::StatusCode, middleware, response::IntoResponse, routing::get, Json,
    Router,
};
use serde_json::json;
use service_core::config::Config as CommonConfig;
use service_core::error::AppError;
use service_core::grpc::{
    create_health_service, trace_context_interceptor, AccountsClient, CatalogClient,
    ChannelConfig, TokenValidator,
};
use service_core::middleware::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tonic::transport::Server as GrpcServer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

const SERVICE_NAME: &str = "loans-service";

/// Shared application state. The loan store, stock ledger and token validator
/// are trait objects so tests can run the full server on fakes.
#[derive(Clone)]
pub struct AppState {
    pub loans: Arc<dyn LoanStore>,
    pub ledger: Arc<dyn StockLedger>,
    pub workflow: LoanWorkflow,
    pub validator: Arc<dyn TokenValidator>,
}

impl AppState {
    pub fn new(
        loans: Arc<dyn LoanStore>,
        ledger: Arc<dyn StockLedger>,
        validator: Arc<dyn TokenValidator>,
    ) -> Self {
        Self {
            workflow: LoanWorkflow::new(loans.clone(), ledger.clone()),
            loans,
            ledger,
            validator,
        }
    }
}

/// Liveness: the process is up and serving HTTP.
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": SERVICE_NAME,
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// Readiness: every dependency answers.
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.workflow.health().await;
    let code = if report.is_healthy() {
        tracing::debug!("Readiness check passed");
        StatusCode::OK
    } else {
        tracing::warn!(status = report.status(), "Readiness check failed");
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(json!({
            "status": report.status(),
            "components": report.components,
        })),
    )
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    grpc_port: u16,
    http_listener: TcpListener,
    grpc_listener: TcpListener,
    state: AppState,
    reconciler: Option<Reconciler>,
}

impl Application {
    /// Connect to Postgres, accounts and catalog, run migrations and bind
    /// listeners.
    pub async fn build(config: LoansConfig) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;
        db.run_migrations().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            e
        })?;

        let accounts = AccountsClient::connect(&ChannelConfig::new(&config.accounts_service.url))
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    endpoint = %config.accounts_service.url,
                    "Failed to connect to accounts-service"
                );
                AppError::ServiceUnavailable(format!("accounts-service: {}", e))
            })?;

        let catalog = CatalogClient::connect(&ChannelConfig::new(&config.catalog_service.url))
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    endpoint = %config.catalog_service.url,
                    "Failed to connect to catalog-service"
                );
                AppError::ServiceUnavailable(format!("catalog-service: {}", e))
            })?;

        let credentials: Arc<dyn ServiceCredentials> = Arc::new(CachedLogin::new(
            AccountLogin::new(
                accounts.clone(),
                config.service_account.email.clone(),
                config.service_account.password.clone(),
            ),
        ));

        let state = AppState::new(
            Arc::new(db),
            Arc::new(CatalogStockLedger::new(catalog, credentials)),
            Arc::new(accounts),
        );

        let reconciler = reconciler_for(&config.reconciler, &state);
        let app = Self::with_state(&config.common, state).await?;
        Ok(match reconciler {
            Some(reconciler) => app.with_reconciler(reconciler),
            None => app,
        })
    }

    /// Bind listeners around an already assembled state.
    pub async fn with_state(common: &CommonConfig, state: AppState) -> Result<Self, AppError> {
        init_metrics();

        let http_addr = SocketAddr::from(([0, 0, 0, 0], common.port));
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        let grpc_addr = SocketAddr::from(([0, 0, 0, 0], common.grpc_port()));
        let grpc_listener = TcpListener::bind(grpc_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %grpc_addr, "Failed to bind gRPC listener");
            AppError::from(e)
        })?;
        let grpc_port = grpc_listener.local_addr()?.port();

        tracing::info!(
            http_port = http_port,
            grpc_port = grpc_port,
            "Loans service listeners bound"
        );

        Ok(Self {
            http_port,
            grpc_port,
            http_listener,
            grpc_listener,
            state,
            reconciler: None,
        })
    }

    /// Run a background reconciler alongside the servers.
    pub fn with_reconciler(mut self, reconciler: Reconciler) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn grpc_port(&self) -> u16 {
        self.grpc_port
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let http_router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(request_id_middleware))
            .with_state(self.state.clone());

        let health = create_health_service(SERVICE_NAME).await;

        let gate = build_gate(self.state.validator.clone());
        let loans_service = LoansServiceImpl::new(self.state.workflow.clone(), gate)
            .with_health_reporter(health.reporter.clone());

        let reflection_service = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build_v1()
            .map_err(|e| {
                std::io::Error::other(format!("Failed to build reflection service: {}", e))
            })?;

        let grpc_trace_layer = TraceLayer::new_for_grpc()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::DEBUG));

        let loans_service_with_interceptor =
            LoansServiceServer::with_interceptor(loans_service, trace_context_interceptor);

        let incoming = tokio_stream::wrappers::TcpListenerStream::new(self.grpc_listener);
        let grpc_server = GrpcServer::builder()
            .layer(grpc_trace_layer)
            .add_service(health.server)
            .add_service(reflection_service)
            .add_service(loans_service_with_interceptor)
            .serve_with_incoming(incoming);

        let reconciler = self.reconciler;
        let reconcile = async move {
            match reconciler {
                Some(reconciler) => reconciler.run().await,
                None => std::future::pending::<()>().await,
            }
        };

        tracing::info!(
            service = SERVICE_NAME,
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            grpc_port = self.grpc_port,
            "Service ready to accept connections"
        );

        tokio::select! {
            result = axum::serve(self.http_listener, http_router) => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "HTTP server error");
                    return Err(std::io::Error::other(format!("HTTP server error: {}", e)));
                }
            }
            result = grpc_server => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "gRPC server error");
                    return Err(std::io::Error::other(format!("gRPC server error: {}", e)));
                }
            }
            _ = reconcile => {}
        }

        Ok(())
    }
}

fn reconciler_for(config: &ReconcilerConfig, state: &AppState) -> Option<Reconciler> {
    config.interval.map(|interval| {
        Reconciler::new(state.workflow.clone(), interval, config.batch_size)
    })
}
