//! AccountsService gRPC implementation.

use crate::grpc::access;
use crate::grpc::proto::{
    accounts_service_server::AccountsService, AccountResponse, ComponentStatus,
    GetAccountRequest, HealthCheckRequest, HealthCheckResponse, LoginRequest, LoginResponse,
    LogoutRequest, LogoutResponse, RegisterRequest, UpdateAccountRequest, ValidateTokenRequest,
    ValidateTokenResponse,
};
use crate::models::{role_from_proto, role_to_proto, Account, RegisterInput, UpdateInput};
use crate::services::metrics::{GRPC_REQUESTS_TOTAL, GRPC_REQUEST_DURATION};
use crate::services::{AccountError, AccountService, TokenService};
use chrono::{DateTime, Utc};
use prost_types::Timestamp;
use service_core::error::AppError;
use service_core::grpc::{AuthGate, HealthReport, HealthReporter, IntoStatus};
use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::instrument;

pub struct AccountsServiceImpl {
    accounts: AccountService,
    tokens: Arc<TokenService>,
    gate: AuthGate,
    health_reporter: Option<HealthReporter>,
}

impl AccountsServiceImpl {
    pub fn new(accounts: AccountService, tokens: Arc<TokenService>, gate: AuthGate) -> Self {
        Self {
            accounts,
            tokens,
            gate,
            health_reporter: None,
        }
    }

    /// Keep the standard `grpc.health.v1` status in step with `Health` calls.
    pub fn with_health_reporter(mut self, reporter: HealthReporter) -> Self {
        self.health_reporter = Some(reporter);
        self
    }

    fn account_to_proto(account: &Account) -> AccountResponse {
        AccountResponse {
            id: account.id,
            name: account.name.clone(),
            email: account.email.clone(),
            role: role_to_proto(account.role()),
            active: account.active,
            created_at: Some(to_timestamp(account.created_at)),
            updated_at: Some(to_timestamp(account.updated_at)),
        }
    }

    fn subject_account_id(subject_id: &str) -> Result<i64, Status> {
        subject_id.parse().map_err(|_| {
            tracing::error!(subject_id = subject_id, "Identity subject is not an account id");
            Status::internal("internal error")
        })
    }
}

pub(crate) fn to_timestamp(at: DateTime<Utc>) -> Timestamp {
    Timestamp {
        seconds: at.timestamp(),
        nanos: at.timestamp_subsec_nanos() as i32,
    }
}

pub(crate) fn health_to_proto(report: &HealthReport) -> HealthCheckResponse {
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

/// Count the call and map a domain error onto the wire.
fn finish<T, E>(method: &str, result: Result<T, E>) -> Result<Response<T>, Status>
where
    E: Into<AppError>,
{
    match result {
        Ok(value) => {
            GRPC_REQUESTS_TOTAL
                .with_label_values(&[method, "ok"])
                .inc();
            Ok(Response::new(value))
        }
        Err(e) => {
            let status = e.into().into_status();
            GRPC_REQUESTS_TOTAL
                .with_label_values(&[method, &format!("{:?}", status.code())])
                .inc();
            Err(status)
        }
    }
}

#[tonic::async_trait]
impl AccountsService for AccountsServiceImpl {
    #[instrument(
        skip(self, request),
        fields(service = "accounts-service", method = "Register")
    )]
    async fn register(
        &self,
        request: Request<RegisterRequest>,
    ) -> Result<Response<AccountResponse>, Status> {
        let _timer = GRPC_REQUEST_DURATION
            .with_label_values(&["Register"])
            .start_timer();
        self.gate.check(access::REGISTER, &request).await?;

        let req = request.into_inner();
        let result = async {
            let role = role_from_proto(req.role).ok_or_else(|| {
                AccountError::InvalidInput(format!("unknown role {}", req.role))
            })?;
            let account = self
                .accounts
                .register(RegisterInput {
                    name: req.name,
                    email: req.email,
                    password: req.password,
                    role,
                })
                .await?;
            Ok::<_, AccountError>(Self::account_to_proto(&account))
        }
        .await;

        finish("Register", result)
    }

    #[instrument(
        skip(self, request),
        fields(service = "accounts-service", method = "Login")
    )]
    async fn login(
        &self,
        request: Request<LoginRequest>,
    ) -> Result<Response<LoginResponse>, Status> {
        let _timer = GRPC_REQUEST_DURATION
            .with_label_values(&["Login"])
            .start_timer();
        self.gate.check(access::LOGIN, &request).await?;

        let req = request.into_inner();
        let result = self
            .accounts
            .login(&req.email, &req.password)
            .await
            .map(|(_, issued)| LoginResponse {
                token: issued.token,
                expires_at: Some(to_timestamp(issued.expires_at)),
            });

        finish("Login", result)
    }

    #[instrument(
        skip(self, request),
        fields(service = "accounts-service", method = "Get")
    )]
    async fn get(
        &self,
        request: Request<GetAccountRequest>,
    ) -> Result<Response<AccountResponse>, Status> {
        let _timer = GRPC_REQUEST_DURATION
            .with_label_values(&["Get"])
            .start_timer();
        self.gate.authorize(access::GET, &request).await?;

        let id = request.into_inner().id;
        let result = self
            .accounts
            .get(id)
            .await
            .map(|account| Self::account_to_proto(&account));

        finish("Get", result)
    }

    #[instrument(
        skip(self, request),
        fields(service = "accounts-service", method = "Update")
    )]
    async fn update(
        &self,
        request: Request<UpdateAccountRequest>,
    ) -> Result<Response<AccountResponse>, Status> {
        let _timer = GRPC_REQUEST_DURATION
            .with_label_values(&["Update"])
            .start_timer();
        self.gate.authorize(access::UPDATE, &request).await?;

        let req = request.into_inner();
        let result = self
            .accounts
            .update(
                req.id,
                UpdateInput {
                    name: req.name,
                    email: req.email,
                },
            )
            .await
            .map(|account| Self::account_to_proto(&account));

        finish("Update", result)
    }

    #[instrument(
        skip(self, request),
        fields(service = "accounts-service", method = "ValidateToken")
    )]
    async fn validate_token(
        &self,
        request: Request<ValidateTokenRequest>,
    ) -> Result<Response<ValidateTokenResponse>, Status> {
        let _timer = GRPC_REQUEST_DURATION
            .with_label_values(&["ValidateToken"])
            .start_timer();
        self.gate.check(access::VALIDATE_TOKEN, &request).await?;

        let token = request.into_inner().token;
        let result = async {
            let claims = self.tokens.validate(&token).await?;
            let subject_id = claims.account_id()?;
            Ok::<_, crate::services::TokenError>(ValidateTokenResponse {
                valid: true,
                subject_id,
                role: role_to_proto(claims.role),
                email: claims.email.clone(),
                expires_at: Some(to_timestamp(claims.expires_at())),
            })
        }
        .await;

        finish("ValidateToken", result)
    }

    #[instrument(
        skip(self, request),
        fields(service = "accounts-service", method = "Logout")
    )]
    async fn logout(
        &self,
        request: Request<LogoutRequest>,
    ) -> Result<Response<LogoutResponse>, Status> {
        let _timer = GRPC_REQUEST_DURATION
            .with_label_values(&["Logout"])
            .start_timer();
        let identity = self.gate.authorize(access::LOGOUT, &request).await?;
        let account_id = Self::subject_account_id(&identity.subject_id)?;

        let result = self
            .accounts
            .logout(account_id)
            .await
            .map(|_| LogoutResponse {});

        finish("Logout", result)
    }

    #[instrument(
        skip(self, request),
        fields(service = "accounts-service", method = "Health")
    )]
    async fn health(
        &self,
        request: Request<HealthCheckRequest>,
    ) -> Result<Response<HealthCheckResponse>, Status> {
        self.gate.check(access::HEALTH, &request).await?;

        let report = self.accounts.health().await;
        if let Some(reporter) = &self.health_reporter {
            reporter.publish(&report).await;
        }

        finish::<_, AppError>("Health", Ok(health_to_proto(&report)))
    }
}
