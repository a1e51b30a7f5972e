//! Which accounts methods are public, and which request kinds name a target
//! account for the self-or-admin check.

use service_core::grpc::{AuthGate, TargetSubject, TokenValidator};
use std::sync::Arc;

use super::proto::{
    GetAccountRequest, HealthCheckRequest, LoginRequest, LogoutRequest, RegisterRequest,
    UpdateAccountRequest, ValidateTokenRequest,
};

pub const REGISTER: &str = "/library.accounts.v1.AccountsService/Register";
pub const LOGIN: &str = "/library.accounts.v1.AccountsService/Login";
pub const GET: &str = "/library.accounts.v1.AccountsService/Get";
pub const UPDATE: &str = "/library.accounts.v1.AccountsService/Update";
pub const VALIDATE_TOKEN: &str = "/library.accounts.v1.AccountsService/ValidateToken";
pub const LOGOUT: &str = "/library.accounts.v1.AccountsService/Logout";
pub const HEALTH: &str = "/library.accounts.v1.AccountsService/Health";

/// Gate for the accounts service, validating in-process.
pub fn build_gate(validator: Arc<dyn TokenValidator>) -> AuthGate {
    AuthGate::new(validator).with_public_methods([REGISTER, LOGIN, VALIDATE_TOKEN, HEALTH])
}

impl TargetSubject for GetAccountRequest {
    fn target_subject(&self) -> Option<String> {
        Some(self.id.to_string())
    }
}

impl TargetSubject for UpdateAccountRequest {
    fn target_subject(&self) -> Option<String> {
        Some(self.id.to_string())
    }
}

impl TargetSubject for RegisterRequest {}
impl TargetSubject for LoginRequest {}
impl TargetSubject for ValidateTokenRequest {}
impl TargetSubject for LogoutRequest {}
impl TargetSubject for HealthCheckRequest {}
