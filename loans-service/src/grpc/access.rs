//! Loans method access rules.
//!
//! Borrow and History name the account they act for, so the gate applies the
//! self-or-admin rule before the handler runs. Return names a loan; its owner
//! is only known after the lookup, so the workflow checks it. An empty
//! account id names nobody and is left for the workflow to reject.

use service_core::grpc::{AuthGate, TargetSubject, TokenValidator};
use std::sync::Arc;

use super::proto::{
    BorrowRequest, HealthCheckRequest, HistoryRequest, ReconcileRequest, ReturnRequest,
};

pub const BORROW: &str = "/library.loans.v1.LoansService/Borrow";
pub const RETURN: &str = "/library.loans.v1.LoansService/Return";
pub const HISTORY: &str = "/library.loans.v1.LoansService/History";
pub const RECONCILE: &str = "/library.loans.v1.LoansService/Reconcile";
pub const HEALTH: &str = "/library.loans.v1.LoansService/Health";

pub fn build_gate(validator: Arc<dyn TokenValidator>) -> AuthGate {
    AuthGate::new(validator)
        .with_public_methods([HEALTH])
        .with_admin_methods([RECONCILE])
}

fn named_account(user_id: &str) -> Option<String> {
    (!user_id.is_empty()).then(|| user_id.to_string())
}

impl TargetSubject for BorrowRequest {
    fn target_subject(&self) -> Option<String> {
        named_account(&self.user_id)
    }
}

impl TargetSubject for HistoryRequest {
    fn target_subject(&self) -> Option<String> {
        named_account(&self.user_id)
    }
}

impl TargetSubject for ReturnRequest {}
impl TargetSubject for ReconcileRequest {}
impl TargetSubject for HealthCheckRequest {}
