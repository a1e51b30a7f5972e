//! Catalog method access rules. No catalog request names a target account.
//!
//! Stock only moves through AdjustStock, which the loans service calls under
//! its own admin service account. End users never adjust stock directly.

use service_core::grpc::{AuthGate, TargetSubject, TokenValidator};
use std::sync::Arc;

use super::proto::{
    AdjustStockRequest, CreateBookRequest, GetBookRequest, HealthCheckRequest, ListBooksRequest,
    RecommendRequest, UpdateBookRequest,
};

pub const CREATE: &str = "/library.catalog.v1.CatalogService/Create";
pub const GET_BOOK: &str = "/library.catalog.v1.CatalogService/GetBook";
pub const LIST_BOOKS: &str = "/library.catalog.v1.CatalogService/ListBooks";
pub const RECOMMEND: &str = "/library.catalog.v1.CatalogService/Recommend";
pub const UPDATE_BOOK: &str = "/library.catalog.v1.CatalogService/UpdateBook";
pub const ADJUST_STOCK: &str = "/library.catalog.v1.CatalogService/AdjustStock";
pub const HEALTH: &str = "/library.catalog.v1.CatalogService/Health";

pub fn build_gate(validator: Arc<dyn TokenValidator>) -> AuthGate {
    AuthGate::new(validator)
        .with_public_methods([HEALTH])
        .with_admin_methods([UPDATE_BOOK, ADJUST_STOCK])
}

impl TargetSubject for CreateBookRequest {}
impl TargetSubject for GetBookRequest {}
impl TargetSubject for ListBooksRequest {}
impl TargetSubject for RecommendRequest {}
impl TargetSubject for UpdateBookRequest {}
impl TargetSubject for AdjustStockRequest {}
impl TargetSubject for HealthCheckRequest {}
