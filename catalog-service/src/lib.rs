//! Catalog Service - books and their stock counters for the library.

pub mod config;
pub mod grpc;
pub mod models;
pub mod services;
pub mod startup;
