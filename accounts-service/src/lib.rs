//! Accounts Service - registration, login and token validation for the library.

pub mod config;
pub mod grpc;
pub mod models;
pub mod services;
pub mod startup;
pub mod utils;
