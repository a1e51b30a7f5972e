//! Loans Service - borrow/return workflow for the library.

pub mod config;
pub mod grpc;
pub mod models;
pub mod services;
pub mod startup;
