//! Domain models for loans-service.

mod loan;

pub use loan::{borrow_key, return_key, Loan, StockPhase, StockState};
