use service_core::error::AppError;
use thiserror::Error;

use super::stock_ledger::StockLedgerError;

#[derive(Error, Debug)]
pub enum LoanError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Book not found")]
    BookNotFound,

    #[error("Book not available")]
    BookNotAvailable,

    #[error("Transaction not found")]
    TransactionNotFound,

    #[error("Book already returned")]
    AlreadyReturned,

    /// The borrow's stock decrement is still unconfirmed.
    #[error("Borrow is still pending")]
    BorrowPending,

    #[error("Permission denied")]
    PermissionDenied,

    #[error(transparent)]
    StockLedger(#[from] StockLedgerError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<LoanError> for AppError {
    fn from(err: LoanError) -> Self {
        match err {
            LoanError::InvalidInput(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            LoanError::BookNotFound => AppError::NotFound(anyhow::anyhow!("book not found")),
            LoanError::BookNotAvailable => {
                AppError::FailedPrecondition(anyhow::anyhow!("book not available"))
            }
            LoanError::TransactionNotFound => {
                AppError::NotFound(anyhow::anyhow!("transaction not found"))
            }
            LoanError::AlreadyReturned => {
                AppError::FailedPrecondition(anyhow::anyhow!("book already returned"))
            }
            LoanError::BorrowPending => {
                AppError::FailedPrecondition(anyhow::anyhow!("borrow is still pending"))
            }
            LoanError::PermissionDenied => AppError::Forbidden(anyhow::anyhow!("permission denied")),
            LoanError::StockLedger(e) => match e {
                StockLedgerError::BookNotFound => {
                    AppError::NotFound(anyhow::anyhow!("book not found"))
                }
                StockLedgerError::InsufficientStock => {
                    AppError::FailedPrecondition(anyhow::anyhow!("book not available"))
                }
                StockLedgerError::Unavailable(msg) => {
                    AppError::ServiceUnavailable(format!("catalog-service: {}", msg))
                }
                StockLedgerError::DeadlineExceeded => AppError::DeadlineExceeded,
                StockLedgerError::Remote(status) => AppError::from(status),
            },
            LoanError::Database(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            LoanError::Internal(e) => AppError::InternalError(e),
        }
    }
}
