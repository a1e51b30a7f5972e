use service_core::error::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Book not found")]
    NotFound,

    /// An idempotency key came back with a different book or delta than the
    /// change it was first used for.
    #[error("Idempotency key reused for a different stock change")]
    KeyReused,

    /// The delta would take stock below zero.
    #[error("Insufficient stock")]
    InsufficientStock,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Validation(e) => AppError::ValidationError(e),
            CatalogError::InvalidInput(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            CatalogError::NotFound => AppError::NotFound(anyhow::anyhow!("book not found")),
            CatalogError::KeyReused => AppError::BadRequest(anyhow::anyhow!(
                "idempotency key already used for a different stock change"
            )),
            CatalogError::InsufficientStock => {
                AppError::FailedPrecondition(anyhow::anyhow!("insufficient stock"))
            }
            CatalogError::Database(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            CatalogError::Internal(e) => AppError::InternalError(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_core::grpc::IntoStatus;
    use tonic::Code;

    #[test]
    fn test_stock_errors_map_to_wire_codes() {
        let status = AppError::from(CatalogError::InsufficientStock).into_status();
        assert_eq!(status.code(), Code::FailedPrecondition);

        let status = AppError::from(CatalogError::NotFound).into_status();
        assert_eq!(status.code(), Code::NotFound);

        let status = AppError::from(CatalogError::KeyReused).into_status();
        assert_eq!(status.code(), Code::InvalidArgument);
    }
}
