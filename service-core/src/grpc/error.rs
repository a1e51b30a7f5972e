//! Error conversion utilities between `AppError` and `tonic::Status`.
//!
//! | AppError | gRPC Status |
//! |----------|-------------|
//! | `ValidationError`, `BadRequest` | `INVALID_ARGUMENT` |
//! | `NotFound` | `NOT_FOUND` |
//! | `Unauthorized` | `UNAUTHENTICATED` |
//! | `Forbidden` | `PERMISSION_DENIED` |
//! | `Conflict` | `ALREADY_EXISTS` |
//! | `FailedPrecondition` | `FAILED_PRECONDITION` |
//! | `ServiceUnavailable` | `UNAVAILABLE` |
//! | `DeadlineExceeded` | `DEADLINE_EXCEEDED` |
//! | everything else | `INTERNAL` |

use tonic::{Code, Status};

use crate::error::AppError;

/// Extension trait for converting types into `tonic::Status`.
pub trait IntoStatus {
    /// Convert into a `tonic::Status`.
    fn into_status(self) -> Status;
}

impl IntoStatus for AppError {
    fn into_status(self) -> Status {
        match self {
            AppError::ValidationError(err) => {
                Status::invalid_argument(format!("Validation error: {}", err))
            }
            AppError::BadRequest(err) => Status::invalid_argument(err.to_string()),
            AppError::NotFound(err) => Status::not_found(err.to_string()),
            AppError::Unauthorized(err) => Status::unauthenticated(err.to_string()),
            AppError::Forbidden(err) => Status::permission_denied(err.to_string()),
            AppError::Conflict(err) => Status::already_exists(err.to_string()),
            AppError::FailedPrecondition(err) => Status::failed_precondition(err.to_string()),
            AppError::InternalError(err) => {
                // Log the full error but don't expose it to clients
                tracing::error!(error = %err, "Internal error");
                Status::internal("internal error")
            }
            AppError::ServiceUnavailable(msg) => {
                tracing::warn!(error = %msg, "Dependency unavailable");
                Status::unavailable("service unavailable")
            }
            AppError::DeadlineExceeded => Status::deadline_exceeded("deadline exceeded"),
            AppError::DatabaseError(err) => {
                tracing::error!(error = %err, "Database error");
                Status::internal("database error")
            }
            AppError::ConfigError(err) => {
                tracing::error!(error = %err, "Configuration error");
                Status::internal("configuration error")
            }
        }
    }
}

impl From<AppError> for Status {
    fn from(err: AppError) -> Self {
        err.into_status()
    }
}

/// Convert a `tonic::Status` back to an `AppError`.
/// Used when a gRPC client receives an error and needs to propagate it.
impl From<Status> for AppError {
    fn from(status: Status) -> Self {
        match status.code() {
            Code::InvalidArgument | Code::OutOfRange => {
                AppError::BadRequest(anyhow::anyhow!("{}", status.message()))
            }
            Code::NotFound => AppError::NotFound(anyhow::anyhow!("{}", status.message())),
            Code::Unauthenticated => {
                AppError::Unauthorized(anyhow::anyhow!("{}", status.message()))
            }
            Code::PermissionDenied => AppError::Forbidden(anyhow::anyhow!("{}", status.message())),
            Code::AlreadyExists => AppError::Conflict(anyhow::anyhow!("{}", status.message())),
            Code::FailedPrecondition => {
                AppError::FailedPrecondition(anyhow::anyhow!("{}", status.message()))
            }
            Code::Unavailable => AppError::ServiceUnavailable(status.message().to_string()),
            Code::DeadlineExceeded | Code::Cancelled => AppError::DeadlineExceeded,
            Code::Ok => AppError::InternalError(anyhow::anyhow!("Unexpected OK status as error")),
            _ => AppError::InternalError(anyhow::anyhow!(
                "Remote call failed ({:?}): {}",
                status.code(),
                status.message()
            )),
        }
    }
}

/// Result type alias for gRPC handlers.
pub type GrpcResult<T> = Result<tonic::Response<T>, Status>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_to_status() {
        let err = AppError::NotFound(anyhow::anyhow!("book not found"));
        let status: Status = err.into();
        assert_eq!(status.code(), Code::NotFound);
        assert_eq!(status.message(), "book not found");
    }

    #[test]
    fn test_precondition_and_conflict_codes() {
        let status = AppError::FailedPrecondition(anyhow::anyhow!("book already returned"))
            .into_status();
        assert_eq!(status.code(), Code::FailedPrecondition);

        let status = AppError::Conflict(anyhow::anyhow!("email already exists")).into_status();
        assert_eq!(status.code(), Code::AlreadyExists);
    }

    #[test]
    fn test_internal_errors_hide_details() {
        let status = AppError::DatabaseError(anyhow::anyhow!("connection refused on 10.0.0.3"))
            .into_status();
        assert_eq!(status.code(), Code::Internal);
        assert!(!status.message().contains("10.0.0.3"));
    }

    #[test]
    fn test_status_to_app_error() {
        let status = Status::not_found("Resource not found");
        let err: AppError = status.into();
        match err {
            AppError::NotFound(e) => assert!(e.to_string().contains("Resource not found")),
            _ => panic!("Expected NotFound error"),
        }
    }

    #[test]
    fn test_unknown_remote_code_becomes_internal() {
        let err: AppError = Status::data_loss("disk gone").into();
        assert!(matches!(err, AppError::InternalError(_)));
    }
}
