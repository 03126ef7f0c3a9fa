//! Error conversion between `AppError` and `tonic::Status`.
//!
//! | AppError | gRPC Status |
//! |----------|-------------|
//! | `ValidationError`, `BadRequest` | `INVALID_ARGUMENT` |
//! | `NotFound` | `NOT_FOUND` |
//! | `InvalidState` | `FAILED_PRECONDITION` |
//! | `Conflict` | `ALREADY_EXISTS` |
//! | `ServiceUnavailable` | `UNAVAILABLE` |
//! | `InternalError`, `DatabaseError`, `ConfigError` | `INTERNAL` |

use tonic::Status;

use crate::error::AppError;

/// Extension trait for converting types into `tonic::Status`.
pub trait IntoStatus {
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
            AppError::InvalidState(err) => Status::failed_precondition(err.to_string()),
            AppError::Conflict(err) => Status::already_exists(err.to_string()),
            AppError::ServiceUnavailable => Status::unavailable("Service unavailable"),
            AppError::InternalError(err) => {
                // Full context stays in the logs, never in the response.
                tracing::error!(error = ?err, "Internal error");
                Status::internal("Internal server error")
            }
            AppError::DatabaseError(err) => {
                tracing::error!(error = %err, "Database error");
                Status::internal("Database error")
            }
            AppError::ConfigError(err) => {
                tracing::error!(error = %err, "Configuration error");
                Status::internal("Configuration error")
            }
        }
    }
}

impl From<AppError> for Status {
    fn from(err: AppError) -> Self {
        err.into_status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn invalid_state_is_failed_precondition() {
        let err = AppError::InvalidState(anyhow::anyhow!("POD missing for files: F-1"));
        let status: Status = err.into();
        assert_eq!(status.code(), Code::FailedPrecondition);
        assert!(status.message().contains("F-1"));
    }

    #[test]
    fn conflict_is_already_exists() {
        let status: Status = AppError::Conflict(anyhow::anyhow!("already invoiced")).into();
        assert_eq!(status.code(), Code::AlreadyExists);
    }

    #[test]
    fn internal_details_are_hidden() {
        let status: Status =
            AppError::DatabaseError(anyhow::anyhow!("password=hunter2 connection refused")).into();
        assert_eq!(status.code(), Code::Internal);
        assert!(!status.message().contains("hunter2"));
    }
}
