use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// No cached record and the user service is unreachable; the identity
    /// cannot be resolved at all.
    #[error("User {0} is unavailable: no cached record and the user service could not be reached")]
    UserUnavailable(i64),

    #[error("User {0} does not have the required streamer role")]
    RoleMismatch(i64),

    #[error("Streamer validation failed: {0}")]
    StreamerInvalid(String),

    #[error("Donator validation failed: {0}")]
    DonatorInvalid(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::UserUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::RoleMismatch(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::StreamerInvalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::DonatorInvalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let error_type = match self {
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::UserUnavailable(_) => "USER_UNAVAILABLE",
            AppError::RoleMismatch(_) => "ROLE_MISMATCH",
            AppError::StreamerInvalid(_) => "STREAMER_INVALID",
            AppError::DonatorInvalid(_) => "DONATOR_INVALID",
            AppError::Internal(_) => "INTERNAL_ERROR",
        };

        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_failures_are_rejected_not_retried() {
        assert_eq!(
            AppError::StreamerInvalid("x".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::DonatorInvalid("x".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::RoleMismatch(1).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn unresolvable_identity_maps_to_service_unavailable() {
        assert_eq!(
            AppError::UserUnavailable(42).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
