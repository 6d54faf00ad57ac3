use crate::middleware::error_handling;
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(AppError::status_code(self))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        error_handling::into_response(self)
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    /// Malformed input: empty text, missing media locator, unknown kind.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Semantically impossible request, e.g. a conversation with oneself.
    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    /// Unique constraint lost to a concurrent writer.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("operation timed out")]
    Timeout,

    #[error("database error: {0}")]
    Database(String),

    #[error("internal server error")]
    Internal,
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => AppError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::Conflict(db.message().to_string())
            }
            other => AppError::Database(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        AppError::StartServer(format!("migrations: {e}"))
    }
}

impl From<tokio::time::error::Elapsed> for AppError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        AppError::Timeout
    }
}

impl AppError {
    /// Returns whether this error is retryable (e.g., database connection timeout)
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Database(msg) => {
                msg.contains("pool timed out")
                    || msg.contains("closed pool")
                    || msg.contains("error communicating with database")
            }
            AppError::Timeout | AppError::Internal => true,
            _ => false,
        }
    }

    /// Returns HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation(_) | AppError::Invalid(_) => 400,
            AppError::Unauthorized => 401,
            AppError::Forbidden => 403,
            AppError::NotFound => 404,
            AppError::Conflict(_) => 409,
            AppError::Timeout => 504,
            AppError::Database(_)
            | AppError::Internal
            | AppError::Config(_)
            | AppError::StartServer(_) => 500,
        }
    }

    /// Message that is safe to put in front of a client.
    ///
    /// Storage and configuration details stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            AppError::Validation(msg) | AppError::Invalid(msg) => msg.clone(),
            AppError::Unauthorized => "unauthorized".into(),
            AppError::Forbidden => "not a member of this conversation".into(),
            AppError::NotFound => "conversation or message not found".into(),
            AppError::Conflict(_) => "conflicting update, retry".into(),
            AppError::Timeout => "request timed out".into(),
            AppError::Database(_)
            | AppError::Internal
            | AppError::Config(_)
            | AppError::StartServer(_) => "internal error".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_kind() {
        assert_eq!(AppError::Validation("x".into()).status_code(), 400);
        assert_eq!(AppError::Invalid("x".into()).status_code(), 400);
        assert_eq!(AppError::Unauthorized.status_code(), 401);
        assert_eq!(AppError::Forbidden.status_code(), 403);
        assert_eq!(AppError::NotFound.status_code(), 404);
        assert_eq!(AppError::Timeout.status_code(), 504);
        assert_eq!(AppError::Database("boom".into()).status_code(), 500);
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        assert_eq!(AppError::from(sqlx::Error::RowNotFound), AppError::NotFound);
    }

    #[test]
    fn pool_timeouts_are_retryable() {
        assert!(AppError::from(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!AppError::Forbidden.is_retryable());
    }

    #[test]
    fn client_message_hides_storage_details() {
        let err = AppError::Database("relation \"messages\" does not exist".into());
        assert_eq!(err.client_message(), "internal error");
        assert_eq!(
            AppError::Validation("text message requires content".into()).client_message(),
            "text message requires content"
        );
    }
}
