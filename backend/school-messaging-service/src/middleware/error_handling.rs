use crate::error::AppError;
use actix_web::{http::StatusCode, HttpResponse};
use serde::{Deserialize, Serialize};

/// JSON body of every non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status: u16,
    pub error_type: String,
    pub code: String,
}

pub fn map_error(err: &AppError) -> (StatusCode, ErrorResponse) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let (error_type, code) = match err {
        AppError::Validation(_) => ("validation_error", "INVALID_REQUEST"),
        AppError::Invalid(_) => ("validation_error", "INVALID_ARGUMENT"),
        AppError::Unauthorized => ("authentication_error", "INVALID_CREDENTIALS"),
        AppError::Forbidden => ("authorization_error", "NOT_A_MEMBER"),
        AppError::NotFound => ("not_found_error", "NOT_FOUND"),
        AppError::Conflict(_) => ("conflict_error", "CONFLICT"),
        AppError::Timeout => ("server_error", "TIMEOUT"),
        AppError::Database(_) => ("server_error", "DATABASE_ERROR"),
        AppError::Config(_) | AppError::StartServer(_) | AppError::Internal => {
            ("server_error", "INTERNAL_SERVER_ERROR")
        }
    };

    if status.is_server_error() {
        tracing::error!(error = %err, code, "request failed");
    }

    let response = ErrorResponse {
        error: status.canonical_reason().unwrap_or("Error").to_string(),
        message: err.client_message(),
        status: status.as_u16(),
        error_type: error_type.to_string(),
        code: code.to_string(),
    };

    (status, response)
}

pub fn into_response(err: &AppError) -> HttpResponse {
    let (status, body) = map_error(err);
    HttpResponse::build(status).json(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbidden_maps_to_403_with_code() {
        let (status, body) = map_error(&AppError::Forbidden);
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body.error, "Forbidden");
        assert_eq!(body.code, "NOT_A_MEMBER");
        assert_eq!(body.status, 403);
    }

    #[test]
    fn validation_message_reaches_client() {
        let (status, body) = map_error(&AppError::Validation("text message requires content".into()));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.message, "text message requires content");
        assert_eq!(body.error_type, "validation_error");
    }

    #[test]
    fn database_details_stay_server_side() {
        let (status, body) = map_error(&AppError::Database("relation \"messages\" does not exist".into()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.message, "internal error");
        assert!(!body.message.contains("relation"));
    }

    #[test]
    fn timeout_is_gateway_timeout() {
        let (status, _) = map_error(&AppError::Timeout);
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    }
}
