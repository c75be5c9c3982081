use axum::http::StatusCode;
use axum::response::{Json as ResponseJson, Response};
use domain::ChronicleError;

use crate::models::ErrorResponse;

/// Maps the core error taxonomy (§7) to HTTP status codes. `ChronicleError`
/// covers controller/provider failures; `RepositoryError` is folded in
/// separately since it crosses the `database` crate boundary.
pub fn chronicle_error_status(error: &ChronicleError) -> StatusCode {
    match error {
        ChronicleError::Validation(_) => StatusCode::BAD_REQUEST,
        ChronicleError::Authorization(_) => StatusCode::FORBIDDEN,
        ChronicleError::TransientProvider(_) => StatusCode::SERVICE_UNAVAILABLE,
        ChronicleError::ResourceExhaustion(_) => StatusCode::INSUFFICIENT_STORAGE,
        ChronicleError::InvariantViolation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ChronicleError::Zombie(_) => StatusCode::GONE,
    }
}

pub fn repository_error_status(error: &database::RepositoryError) -> StatusCode {
    use database::RepositoryError;
    match error {
        RepositoryError::NotFound => StatusCode::NOT_FOUND,
        RepositoryError::AlreadyExists => StatusCode::CONFLICT,
        RepositoryError::ConversationDeleted => StatusCode::GONE,
        RepositoryError::ForeignKeyViolation(_) | RepositoryError::RequiredFieldMissing(_) | RepositoryError::ValidationFailed(_) => {
            StatusCode::BAD_REQUEST
        }
        RepositoryError::AuthenticationFailed => StatusCode::UNAUTHORIZED,
        RepositoryError::TransactionConflict => StatusCode::CONFLICT,
        RepositoryError::ConnectionFailed(_) | RepositoryError::PoolError(_) | RepositoryError::DatabaseError(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    use axum::response::IntoResponse;
    (status, ResponseJson(ErrorResponse::new(message, error_type(status)))).into_response()
}

fn error_type(status: StatusCode) -> &'static str {
    match status {
        StatusCode::BAD_REQUEST => "invalid_request_error",
        StatusCode::UNAUTHORIZED => "authentication_error",
        StatusCode::FORBIDDEN => "authorization_error",
        StatusCode::NOT_FOUND => "not_found_error",
        StatusCode::CONFLICT | StatusCode::GONE => "conflict_error",
        _ => "server_error",
    }
}

pub fn repository_error_response(error: database::RepositoryError) -> Response {
    let status = repository_error_status(&error);
    error_response(status, error.to_string())
}
