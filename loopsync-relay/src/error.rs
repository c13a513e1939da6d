//! Relay error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use loopsync_core::sync::ServerError;

/// Relay server error types mapped to HTTP status codes.
#[derive(Debug)]
pub enum RelayError {
    Database(String),
    NotFound(String),
    Conflict(String),
    Unavailable(String),
    BadRequest(String),
    Internal(String),
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Database(e) => write!(f, "Database error: {}", e),
            Self::NotFound(e) => write!(f, "Not found: {}", e),
            Self::Conflict(e) => write!(f, "Conflict: {}", e),
            Self::Unavailable(e) => write!(f, "Service unavailable: {}", e),
            Self::BadRequest(e) => write!(f, "Bad request: {}", e),
            Self::Internal(e) => write!(f, "Internal error: {}", e),
        }
    }
}

impl std::error::Error for RelayError {}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Database(e) => {
                tracing::error!("Relay database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            Self::NotFound(e) => (StatusCode::NOT_FOUND, e.clone()),
            Self::Conflict(e) => (StatusCode::CONFLICT, e.clone()),
            Self::Unavailable(e) => (StatusCode::SERVICE_UNAVAILABLE, e.clone()),
            Self::BadRequest(e) => (StatusCode::BAD_REQUEST, e.clone()),
            Self::Internal(e) => {
                tracing::error!("Relay internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

impl From<ServerError> for RelayError {
    fn from(e: ServerError) -> Self {
        match e {
            ServerError::KeyNotFound => Self::NotFound("Sync key not found".to_string()),
            ServerError::EditConflict => {
                Self::Conflict("Version does not follow the stored version".to_string())
            }
            ServerError::ServiceUnavailable => {
                Self::Unavailable("Storage temporarily unavailable".to_string())
            }
            ServerError::Transport(e) => Self::Internal(e),
        }
    }
}

impl From<rusqlite::Error> for RelayError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_map_to_protocol_statuses() {
        let cases = [
            (ServerError::KeyNotFound, StatusCode::NOT_FOUND),
            (ServerError::EditConflict, StatusCode::CONFLICT),
            (ServerError::ServiceUnavailable, StatusCode::SERVICE_UNAVAILABLE),
            (
                ServerError::Transport("boom".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, status) in cases {
            let response = RelayError::from(error).into_response();
            assert_eq!(response.status(), status);
        }
    }

    #[test]
    fn bad_request_is_400() {
        let response = RelayError::BadRequest("nope".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
