use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

use crate::chat::ChatError;
use crate::domain::error_codes::ErrorCode;
use crate::lobby::LobbyError;
use crate::matchmaking::MatchmakingError;
use crate::notify::NotifyError;

/// Uniform wire error. Every response body, success or error, carries the
/// same envelope:
///
/// ```json
/// { "status": "success" | "error", "data": ..., "error": { ... } }
/// ```
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<Value>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: status_for(code),
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.description())
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn internal() -> Self {
        // Message is scrubbed: internals never leak onto the wire.
        Self::from_code(ErrorCode::InternalServerError)
    }
}

/// HTTP status per error code; part of the API contract.
fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::ValidationError => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorCode::AuthRequired | ErrorCode::AuthInvalidToken => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::ActiveRequestExists | ErrorCode::DuplicateField | ErrorCode::LobbyFull => {
            StatusCode::CONFLICT
        }
        ErrorCode::IllegalState | ErrorCode::UserIneligible | ErrorCode::InvalidGame => {
            StatusCode::BAD_REQUEST
        }
        ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "status": "error",
            "error": {
                "code": self.code,
                "message": self.message,
                "details": self.details,
            },
        });
        (self.status, Json(body)).into_response()
    }
}

/// Success envelope.
pub fn success<T: Serialize>(data: T) -> Response {
    Json(json!({ "status": "success", "data": data })).into_response()
}

/// Success envelope with an explicit status (201 on resource creation).
pub fn created<T: Serialize>(data: T) -> Response {
    (
        StatusCode::CREATED,
        Json(json!({ "status": "success", "data": data })),
    )
        .into_response()
}

impl From<MatchmakingError> for ApiError {
    fn from(err: MatchmakingError) -> Self {
        let code = err.code();
        match err {
            MatchmakingError::Validation(fields) => Self::from_code(code).with_details(
                json!(fields),
            ),
            MatchmakingError::UnknownGame(game) => {
                Self::new(code, format!("unknown game: {game}"))
            }
            MatchmakingError::Storage(inner) => {
                tracing::error!(error = %inner, "matchmaking storage error");
                Self::internal()
            }
            MatchmakingError::CatalogUnavailable(inner) => {
                tracing::error!(error = %inner, "game catalogue unavailable");
                Self::from_code(code)
            }
            other => Self::new(code, other.to_string()),
        }
    }
}

impl From<LobbyError> for ApiError {
    fn from(err: LobbyError) -> Self {
        let code = err.code();
        match err {
            LobbyError::Storage(inner) => {
                tracing::error!(error = %inner, "lobby storage error");
                Self::internal()
            }
            other => Self::new(code, other.to_string()),
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        let code = err.code();
        match err {
            ChatError::Storage(inner) => {
                tracing::error!(error = %inner, "chat storage error");
                Self::internal()
            }
            other => Self::new(code, other.to_string()),
        }
    }
}

impl From<NotifyError> for ApiError {
    fn from(err: NotifyError) -> Self {
        let code = err.code();
        match err {
            NotifyError::Storage(inner) => {
                tracing::error!(error = %inner, "notification storage error");
                Self::internal()
            }
            other => Self::new(code, other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_contract() {
        assert_eq!(
            status_for(ErrorCode::ValidationError),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(ErrorCode::ActiveRequestExists),
            StatusCode::CONFLICT
        );
        assert_eq!(status_for(ErrorCode::LobbyFull), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorCode::IllegalState), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorCode::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(ErrorCode::ServiceUnavailable),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn internal_error_scrubs_message() {
        let err = ApiError::internal();
        assert_eq!(err.message, ErrorCode::InternalServerError.description());
    }
}
