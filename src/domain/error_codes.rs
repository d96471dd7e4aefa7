use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for structured error handling.
///
/// The SCREAMING_SNAKE serialized form is part of the wire contract; renaming
/// a variant is a breaking API change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation
    ValidationError,

    // Authentication / authorization
    AuthRequired,
    AuthInvalidToken,
    Forbidden,

    // Not found (also used for resources not owned by the caller)
    NotFound,

    // Conflicts
    ActiveRequestExists,
    DuplicateField,
    LobbyFull,

    // Illegal state transitions
    IllegalState,

    // Matchmaking eligibility
    UserIneligible,
    InvalidGame,

    // External dependency
    ServiceUnavailable,

    // Internal
    InternalServerError,
}

impl ErrorCode {
    /// Human-readable default message for this code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::ValidationError => "One or more fields failed validation.",
            Self::AuthRequired => "Authentication is required for this endpoint.",
            Self::AuthInvalidToken => "The bearer token is invalid or has expired.",
            Self::Forbidden => "You do not have permission to perform this action.",
            Self::NotFound => "The requested resource was not found.",
            Self::ActiveRequestExists => {
                "You already have an active match request. Cancel it before submitting another."
            }
            Self::DuplicateField => "A resource with this value already exists.",
            Self::LobbyFull => "The lobby has reached its maximum capacity.",
            Self::IllegalState => "The resource is not in a state that allows this operation.",
            Self::UserIneligible => "Your account is not currently eligible for matchmaking.",
            Self::InvalidGame => "One or more requested games are not in the catalogue.",
            Self::ServiceUnavailable => "A required upstream service is temporarily unavailable.",
            Self::InternalServerError => "An internal server error occurred.",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_to_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&ErrorCode::ActiveRequestExists).unwrap(),
            "\"ACTIVE_REQUEST_EXISTS\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::ValidationError).unwrap(),
            "\"VALIDATION_ERROR\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::LobbyFull).unwrap(),
            "\"LOBBY_FULL\""
        );
    }

    #[test]
    fn all_codes_have_descriptions() {
        let codes = [
            ErrorCode::ValidationError,
            ErrorCode::AuthRequired,
            ErrorCode::AuthInvalidToken,
            ErrorCode::Forbidden,
            ErrorCode::NotFound,
            ErrorCode::ActiveRequestExists,
            ErrorCode::DuplicateField,
            ErrorCode::LobbyFull,
            ErrorCode::IllegalState,
            ErrorCode::UserIneligible,
            ErrorCode::InvalidGame,
            ErrorCode::ServiceUnavailable,
            ErrorCode::InternalServerError,
        ];
        for code in codes {
            assert!(!code.description().is_empty());
        }
    }
}
