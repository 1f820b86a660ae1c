use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Failure taxonomy for the authentication service. Display strings are the
/// exact client-facing messages.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),
    #[error("User already exists")]
    DuplicateEmail,
    #[error("Incorrect email")]
    IncorrectEmail,
    #[error("Incorrect password")]
    IncorrectPassword,
    #[error("Current password is incorrect")]
    CurrentPasswordIncorrect,
    #[error("User not found")]
    UserNotFound,
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("No reset code requested")]
    NoResetRequested,
    #[error("Reset code has expired")]
    ResetCodeExpired,
    #[error("Invalid reset code")]
    InvalidResetCode,
    #[error("Failed to send reset code")]
    NotificationFailed,
    #[error("Service temporarily unavailable")]
    StoreUnavailable,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<crate::auth::repo::StoreError> for AuthError {
    fn from(e: crate::auth::repo::StoreError) -> Self {
        use crate::auth::repo::StoreError;
        match e {
            StoreError::DuplicateEmail => AuthError::DuplicateEmail,
            StoreError::Unavailable => AuthError::StoreUnavailable,
            StoreError::Other(e) => AuthError::Internal(e),
        }
    }
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Validation(_)
            | AuthError::DuplicateEmail
            | AuthError::NoResetRequested
            | AuthError::ResetCodeExpired
            | AuthError::InvalidResetCode => StatusCode::BAD_REQUEST,
            AuthError::IncorrectEmail
            | AuthError::IncorrectPassword
            | AuthError::CurrentPasswordIncorrect
            | AuthError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AuthError::UserNotFound => StatusCode::NOT_FOUND,
            AuthError::NotificationFailed
            | AuthError::StoreUnavailable
            | AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    // The reset endpoints report under a "message" key, everything else under
    // "error"; both shapes are part of the wire contract.
    fn body_key(&self) -> &'static str {
        match self {
            AuthError::NoResetRequested
            | AuthError::ResetCodeExpired
            | AuthError::InvalidResetCode
            | AuthError::NotificationFailed => "message",
            _ => "error",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match &self {
            AuthError::Internal(e) => {
                error!(error = %e, "internal error");
                if cfg!(debug_assertions) {
                    e.to_string()
                } else {
                    "Server error".to_string()
                }
            }
            other => other.to_string(),
        };
        let body = match self.body_key() {
            "message" => json!({ "success": false, "message": detail }),
            _ => json!({ "success": false, "error": detail }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_taxonomy() {
        assert_eq!(
            AuthError::Validation("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AuthError::DuplicateEmail.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AuthError::IncorrectEmail.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AuthError::IncorrectPassword.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(AuthError::UserNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(AuthError::NoResetRequested.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AuthError::ResetCodeExpired.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AuthError::InvalidResetCode.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AuthError::NotificationFailed.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AuthError::StoreUnavailable.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn reset_errors_use_the_message_key() {
        assert_eq!(AuthError::InvalidResetCode.body_key(), "message");
        assert_eq!(AuthError::ResetCodeExpired.body_key(), "message");
        assert_eq!(AuthError::IncorrectPassword.body_key(), "error");
        assert_eq!(AuthError::DuplicateEmail.body_key(), "error");
    }

    #[test]
    fn messages_match_the_wire_contract() {
        assert_eq!(AuthError::IncorrectEmail.to_string(), "Incorrect email");
        assert_eq!(
            AuthError::IncorrectPassword.to_string(),
            "Incorrect password"
        );
        assert_eq!(AuthError::DuplicateEmail.to_string(), "User already exists");
        assert_eq!(
            AuthError::ResetCodeExpired.to_string(),
            "Reset code has expired"
        );
    }
}
