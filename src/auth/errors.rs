//! Authentication error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Rejections produced by the access guard and role checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// No Authorization header
    MissingToken,
    /// Header present but not `Bearer <token>`
    MalformedHeader,
    /// Signature, expiry or token type check failed
    InvalidToken,
    /// No identity on the request (guard never ran)
    NotAuthenticated,
    /// Identity present but none of the permitted roles
    InsufficientRole,
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::MissingToken
            | AuthError::MalformedHeader
            | AuthError::NotAuthenticated
            | AuthError::InsufficientRole => StatusCode::UNAUTHORIZED,
            AuthError::InvalidToken => StatusCode::FORBIDDEN,
        }
    }

    fn message(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "Missing authorization token",
            AuthError::MalformedHeader => "Invalid authorization format. Use: Bearer {token}",
            AuthError::InvalidToken => "Invalid or expired token",
            AuthError::NotAuthenticated => "Not authenticated",
            AuthError::InsufficientRole => "Insufficient permissions",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: &'static str,
        }

        (
            self.status_code(),
            Json(ErrorResponse {
                error: self.message(),
            }),
        )
            .into_response()
    }
}
