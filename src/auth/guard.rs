//! Access guard for protected routes.
//!
//! Validates the bearer access token and attaches the caller's identity to the
//! request extensions. Pure token verification, the user store is never consulted.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use super::errors::AuthError;
use crate::jwt::JwtConfig;
use crate::store::Role;

/// Identity decoded from a valid access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub username: String,
    pub roles: Vec<Role>,
}

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(AuthError::MissingToken)?
        .to_str()
        .map_err(|_| AuthError::MalformedHeader)?;

    let token = value
        .strip_prefix("Bearer ")
        .ok_or(AuthError::MalformedHeader)?
        .trim();

    if token.is_empty() || token.contains(char::is_whitespace) {
        return Err(AuthError::MalformedHeader);
    }

    Ok(token)
}

/// Validate the request's bearer token and decode the caller's identity.
pub fn authenticate(jwt: &JwtConfig, headers: &HeaderMap) -> Result<AuthenticatedUser, AuthError> {
    let token = bearer_token(headers)?;

    let claims = jwt.validate_access_token(token).map_err(|e| {
        debug!(error = %e, "Rejected access token");
        AuthError::InvalidToken
    })?;

    Ok(AuthenticatedUser {
        username: claims.username,
        roles: claims.roles,
    })
}

/// Middleware that rejects requests without a valid access token.
pub async fn require_access_token(
    State(jwt): State<Arc<JwtConfig>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let user = authenticate(&jwt, request.headers())?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}
