//! Session endpoints.
//!
//! - POST `/register` - Create a user with no roles
//! - POST `/auth` - Log in, returns an access token and sets the refresh cookie
//! - GET `/logout` - Forget the refresh token and clear the cookie
//! - GET `/refresh` - Exchange the refresh cookie for a new access token

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::error::{ApiError, require_field};
use crate::auth::{
    AuthService, LogoutOutcome, REFRESH_COOKIE_NAME, clear_refresh_cookie, get_cookie,
    refresh_cookie,
};
use crate::rate_limit::{RateLimitConfig, rate_limit_auth};

#[derive(Clone)]
pub struct AuthState {
    pub service: AuthService,
    pub secure_cookies: bool,
}

pub fn router(state: AuthState, limits: Arc<RateLimitConfig>) -> Router {
    let limited = Router::new()
        .route("/register", post(register))
        .route("/auth", post(login))
        .route_layer(middleware::from_fn_with_state(limits, rate_limit_auth));

    Router::new()
        .merge(limited)
        .route("/logout", get(logout))
        .route("/refresh", get(refresh))
        .with_state(state)
}

#[derive(Deserialize)]
struct Credentials {
    user: Option<String>,
    pwd: Option<String>,
}

impl Credentials {
    fn from_body(body: Result<Json<Credentials>, JsonRejection>) -> Result<Self, ApiError> {
        let Json(credentials) =
            body.map_err(|_| ApiError::bad_request("Username and password are required."))?;
        Ok(credentials)
    }

    fn fields(&self) -> Result<(&str, &str), ApiError> {
        let user = require_field(&self.user, "Username")?;
        let pwd = require_field(&self.pwd, "Password")?;
        Ok((user, pwd))
    }
}

#[derive(Serialize)]
struct RegisterResponse {
    success: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AccessTokenResponse {
    access_token: String,
}

async fn register(
    State(state): State<AuthState>,
    body: Result<Json<Credentials>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let credentials = Credentials::from_body(body)?;
    let (user, pwd) = credentials.fields()?;

    state.service.register(user, pwd).await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            success: format!("New user {} created", user),
        }),
    ))
}

async fn login(
    State(state): State<AuthState>,
    body: Result<Json<Credentials>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let credentials = Credentials::from_body(body)?;
    let (user, pwd) = credentials.fields()?;

    let outcome = state.service.login(user, pwd).await?;

    let cookie = refresh_cookie(
        &outcome.refresh_token,
        outcome.refresh_ttl,
        state.secure_cookies,
    );

    Ok((
        StatusCode::OK,
        [(SET_COOKIE, cookie)],
        Json(AccessTokenResponse {
            access_token: outcome.access_token,
        }),
    ))
}

async fn logout(State(state): State<AuthState>, headers: HeaderMap) -> Result<Response, ApiError> {
    let cookie = get_cookie(&headers, REFRESH_COOKIE_NAME);

    match state.service.logout(cookie).await? {
        LogoutOutcome::NoSession => Ok(StatusCode::NO_CONTENT.into_response()),
        LogoutOutcome::StaleCookie | LogoutOutcome::LoggedOut => Ok((
            StatusCode::NO_CONTENT,
            [(SET_COOKIE, clear_refresh_cookie(state.secure_cookies))],
        )
            .into_response()),
    }
}

async fn refresh(
    State(state): State<AuthState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let cookie = get_cookie(&headers, REFRESH_COOKIE_NAME);

    let access = state.service.refresh(cookie).await?;

    Ok(Json(AccessTokenResponse {
        access_token: access.token,
    }))
}
