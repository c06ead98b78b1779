pub mod api;
pub mod auth;
pub mod cli;
pub mod jwt;
pub mod rate_limit;
pub mod request_log;
pub mod store;

use api::create_api_router;
use auth::{AuthService, IpSource};
use axum::{Router, middleware};
use jwt::JwtConfig;
use rate_limit::{RateLimitConfig, spawn_limiter_cleanup};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use store::Stores;
use tokio::net::TcpListener;

pub struct ServerConfig {
    /// User and employee storage
    pub stores: Stores,
    /// Secret for signing access tokens
    pub access_token_secret: Vec<u8>,
    /// Secret for signing refresh tokens, distinct from the access secret
    pub refresh_token_secret: Vec<u8>,
    /// Access token lifetime in seconds
    pub access_token_ttl: u64,
    /// Refresh token and cookie lifetime in seconds
    pub refresh_token_ttl: u64,
    /// Whether to send the refresh cookie as `SameSite=None; Secure`
    pub secure_cookies: bool,
    pub bcrypt_cost: u32,
    /// Upper bound on a single store call
    pub store_timeout: Duration,
    /// Login/registration requests allowed per client IP per minute
    pub login_rate_per_minute: u32,
    /// Where the client IP is read from
    pub ip_source: IpSource,
}

impl ServerConfig {
    pub fn jwt_config(&self) -> JwtConfig {
        JwtConfig::new(&self.access_token_secret, &self.refresh_token_secret)
            .with_ttls(self.access_token_ttl, self.refresh_token_ttl)
    }

    pub fn auth_service(&self, jwt: Arc<JwtConfig>) -> AuthService {
        AuthService::new(
            self.stores.users.clone(),
            jwt,
            self.bcrypt_cost,
            self.store_timeout,
        )
    }

    pub fn rate_limits(&self) -> RateLimitConfig {
        RateLimitConfig::new(self.login_rate_per_minute, self.ip_source)
    }
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Router {
    create_app_with_limits(config, Arc::new(config.rate_limits()))
}

fn create_app_with_limits(config: &ServerConfig, limits: Arc<RateLimitConfig>) -> Router {
    let jwt = Arc::new(config.jwt_config());
    let service = config.auth_service(jwt.clone());

    create_api_router(
        service,
        config.stores.employees.clone(),
        jwt,
        limits,
        config.secure_cookies,
    )
    .layer(middleware::from_fn_with_state(
        config.ip_source,
        request_log::log_requests,
    ))
}

/// Run the server on the given listener. This function blocks until the server exits.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let limits = Arc::new(config.rate_limits());
    spawn_limiter_cleanup(limits.clone());

    let app = create_app_with_limits(&config, limits);
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}
