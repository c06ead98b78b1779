mod auth;
mod employees;
mod error;

use axum::Router;
use std::sync::Arc;

use crate::auth::AuthService;
use crate::jwt::JwtConfig;
use crate::rate_limit::RateLimitConfig;
use crate::store::EmployeeStore;

pub use error::{ApiError, ResultExt, validate_uuid};

/// Create the API router.
pub fn create_api_router(
    service: AuthService,
    employees: Arc<dyn EmployeeStore>,
    jwt: Arc<JwtConfig>,
    limits: Arc<RateLimitConfig>,
    secure_cookies: bool,
) -> Router {
    let auth_state = auth::AuthState {
        service,
        secure_cookies,
    };

    let employees_state = employees::EmployeesState { employees };

    Router::new()
        .merge(auth::router(auth_state, limits))
        .merge(employees::router(employees_state, jwt))
}
