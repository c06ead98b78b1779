//! JWT authentication with role-based access control.
//!
//! Dual-token system: short-lived access tokens (bearer header, stateless) and
//! long-lived refresh tokens (HttpOnly cookie, one per user, stored on the
//! user record). Protected routers sit behind `require_access_token`; handlers
//! narrow further with the `Authorized<R>` extractor.

mod cookie;
mod errors;
mod guard;
mod ip;
mod password;
mod roles;
mod service;

pub use cookie::{REFRESH_COOKIE_NAME, clear_refresh_cookie, get_cookie, refresh_cookie};
pub use errors::AuthError;
pub use guard::{AuthenticatedUser, authenticate, bearer_token, require_access_token};
pub use ip::{IpSource, extract_client_ip};
pub use password::{DEFAULT_BCRYPT_COST, PasswordError, hash_password, verify_password};
pub use roles::{AdminOnly, Authorized, CurrentUser, EditorOrAdmin, RoleConstraint, authorize};
pub use service::{AuthFlowError, AuthService, DEFAULT_STORE_TIMEOUT, LoginOutcome, LogoutOutcome};
