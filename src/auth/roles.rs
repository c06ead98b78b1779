//! Role-based authorization.
//!
//! Handlers declare their permitted roles through the type of the extractor:
//! `Authorized<AdminOnly>` or `Authorized<EditorOrAdmin>`. Both extractors read
//! the identity the access guard attached to the request.

use std::marker::PhantomData;

use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::warn;

use super::errors::AuthError;
use super::guard::AuthenticatedUser;
use crate::store::Role;

/// A set of roles permitted on a route.
pub trait RoleConstraint: Send + Sync + 'static {
    const ALLOWED: &'static [Role];
}

pub struct AdminOnly;

impl RoleConstraint for AdminOnly {
    const ALLOWED: &'static [Role] = &[Role::Admin];
}

pub struct EditorOrAdmin;

impl RoleConstraint for EditorOrAdmin {
    const ALLOWED: &'static [Role] = &[Role::Admin, Role::Editor];
}

/// Pass if the caller holds at least one permitted role.
pub fn authorize(granted: &[Role], allowed: &[Role]) -> Result<(), AuthError> {
    if granted.iter().any(|role| allowed.contains(role)) {
        Ok(())
    } else {
        Err(AuthError::InsufficientRole)
    }
}

/// Identity of the caller, for routes open to any authenticated user.
pub struct CurrentUser(pub AuthenticatedUser);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .map(CurrentUser)
            .ok_or(AuthError::NotAuthenticated)
    }
}

/// Identity of a caller holding one of `R::ALLOWED`.
pub struct Authorized<R: RoleConstraint> {
    pub user: AuthenticatedUser,
    _role: PhantomData<R>,
}

impl<S, R> FromRequestParts<S> for Authorized<R>
where
    S: Send + Sync,
    R: RoleConstraint,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;

        if let Err(e) = authorize(&user.roles, R::ALLOWED) {
            warn!(
                username = %user.username,
                roles = ?user.roles,
                required = ?R::ALLOWED,
                "Role check failed"
            );
            return Err(e);
        }

        Ok(Authorized {
            user,
            _role: PhantomData,
        })
    }
}
