//! Session lifecycle: registration, login, logout and access token refresh.
//!
//! Read-modify-write sequences on a user record run under a per-username async
//! lock, and every store call is bounded by `store_timeout`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{OnceCell, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use super::password::{MAX_PASSWORD_BYTES, hash_password, verify_password};
use crate::jwt::{AccessTokenResult, JwtConfig};
use crate::store::{Role, StoreError, User, UserStore};

/// Default bound on a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Verified against when the username is unknown, so both failures cost one bcrypt check.
const DECOY_PASSWORD: &str = "gatehouse-decoy-password";

/// Failure of a session flow, mapped to a status code by the API layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFlowError {
    /// Bad credentials or missing refresh cookie
    Unauthorized,
    /// Refresh token unknown, invalid or not matching its user
    Forbidden,
    /// Username already taken
    Conflict,
    /// Password longer than bcrypt can hash
    PasswordTooLong,
    /// No user with that name
    UnknownUser,
    /// Store, hashing or signing failure (already logged)
    Internal,
}

impl std::fmt::Display for AuthFlowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthFlowError::Unauthorized => write!(f, "Unauthorized"),
            AuthFlowError::Forbidden => write!(f, "Forbidden"),
            AuthFlowError::Conflict => write!(f, "Username already exists"),
            AuthFlowError::PasswordTooLong => {
                write!(f, "Password must be at most {} bytes", MAX_PASSWORD_BYTES)
            }
            AuthFlowError::UnknownUser => write!(f, "Unknown user"),
            AuthFlowError::Internal => write!(f, "Internal error"),
        }
    }
}

impl std::error::Error for AuthFlowError {}

fn internal(context: &str, e: impl std::fmt::Display) -> AuthFlowError {
    error!("{}: {}", context, e);
    AuthFlowError::Internal
}

/// Tokens handed out by a successful login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub access_token: String,
    pub refresh_token: String,
    /// Refresh token lifetime in seconds, used as the cookie Max-Age
    pub refresh_ttl: u64,
}

/// What a logout request actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutOutcome {
    /// No refresh cookie on the request
    NoSession,
    /// Cookie present but no user holds that token
    StaleCookie,
    /// Stored token cleared
    LoggedOut,
}

/// One async mutex per username, dropped once nobody holds or waits on it.
#[derive(Default)]
struct UserLocks {
    inner: Mutex<HashMap<String, Weak<tokio::sync::Mutex<()>>>>,
}

impl UserLocks {
    async fn acquire(&self, username: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.retain(|_, weak| weak.strong_count() > 0);

            match map.get(username).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(tokio::sync::Mutex::new(()));
                    map.insert(username.to_string(), Arc::downgrade(&lock));
                    lock
                }
            }
        };
        lock.lock_owned().await
    }
}

#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserStore>,
    jwt: Arc<JwtConfig>,
    bcrypt_cost: u32,
    store_timeout: Duration,
    locks: Arc<UserLocks>,
    decoy_hash: Arc<OnceCell<String>>,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserStore>,
        jwt: Arc<JwtConfig>,
        bcrypt_cost: u32,
        store_timeout: Duration,
    ) -> Self {
        Self {
            users,
            jwt,
            bcrypt_cost,
            store_timeout,
            locks: Arc::new(UserLocks::default()),
            decoy_hash: Arc::new(OnceCell::new()),
        }
    }

    pub fn jwt(&self) -> &JwtConfig {
        &self.jwt
    }

    async fn bounded<T, F>(&self, context: &str, call: F) -> Result<T, AuthFlowError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => result.map_err(|e| internal(context, e)),
            Err(_) => {
                error!(
                    timeout_ms = self.store_timeout.as_millis() as u64,
                    "{}: store call timed out", context
                );
                Err(AuthFlowError::Internal)
            }
        }
    }

    /// Create a user with no roles and no session.
    pub async fn register(&self, username: &str, password: &str) -> Result<(), AuthFlowError> {
        if password.len() > MAX_PASSWORD_BYTES {
            return Err(AuthFlowError::PasswordTooLong);
        }

        let _guard = self.locks.acquire(username).await;

        let existing = self
            .bounded("Failed to look up user", self.users.find_by_username(username))
            .await?;
        if existing.is_some() {
            debug!(username, "Registration rejected, username taken");
            return Err(AuthFlowError::Conflict);
        }

        let hash = hash_password(password, self.bcrypt_cost)
            .await
            .map_err(|e| internal("Failed to hash password", e))?;

        let user = User::new(username, hash);
        self.bounded("Failed to create user", self.users.upsert(&user))
            .await?;

        info!(username, "User registered");
        Ok(())
    }

    /// Check a username/password pair. Both failure modes look the same to the caller.
    pub async fn verify_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<User, AuthFlowError> {
        // bcrypt would compare only the first 72 bytes.
        if password.len() > MAX_PASSWORD_BYTES {
            warn!(username, "Login failed: password too long");
            return Err(AuthFlowError::Unauthorized);
        }

        let Some(user) = self
            .bounded("Failed to look up user", self.users.find_by_username(username))
            .await?
        else {
            self.verify_decoy(password).await?;
            warn!(username, "Login failed: unknown user");
            return Err(AuthFlowError::Unauthorized);
        };

        let matches = verify_password(password, &user.password)
            .await
            .map_err(|e| internal("Failed to verify password", e))?;
        if !matches {
            warn!(username, "Login failed: wrong password");
            return Err(AuthFlowError::Unauthorized);
        }

        Ok(user)
    }

    /// Burn one bcrypt verification at the configured cost.
    async fn verify_decoy(&self, password: &str) -> Result<(), AuthFlowError> {
        let hash = self
            .decoy_hash
            .get_or_try_init(|| hash_password(DECOY_PASSWORD, self.bcrypt_cost))
            .await
            .map_err(|e| internal("Failed to hash decoy password", e))?;

        verify_password(password, hash)
            .await
            .map_err(|e| internal("Failed to verify password", e))?;
        Ok(())
    }

    /// Verify credentials, then issue both tokens and store the refresh token.
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginOutcome, AuthFlowError> {
        let _guard = self.locks.acquire(username).await;

        let mut user = self.verify_credentials(username, password).await?;

        let access = self
            .jwt
            .generate_access_token(&user.username, &user.roles)
            .map_err(|e| internal("Failed to generate access token", e))?;
        let refresh = self
            .jwt
            .generate_refresh_token(&user.username)
            .map_err(|e| internal("Failed to generate refresh token", e))?;

        user.refresh_token = Some(refresh.token.clone());
        self.bounded("Failed to store refresh token", self.users.upsert(&user))
            .await?;

        info!(username, roles = ?user.roles, "User logged in");
        Ok(LoginOutcome {
            access_token: access.token,
            refresh_token: refresh.token,
            refresh_ttl: refresh.duration,
        })
    }

    /// Clear the stored refresh token matching the cookie, if any.
    pub async fn logout(&self, cookie: Option<&str>) -> Result<LogoutOutcome, AuthFlowError> {
        let Some(token) = cookie else {
            return Ok(LogoutOutcome::NoSession);
        };

        let Some(holder) = self
            .bounded("Failed to look up session", self.users.find_by_refresh_token(token))
            .await?
        else {
            debug!("Logout with a refresh token no user holds");
            return Ok(LogoutOutcome::StaleCookie);
        };

        let _guard = self.locks.acquire(&holder.username).await;

        // A concurrent login may have replaced the token since the lookup.
        let current = self
            .bounded(
                "Failed to look up user",
                self.users.find_by_username(&holder.username),
            )
            .await?;
        let Some(mut user) = current.filter(|u| u.holds_refresh_token(token)) else {
            return Ok(LogoutOutcome::StaleCookie);
        };

        user.refresh_token = None;
        self.bounded("Failed to clear refresh token", self.users.upsert(&user))
            .await?;

        info!(username = %user.username, "User logged out");
        Ok(LogoutOutcome::LoggedOut)
    }

    /// Issue a new access token for the holder of the refresh cookie.
    pub async fn refresh(&self, cookie: Option<&str>) -> Result<AccessTokenResult, AuthFlowError> {
        let token = cookie.ok_or(AuthFlowError::Unauthorized)?;

        let Some(user) = self
            .bounded("Failed to look up session", self.users.find_by_refresh_token(token))
            .await?
        else {
            debug!("Refresh with a token no user holds");
            return Err(AuthFlowError::Forbidden);
        };

        let claims = self.jwt.validate_refresh_token(token).map_err(|e| {
            debug!(username = %user.username, error = %e, "Refresh token rejected");
            AuthFlowError::Forbidden
        })?;
        if claims.username != user.username {
            warn!(
                username = %user.username,
                claimed = %claims.username,
                "Refresh token names a different user"
            );
            return Err(AuthFlowError::Forbidden);
        }

        self.jwt
            .generate_access_token(&user.username, &user.roles)
            .map_err(|e| internal("Failed to generate access token", e))
    }

    /// Add a role to an existing user. Returns false if the user already had it.
    pub async fn grant_role(&self, username: &str, role: Role) -> Result<bool, AuthFlowError> {
        let _guard = self.locks.acquire(username).await;

        let Some(mut user) = self
            .bounded("Failed to look up user", self.users.find_by_username(username))
            .await?
        else {
            return Err(AuthFlowError::UnknownUser);
        };

        if !user.grant(role) {
            return Ok(false);
        }

        self.bounded("Failed to store role", self.users.upsert(&user))
            .await?;
        info!(username, %role, "Role granted");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    const TEST_COST: u32 = 4;

    fn jwt() -> Arc<JwtConfig> {
        Arc::new(JwtConfig::new(
            b"access-secret-for-testing-only-000",
            b"refresh-secret-for-testing-only-00",
        ))
    }

    fn service_with(users: Arc<dyn UserStore>) -> AuthService {
        AuthService::new(users, jwt(), TEST_COST, DEFAULT_STORE_TIMEOUT)
    }

    fn service() -> (AuthService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (service_with(store.clone()), store)
    }

    #[tokio::test]
    async fn test_register_creates_user_without_roles() {
        let (service, store) = service();

        service.register("alice", "secret123").await.unwrap();

        let user = store.find_by_username("alice").await.unwrap().unwrap();
        assert!(user.roles.is_empty());
        assert!(user.refresh_token.is_none());
        assert_ne!(user.password, "secret123");
    }

    #[tokio::test]
    async fn test_register_duplicate_leaves_original() {
        let (service, store) = service();
        service.register("alice", "secret123").await.unwrap();
        let original = store.find_by_username("alice").await.unwrap().unwrap();

        let result = service.register("alice", "other-password").await;
        assert_eq!(result, Err(AuthFlowError::Conflict));

        let after = store.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(after, original);
    }

    #[tokio::test]
    async fn test_verify_credentials_hides_which_part_failed() {
        let (service, _) = service();
        service.register("alice", "secret123").await.unwrap();

        assert_eq!(
            service.verify_credentials("alice", "wrong").await.err(),
            Some(AuthFlowError::Unauthorized)
        );
        assert_eq!(
            service.verify_credentials("mallory", "secret123").await.err(),
            Some(AuthFlowError::Unauthorized)
        );
        assert!(service.verify_credentials("alice", "secret123").await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_user_still_runs_bcrypt() {
        let (service, _) = service();
        assert!(!service.decoy_hash.initialized());

        assert_eq!(
            service.verify_credentials("mallory", "secret123").await.err(),
            Some(AuthFlowError::Unauthorized)
        );

        let decoy = service.decoy_hash.get().unwrap();
        assert!(decoy.starts_with(&format!("$2b${:02}$", TEST_COST)));
        // The decoy password itself never logs anyone in.
        assert_eq!(
            service.verify_credentials("mallory", DECOY_PASSWORD).await.err(),
            Some(AuthFlowError::Unauthorized)
        );
    }

    #[tokio::test]
    async fn test_register_rejects_overlong_password() {
        let (service, store) = service();

        let result = service
            .register("alice", &"x".repeat(MAX_PASSWORD_BYTES + 1))
            .await;
        assert_eq!(result, Err(AuthFlowError::PasswordTooLong));
        assert!(store.find_by_username("alice").await.unwrap().is_none());

        let longest = "x".repeat(MAX_PASSWORD_BYTES);
        service.register("alice", &longest).await.unwrap();
        assert!(service.verify_credentials("alice", &longest).await.is_ok());

        // Same first 72 bytes, one more after them.
        assert_eq!(
            service
                .verify_credentials("alice", &format!("{}y", longest))
                .await
                .err(),
            Some(AuthFlowError::Unauthorized)
        );
    }

    #[tokio::test]
    async fn test_login_stores_refresh_token() {
        let (service, store) = service();
        service.register("alice", "secret123").await.unwrap();

        let outcome = service.login("alice", "secret123").await.unwrap();
        assert_eq!(outcome.refresh_ttl, crate::jwt::DEFAULT_REFRESH_TOKEN_TTL_SECS);

        let user = store.find_by_username("alice").await.unwrap().unwrap();
        assert!(user.holds_refresh_token(&outcome.refresh_token));

        let claims = service.jwt().validate_access_token(&outcome.access_token).unwrap();
        assert_eq!(claims.username, "alice");
    }

    #[tokio::test]
    async fn test_second_login_replaces_refresh_token() {
        let (service, _) = service();
        service.register("alice", "secret123").await.unwrap();

        let first = service.login("alice", "secret123").await.unwrap();
        let second = service.login("alice", "secret123").await.unwrap();

        assert_eq!(
            service.refresh(Some(first.refresh_token.as_str())).await.err(),
            Some(AuthFlowError::Forbidden)
        );
        assert!(service.refresh(Some(second.refresh_token.as_str())).await.is_ok());
    }

    #[tokio::test]
    async fn test_refresh_carries_stored_roles() {
        let (service, _) = service();
        service.register("alice", "secret123").await.unwrap();
        let login = service.login("alice", "secret123").await.unwrap();

        service.grant_role("alice", Role::Editor).await.unwrap();

        let access = service.refresh(Some(login.refresh_token.as_str())).await.unwrap();
        let claims = service.jwt().validate_access_token(&access.token).unwrap();
        assert_eq!(claims.roles, vec![Role::Editor]);
    }

    #[tokio::test]
    async fn test_refresh_without_cookie() {
        let (service, _) = service();
        assert_eq!(
            service.refresh(None).await.err(),
            Some(AuthFlowError::Unauthorized)
        );
    }

    #[tokio::test]
    async fn test_refresh_rejects_token_naming_another_user() {
        let (service, store) = service();
        service.register("alice", "secret123").await.unwrap();

        // A validly signed token for "bob" planted on alice's record.
        let forged = service.jwt().generate_refresh_token("bob").unwrap().token;
        let mut alice = store.find_by_username("alice").await.unwrap().unwrap();
        alice.refresh_token = Some(forged.clone());
        store.upsert(&alice).await.unwrap();

        assert_eq!(
            service.refresh(Some(forged.as_str())).await.err(),
            Some(AuthFlowError::Forbidden)
        );
    }

    #[tokio::test]
    async fn test_refresh_rejects_token_signed_with_other_secret() {
        let (service, store) = service();
        service.register("alice", "secret123").await.unwrap();

        let other = JwtConfig::new(
            b"access-secret-for-testing-only-000",
            b"a-completely-different-refresh-key",
        );
        let foreign = other.generate_refresh_token("alice").unwrap().token;
        let mut alice = store.find_by_username("alice").await.unwrap().unwrap();
        alice.refresh_token = Some(foreign.clone());
        store.upsert(&alice).await.unwrap();

        assert_eq!(
            service.refresh(Some(foreign.as_str())).await.err(),
            Some(AuthFlowError::Forbidden)
        );
    }

    #[tokio::test]
    async fn test_logout_outcomes() {
        let (service, store) = service();
        service.register("alice", "secret123").await.unwrap();
        let login = service.login("alice", "secret123").await.unwrap();

        assert_eq!(service.logout(None).await, Ok(LogoutOutcome::NoSession));
        assert_eq!(
            service.logout(Some("unknown-token")).await,
            Ok(LogoutOutcome::StaleCookie)
        );
        assert_eq!(
            service.logout(Some(login.refresh_token.as_str())).await,
            Ok(LogoutOutcome::LoggedOut)
        );

        let user = store.find_by_username("alice").await.unwrap().unwrap();
        assert!(user.refresh_token.is_none());

        // Second logout with the same cookie is a no-op.
        assert_eq!(
            service.logout(Some(login.refresh_token.as_str())).await,
            Ok(LogoutOutcome::StaleCookie)
        );
        assert_eq!(
            service.refresh(Some(login.refresh_token.as_str())).await.err(),
            Some(AuthFlowError::Forbidden)
        );
    }

    #[tokio::test]
    async fn test_grant_role() {
        let (service, _) = service();
        service.register("alice", "secret123").await.unwrap();

        assert_eq!(service.grant_role("alice", Role::Admin).await, Ok(true));
        assert_eq!(service.grant_role("alice", Role::Admin).await, Ok(false));
        assert_eq!(
            service.grant_role("nobody", Role::Admin).await,
            Err(AuthFlowError::UnknownUser)
        );
    }

    #[tokio::test]
    async fn test_concurrent_registrations_admit_one() {
        let (service, _) = service();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move { service.register("alice", "secret123").await })
            })
            .collect();

        let mut created = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => created += 1,
                Err(AuthFlowError::Conflict) => conflicts += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(created, 1);
        assert_eq!(conflicts, 3);
    }

    struct StalledStore;

    #[async_trait]
    impl UserStore for StalledStore {
        async fn find_by_username(&self, _username: &str) -> Result<Option<User>, StoreError> {
            std::future::pending().await
        }

        async fn find_by_refresh_token(&self, _token: &str) -> Result<Option<User>, StoreError> {
            std::future::pending().await
        }

        async fn upsert(&self, _user: &User) -> Result<(), StoreError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_stalled_store_times_out() {
        let service = AuthService::new(
            Arc::new(StalledStore),
            jwt(),
            TEST_COST,
            Duration::from_millis(20),
        );

        assert_eq!(
            service.login("alice", "secret123").await.err(),
            Some(AuthFlowError::Internal)
        );
        assert_eq!(
            service.refresh(Some("token")).await.err(),
            Some(AuthFlowError::Internal)
        );
    }

    struct FailingStore;

    #[async_trait]
    impl UserStore for FailingStore {
        async fn find_by_username(&self, _username: &str) -> Result<Option<User>, StoreError> {
            Err(StoreError::Corrupt("unreadable".to_string()))
        }

        async fn find_by_refresh_token(&self, _token: &str) -> Result<Option<User>, StoreError> {
            Err(StoreError::Corrupt("unreadable".to_string()))
        }

        async fn upsert(&self, _user: &User) -> Result<(), StoreError> {
            Err(StoreError::Corrupt("unwritable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_internal() {
        let service = service_with(Arc::new(FailingStore));

        assert_eq!(
            service.register("alice", "secret123").await,
            Err(AuthFlowError::Internal)
        );
        assert_eq!(
            service.logout(Some("token")).await,
            Err(AuthFlowError::Internal)
        );
    }
}
