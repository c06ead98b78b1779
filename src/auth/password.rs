//! Password hashing with bcrypt.
//!
//! bcrypt is deliberately slow, so both operations run on the blocking pool.

/// Default bcrypt work factor.
pub const DEFAULT_BCRYPT_COST: u32 = 10;

/// bcrypt ignores every byte past this length.
pub const MAX_PASSWORD_BYTES: usize = 72;

#[derive(Debug)]
pub enum PasswordError {
    /// bcrypt rejected the input or the stored hash
    Bcrypt(bcrypt::BcryptError),
    /// The blocking task panicked or was cancelled
    Join(tokio::task::JoinError),
}

impl std::fmt::Display for PasswordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PasswordError::Bcrypt(e) => write!(f, "bcrypt error: {}", e),
            PasswordError::Join(e) => write!(f, "Password task failed: {}", e),
        }
    }
}

impl std::error::Error for PasswordError {}

/// Hash a password with a fresh salt.
pub async fn hash_password(password: &str, cost: u32) -> Result<String, PasswordError> {
    let password = password.to_owned();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(PasswordError::Join)?
        .map_err(PasswordError::Bcrypt)
}

/// Compare a password against a stored hash.
pub async fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    let password = password.to_owned();
    let hash = hash.to_owned();
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(PasswordError::Join)?
        .map_err(PasswordError::Bcrypt)
}
