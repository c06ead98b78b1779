//! Persistence for users and employees.
//!
//! Handlers and the session service only see the `UserStore` and
//! `EmployeeStore` traits. Two backends implement both:
//! - `MemoryStore`: in-memory collections, optionally mirrored to JSON snapshot files
//! - `Database`: SQLite through sqlx
//!
//! Every write is last-write-wins. Serializing read-modify-write sequences is
//! the caller's job (see `auth::AuthService`).

mod employee;
mod memory;
mod sqlite;
mod user;

use std::sync::Arc;

use async_trait::async_trait;

pub use employee::Employee;
pub use memory::MemoryStore;
pub use sqlite::Database;
pub use user::{Role, User};

/// Lookup and upsert of user records, keyed by username.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Exact-match lookup by username.
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    /// Find the user whose stored refresh token equals `token`.
    async fn find_by_refresh_token(&self, token: &str) -> Result<Option<User>, StoreError>;

    /// Insert the user, or replace the record with the same username.
    async fn upsert(&self, user: &User) -> Result<(), StoreError>;
}

/// CRUD over employee entries, keyed by id.
#[async_trait]
pub trait EmployeeStore: Send + Sync {
    async fn list(&self) -> Result<Vec<Employee>, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Employee>, StoreError>;

    async fn insert(&self, employee: &Employee) -> Result<(), StoreError>;

    /// Replace an existing employee. Returns false if no entry has that id.
    async fn update(&self, employee: &Employee) -> Result<bool, StoreError>;

    /// Returns false if no entry has that id.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;
}

/// Handle to the active backend.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub employees: Arc<dyn EmployeeStore>,
}

impl Stores {
    /// Share one backend for both capabilities.
    pub fn from_backend<B>(backend: B) -> Self
    where
        B: UserStore + EmployeeStore + 'static,
    {
        let backend = Arc::new(backend);
        Self {
            users: backend.clone(),
            employees: backend,
        }
    }
}

/// Errors raised by a storage backend.
#[derive(Debug)]
pub enum StoreError {
    /// Reading or writing a snapshot file failed
    Io(std::io::Error),
    /// A snapshot could not be encoded or decoded
    Serialization(serde_json::Error),
    /// Database query failed
    Database(sqlx::Error),
    /// Stored data does not match the expected shape
    Corrupt(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "Storage I/O error: {}", e),
            StoreError::Serialization(e) => write!(f, "Failed to (de)serialize snapshot: {}", e),
            StoreError::Database(e) => write!(f, "Database error: {}", e),
            StoreError::Corrupt(msg) => write!(f, "Corrupt stored data: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e)
    }
}
