//! In-memory store with optional JSON snapshot mirroring.
//!
//! When opened on a directory, `users.json` and `employees.json` are read once
//! and then fully rewritten after every mutation. The rewrite goes through a
//! temporary file and a rename, so a reader never sees a half-written array.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::info;

use super::{Employee, EmployeeStore, StoreError, User, UserStore};

pub const USERS_FILE: &str = "users.json";
pub const EMPLOYEES_FILE: &str = "employees.json";

pub struct MemoryStore {
    users: Arc<Mutex<Vec<User>>>,
    employees: Arc<Mutex<Vec<Employee>>>,
    users_file: Option<PathBuf>,
    employees_file: Option<PathBuf>,
}

impl MemoryStore {
    /// A store that lives only in memory.
    pub fn new() -> Self {
        Self {
            users: Arc::new(Mutex::new(Vec::new())),
            employees: Arc::new(Mutex::new(Vec::new())),
            users_file: None,
            employees_file: None,
        }
    }

    /// Load snapshots from `dir` (created if missing) and mirror every write back to it.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;

        let users_file = dir.join(USERS_FILE);
        let employees_file = dir.join(EMPLOYEES_FILE);

        let users: Vec<User> = load_snapshot(&users_file).await?;
        let employees: Vec<Employee> = load_snapshot(&employees_file).await?;

        info!(
            path = %dir.display(),
            users = users.len(),
            employees = employees.len(),
            "Loaded JSON snapshots"
        );

        Ok(Self {
            users: Arc::new(Mutex::new(users)),
            employees: Arc::new(Mutex::new(employees)),
            users_file: Some(users_file),
            employees_file: Some(employees_file),
        })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

async fn load_snapshot<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) if bytes.iter().all(|b| b.is_ascii_whitespace()) => Ok(Vec::new()),
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

/// Apply `change` to a copy of the collection, persist the copy, then swap it in.
/// `change` returns false when it left the collection untouched.
///
/// The write and the swap run on their own task while it holds the lock, so a
/// caller that stops waiting cannot leave the file ahead of memory.
async fn commit<T, F>(
    items: &Arc<Mutex<Vec<T>>>,
    path: Option<&Path>,
    change: F,
) -> Result<bool, StoreError>
where
    T: Clone + Serialize + Send + Sync + 'static,
    F: FnOnce(&mut Vec<T>) -> Result<bool, StoreError> + Send + 'static,
{
    let current = items.clone().lock_owned().await;
    let path = path.map(Path::to_path_buf);

    tokio::spawn(apply_and_persist(current, path, change))
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
}

async fn apply_and_persist<T, F>(
    mut current: OwnedMutexGuard<Vec<T>>,
    path: Option<PathBuf>,
    change: F,
) -> Result<bool, StoreError>
where
    T: Clone + Serialize,
    F: FnOnce(&mut Vec<T>) -> Result<bool, StoreError>,
{
    let mut next = Vec::clone(&current);
    if !change(&mut next)? {
        return Ok(false);
    }

    write_snapshot(path.as_deref(), &next).await?;
    *current = next;
    Ok(true)
}

async fn write_snapshot<T: Serialize>(path: Option<&Path>, items: &[T]) -> Result<(), StoreError> {
    let Some(path) = path else {
        return Ok(());
    };

    let json = serde_json::to_vec_pretty(items)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.lock().await;
        Ok(users.iter().find(|u| u.username == username).cloned())
    }

    async fn find_by_refresh_token(&self, token: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.lock().await;
        Ok(users.iter().find(|u| u.holds_refresh_token(token)).cloned())
    }

    async fn upsert(&self, user: &User) -> Result<(), StoreError> {
        let user = user.clone();
        commit(&self.users, self.users_file.as_deref(), move |users| {
            match users.iter().position(|u| u.username == user.username) {
                Some(index) => users[index] = user,
                None => users.push(user),
            }
            Ok(true)
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl EmployeeStore for MemoryStore {
    async fn list(&self) -> Result<Vec<Employee>, StoreError> {
        Ok(self.employees.lock().await.clone())
    }

    async fn get(&self, id: &str) -> Result<Option<Employee>, StoreError> {
        let employees = self.employees.lock().await;
        Ok(employees.iter().find(|e| e.id == id).cloned())
    }

    async fn insert(&self, employee: &Employee) -> Result<(), StoreError> {
        let employee = employee.clone();
        commit(&self.employees, self.employees_file.as_deref(), move |employees| {
            if employees.iter().any(|e| e.id == employee.id) {
                return Err(StoreError::Corrupt(format!(
                    "Duplicate employee id {}",
                    employee.id
                )));
            }
            employees.push(employee);
            Ok(true)
        })
        .await?;
        Ok(())
    }

    async fn update(&self, employee: &Employee) -> Result<bool, StoreError> {
        let employee = employee.clone();
        commit(&self.employees, self.employees_file.as_deref(), move |employees| {
            let Some(index) = employees.iter().position(|e| e.id == employee.id) else {
                return Ok(false);
            };
            employees[index] = employee;
            Ok(true)
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        commit(&self.employees, self.employees_file.as_deref(), move |employees| {
            let before = employees.len();
            employees.retain(|e| e.id != id);
            Ok(employees.len() != before)
        })
        .await
    }
}
