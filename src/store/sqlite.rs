use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use super::{Employee, EmployeeStore, Role, StoreError, User, UserStore};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    username: String,
    password: String,
    roles: String,
    refresh_token: Option<String>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let roles: Vec<Role> = serde_json::from_str(&row.roles).map_err(|e| {
            StoreError::Corrupt(format!("roles of user {}: {}", row.username, e))
        })?;
        Ok(Self {
            username: row.username,
            password: row.password,
            roles,
            refresh_token: row.refresh_token,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EmployeeRow {
    id: String,
    firstname: String,
    lastname: String,
}

impl From<EmployeeRow> for Employee {
    fn from(row: EmployeeRow) -> Self {
        Self {
            id: row.id,
            firstname: row.firstname,
            lastname: row.lastname,
        }
    }
}

impl Database {
    /// Open or create a database at the given path.
    /// Use ":memory:" for an in-memory database.
    pub async fn open(path: &str) -> Result<Self, sqlx::Error> {
        let pool = if path == ":memory:" {
            // Every connection to sqlite::memory: is its own database, so pin one forever.
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect("sqlite::memory:")
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect(&format!("sqlite:{}?mode=rwc", path))
                .await?
        };

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Get the current schema version.
    async fn get_version(&self) -> Result<i32, sqlx::Error> {
        let result: Option<(i32,)> = sqlx::query_as("SELECT version FROM schema_version LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(result.map(|r| r.0).unwrap_or(0))
    }

    /// Set the schema version within a transaction.
    async fn set_version(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        version: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM schema_version")
            .execute(&mut **tx)
            .await?;
        sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
            .bind(version)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Run database migrations.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
            .execute(&self.pool)
            .await?;

        let version = self.get_version().await?;

        if version < 1 {
            self.migrate_v1().await?;
        }

        Ok(())
    }

    /// Execute a list of queries in a transaction, then set the version.
    async fn run_migration(
        &self,
        version: i32,
        queries: &[&'static str],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for query in queries {
            sqlx::query(*query).execute(&mut *tx).await?;
        }
        Self::set_version(&mut tx, version).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn migrate_v1(&self) -> Result<(), sqlx::Error> {
        self.run_migration(
            1,
            &[
                "CREATE TABLE users (
                    username TEXT PRIMARY KEY NOT NULL,
                    password TEXT NOT NULL,
                    roles TEXT NOT NULL DEFAULT '[]',
                    refresh_token TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                )",
                "CREATE INDEX idx_users_refresh_token ON users(refresh_token)",
                "CREATE TABLE employees (
                    id TEXT PRIMARY KEY NOT NULL,
                    firstname TEXT NOT NULL,
                    lastname TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                )",
            ],
        )
        .await
    }

    /// Get the underlying connection pool (for tests that need raw SQL access).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl UserStore for Database {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT username, password, roles, refresh_token FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn find_by_refresh_token(&self, token: &str) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT username, password, roles, refresh_token FROM users WHERE refresh_token = ?",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn upsert(&self, user: &User) -> Result<(), StoreError> {
        let roles = serde_json::to_string(&user.roles)?;
        sqlx::query(
            "INSERT INTO users (username, password, roles, refresh_token) VALUES (?, ?, ?, ?)
             ON CONFLICT(username) DO UPDATE SET
                password = excluded.password,
                roles = excluded.roles,
                refresh_token = excluded.refresh_token",
        )
        .bind(&user.username)
        .bind(&user.password)
        .bind(roles)
        .bind(user.refresh_token.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl EmployeeStore for Database {
    async fn list(&self) -> Result<Vec<Employee>, StoreError> {
        let rows: Vec<EmployeeRow> = sqlx::query_as(
            "SELECT id, firstname, lastname FROM employees ORDER BY created_at, rowid",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Employee::from).collect())
    }

    async fn get(&self, id: &str) -> Result<Option<Employee>, StoreError> {
        let row: Option<EmployeeRow> =
            sqlx::query_as("SELECT id, firstname, lastname FROM employees WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Employee::from))
    }

    async fn insert(&self, employee: &Employee) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO employees (id, firstname, lastname) VALUES (?, ?, ?)")
            .bind(&employee.id)
            .bind(&employee.firstname)
            .bind(&employee.lastname)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update(&self, employee: &Employee) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE employees SET firstname = ?, lastname = ? WHERE id = ?")
            .bind(&employee.firstname)
            .bind(&employee.lastname)
            .bind(&employee.id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM employees WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
