//! CLI argument parsing, validation, and startup helpers.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use crate::ServerConfig;
use crate::auth::{AuthService, IpSource};
use crate::jwt::MAX_TOKEN_TTL_SECS;
use crate::store::{Database, MemoryStore, Role, Stores};

const MIN_JWT_SECRET_LENGTH: usize = 32;

pub const ACCESS_SECRET_ENV: &str = "ACCESS_TOKEN_SECRET";
pub const REFRESH_SECRET_ENV: &str = "REFRESH_TOKEN_SECRET";

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StoreKind {
    /// In-memory collections mirrored to JSON files under --data-dir
    #[default]
    Json,
    /// SQLite database at --database
    Sqlite,
}

/// A `username=Role` pair from `--grant-role`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoleGrant {
    pub username: String,
    pub role: Role,
}

pub fn parse_role_grant(s: &str) -> Result<RoleGrant, String> {
    let (username, role) = s
        .split_once('=')
        .ok_or_else(|| format!("Expected <username>=<role>, got: {}", s))?;

    let username = username.trim();
    if username.is_empty() {
        return Err(format!("Missing username in: {}", s));
    }

    Ok(RoleGrant {
        username: username.to_string(),
        role: role.trim().parse()?,
    })
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "gatehouse",
    about = "JWT session service with a role-gated employee API"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "3500")]
    pub port: u16,

    /// Storage backend
    #[arg(long, env = "GATEHOUSE_STORE", value_enum, default_value = "json")]
    pub store: StoreKind,

    /// Directory holding users.json and employees.json (json store)
    #[arg(long, env = "GATEHOUSE_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Path to SQLite database file (sqlite store)
    #[arg(short, long, env = "GATEHOUSE_DATABASE", default_value = "gatehouse.db")]
    pub database: String,

    /// Access token lifetime in seconds
    #[arg(long, default_value = "100", value_parser = clap::value_parser!(u64).range(1..=MAX_TOKEN_TTL_SECS))]
    pub access_token_ttl: u64,

    /// Refresh token (and cookie) lifetime in seconds
    #[arg(long, default_value = "86400", value_parser = clap::value_parser!(u64).range(1..=MAX_TOKEN_TTL_SECS))]
    pub refresh_token_ttl: u64,

    /// bcrypt work factor
    #[arg(long, default_value = "10", value_parser = clap::value_parser!(u32).range(4..=31))]
    pub bcrypt_cost: u32,

    /// Upper bound on a single storage call, in milliseconds
    #[arg(long, default_value = "5000")]
    pub store_timeout_ms: u64,

    /// Login and registration attempts allowed per client IP per minute
    #[arg(long, default_value = "30")]
    pub login_rate_per_minute: u32,

    /// Where to read the client IP for rate limiting and request logs.
    /// Only use x-forwarded-for behind a reverse proxy that overwrites the header
    #[arg(long, env = "GATEHOUSE_IP_SOURCE", value_enum, default_value = "socket")]
    pub ip_source: IpSource,

    /// Send the refresh cookie with `SameSite=None; Secure` (requires HTTPS)
    #[arg(long)]
    pub secure_cookies: bool,

    /// Grant a role to an existing user at startup, as <username>=<Admin|Editor|User>. Repeatable
    #[arg(long, value_parser = parse_role_grant)]
    pub grant_role: Vec<RoleGrant>,

    /// Path to file containing the access token secret. Prefer ACCESS_TOKEN_SECRET instead
    #[arg(long)]
    pub access_token_secret_file: Option<String>,

    /// Path to file containing the refresh token secret. Prefer REFRESH_TOKEN_SECRET instead
    #[arg(long)]
    pub refresh_token_secret_file: Option<String>,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load a signing secret from an environment variable or a file.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_secret(env_var: &str, secret_file: Option<&str>) -> Option<String> {
    let secret = if let Ok(secret) = std::env::var(env_var) {
        // Clear the environment variable to prevent leaking
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var(env_var) };
        secret
    } else if let Some(path) = secret_file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read secret file");
                return None;
            }
        }
    } else {
        error!(
            env_var,
            "Token secret is required. Set the environment variable (recommended) or pass a secret file"
        );
        return None;
    };

    if secret.len() < MIN_JWT_SECRET_LENGTH {
        error!(
            env_var,
            "Token secret is shorter than {} characters. Use a longer secret", MIN_JWT_SECRET_LENGTH
        );
        return None;
    }

    Some(secret)
}

/// Load both signing secrets, rejecting a shared one.
pub fn load_secrets(args: &Args) -> Option<(String, String)> {
    let access = load_secret(ACCESS_SECRET_ENV, args.access_token_secret_file.as_deref())?;
    let refresh = load_secret(REFRESH_SECRET_ENV, args.refresh_token_secret_file.as_deref())?;
    validate_secrets(&access, &refresh).then_some((access, refresh))
}

/// Access and refresh tokens must not share a secret.
pub fn validate_secrets(access: &str, refresh: &str) -> bool {
    if access == refresh {
        error!("Access and refresh token secrets must differ");
        return false;
    }
    true
}

/// Open the configured storage backend, logging errors if it fails.
pub async fn open_stores(args: &Args) -> Option<Stores> {
    match args.store {
        StoreKind::Json => match MemoryStore::open(&args.data_dir).await {
            Ok(store) => {
                info!(dir = %args.data_dir.display(), "JSON store opened");
                Some(Stores::from_backend(store))
            }
            Err(e) => {
                error!(dir = %args.data_dir.display(), error = %e, "Failed to open JSON store");
                None
            }
        },
        StoreKind::Sqlite => match Database::open(&args.database).await {
            Ok(db) => {
                info!(path = %args.database, "Database opened");
                Some(Stores::from_backend(db))
            }
            Err(e) => {
                error!(path = %args.database, error = %e, "Failed to open database");
                None
            }
        },
    }
}

/// Apply `--grant-role` flags. Returns false if any grant failed.
pub async fn apply_role_grants(service: &AuthService, grants: &[RoleGrant]) -> bool {
    for grant in grants {
        match service.grant_role(&grant.username, grant.role).await {
            Ok(true) => {}
            Ok(false) => {
                info!(username = %grant.username, role = %grant.role, "User already has role");
            }
            Err(e) => {
                error!(username = %grant.username, role = %grant.role, error = %e, "Failed to grant role");
                return false;
            }
        }
    }
    true
}

/// Build ServerConfig from validated arguments.
pub fn build_config(
    args: &Args,
    stores: Stores,
    access_token_secret: String,
    refresh_token_secret: String,
) -> ServerConfig {
    ServerConfig {
        stores,
        access_token_secret: access_token_secret.into_bytes(),
        refresh_token_secret: refresh_token_secret.into_bytes(),
        access_token_ttl: args.access_token_ttl,
        refresh_token_ttl: args.refresh_token_ttl,
        secure_cookies: args.secure_cookies,
        bcrypt_cost: args.bcrypt_cost,
        store_timeout: Duration::from_millis(args.store_timeout_ms),
        login_rate_per_minute: args.login_rate_per_minute,
        ip_source: args.ip_source,
    }
}
