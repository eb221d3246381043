//! Configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Resolved PostgreSQL connection URL, when one is configured.
    ///
    /// `DATABASE_URL` is preferred; otherwise the URL is composed from the
    /// discrete `PGHOST`/`PGPORT`/`PGUSER`/`PGPASSWORD`/`PGDATABASE`
    /// variables. `None` means no database is configured: commands that
    /// need one fail, the rename planner degrades to an empty plan.
    pub database_url: Option<String>,

    /// Maximum database connections in pool (default: 10).
    pub database_max_connections: u32,

    /// Path to the modules directory (default: ./modules).
    pub modules_dir: PathBuf,

    /// Whether migration failures include a position-annotated SQL snippet
    /// (`MIGRATION_DEBUG`, default on).
    pub migration_debug: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let database_url = resolve_database_url();

        let database_max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .context("DATABASE_MAX_CONNECTIONS must be a valid u32")?;

        let modules_dir = env::var("MODULES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./modules"));

        let migration_debug = env::var("MIGRATION_DEBUG")
            .map(|v| !matches!(v.to_lowercase().as_str(), "0" | "false" | "off"))
            .unwrap_or(true);

        Ok(Self {
            database_url,
            database_max_connections,
            modules_dir,
            migration_debug,
        })
    }
}

/// Resolve the database URL: `DATABASE_URL` first, then the discrete `PG*`
/// variables as the fallback path. Returns `None` when neither is present.
fn resolve_database_url() -> Option<String> {
    if let Ok(url) = env::var("DATABASE_URL") {
        if !url.is_empty() {
            return Some(apply_ssl_mode(url));
        }
    }

    let host = env::var("PGHOST").ok().filter(|v| !v.is_empty())?;
    let database = env::var("PGDATABASE").ok().filter(|v| !v.is_empty())?;
    let port = env::var("PGPORT").unwrap_or_else(|_| "5432".to_string());
    let user = env::var("PGUSER").unwrap_or_else(|_| "postgres".to_string());

    let url = match env::var("PGPASSWORD").ok().filter(|v| !v.is_empty()) {
        Some(password) => format!("postgres://{user}:{password}@{host}:{port}/{database}"),
        None => format!("postgres://{user}@{host}:{port}/{database}"),
    };

    Some(apply_ssl_mode(url))
}

/// Honor `PGSSL` by appending `sslmode=require` to URLs that don't already
/// carry an explicit `sslmode` query parameter.
fn apply_ssl_mode(url: String) -> String {
    let ssl_requested = env::var("PGSSL")
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "on" | "require"))
        .unwrap_or(false);

    if !ssl_requested || url.contains("sslmode=") {
        return url;
    }

    if url.contains('?') {
        format!("{url}&sslmode=require")
    } else {
        format!("{url}?sslmode=require")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssl_mode_appended_once() {
        // apply_ssl_mode reads PGSSL itself; exercise only the URL shaping
        // here by checking the existing-param short circuit.
        let url = "postgres://u@h:5432/d?sslmode=disable".to_string();
        assert_eq!(apply_ssl_mode(url.clone()), url);
    }
}
