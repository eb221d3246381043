//! Database connection pool management.

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::Config;
use crate::error::ModuleError;

/// Create a PostgreSQL connection pool.
///
/// A short acquire timeout is configured so a saturated or unreachable pool
/// fails fast instead of hanging a boot sequence.
pub async fn create_pool(config: &Config) -> Result<PgPool> {
    let url = config.database_url.as_deref().ok_or(ModuleError::NoDatabase)?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(url)
        .await
        .context("failed to connect to PostgreSQL")?;

    Ok(pool)
}

/// Check if the database connection is healthy.
pub async fn check_health(pool: &PgPool) -> bool {
    sqlx::query("SELECT 1").execute(pool).await.is_ok()
}
