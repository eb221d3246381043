//! Module runtime error types with clear, actionable messages.
//!
//! All errors include the module name and relevant context to help
//! operators quickly identify and fix issues.

use thiserror::Error;

/// Errors that can occur during module discovery, installation, and
/// lifecycle dispatch.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// No module with this id exists under the modules root.
    #[error("module '{module}' not found in {path}")]
    ModuleNotFound { module: String, path: String },

    /// The module has no parseable `module.config.json`, so an operation
    /// that rewrites it (enable/disable) cannot proceed.
    #[error("module '{module}': no parseable module.config.json at {path}")]
    ManifestMissing { module: String, path: String },

    /// A migration SQL file could not be read from disk.
    #[error("[installer] {module} migration failed: {migration}: failed to read file: {details}")]
    MigrationUnreadable {
        module: String,
        migration: String,
        details: String,
    },

    /// Migration SQL execution failed and was rolled back. `details` carries
    /// the driver message, optionally followed by a position-annotated SQL
    /// snippet.
    #[error("[installer] {module} migration failed: {migration}: {details}")]
    MigrationFailed {
        module: String,
        migration: String,
        details: String,
    },

    /// Neither `DATABASE_URL` nor the discrete `PG*` variables resolve to a
    /// database. Terminal for commands that need one.
    #[error("no database configured: set DATABASE_URL or PGHOST/PGDATABASE")]
    NoDatabase,

    #[error("database error")]
    Database(#[from] sqlx::Error),
}

impl ModuleError {
    /// Create a migration failure error.
    pub fn migration_failed(
        module: impl Into<String>,
        migration: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self::MigrationFailed {
            module: module.into(),
            migration: migration.into(),
            details: details.into(),
        }
    }
}
