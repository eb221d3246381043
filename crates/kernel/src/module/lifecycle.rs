//! Module lifecycle dispatch.
//!
//! `on_loaded` runs for every enabled module on every process boot and
//! again after an administrative enable; `on_disabled` runs on
//! administrative disable. Callbacks receive a capability context (pool,
//! route registrar, settings, logger, cron registrar). A failing callback
//! is logged and skipped so it cannot prevent sibling modules from loading.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, error, info};

use bottega_sdk::{CronRegistrar, ModuleContext, RouteRegistrar, SettingsStore};

use super::registry::ModuleRegistry;
use crate::error::ModuleError;

const SETTINGS_DDL: &str = "CREATE TABLE IF NOT EXISTS settings (\
     id SERIAL PRIMARY KEY, \
     module VARCHAR(255) NOT NULL, \
     name VARCHAR(255) NOT NULL, \
     value TEXT, \
     CONSTRAINT uq_settings UNIQUE(module, name))";

/// Ensure the settings table backing [`PgSettings`] exists.
pub async fn ensure_settings_table(pool: &PgPool) -> Result<(), ModuleError> {
    sqlx::query(SETTINGS_DDL).execute(pool).await?;
    Ok(())
}

/// Postgres-backed settings storage handed to modules through the context.
pub struct PgSettings {
    pool: PgPool,
}

impl PgSettings {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsStore for PgSettings {
    async fn get(&self, module: &str, name: &str) -> anyhow::Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM settings WHERE module = $1 AND name = $2")
            .bind(module)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.and_then(|r| r.get::<Option<String>, _>("value")))
    }

    async fn set(&self, module: &str, name: &str, value: &str) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO settings (module, name, value) VALUES ($1, $2, $3) \
             ON CONFLICT (module, name) DO UPDATE SET value = EXCLUDED.value",
        )
        .bind(module)
        .bind(name)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Builds per-module contexts and dispatches lifecycle callbacks.
pub struct LifecycleDispatcher {
    pool: PgPool,
    registry: Arc<ModuleRegistry>,
    routes: RouteRegistrar,
    settings: Arc<dyn SettingsStore>,
    cron: CronRegistrar,
}

impl LifecycleDispatcher {
    pub fn new(pool: PgPool, registry: Arc<ModuleRegistry>) -> Self {
        let settings: Arc<dyn SettingsStore> = Arc::new(PgSettings::new(pool.clone()));
        Self {
            pool,
            registry,
            routes: RouteRegistrar::new(),
            settings,
            cron: CronRegistrar::new(),
        }
    }

    /// Replace the settings backend (used by hosts and tests).
    pub fn with_settings(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = settings;
        self
    }

    /// Routers registered by modules, for the host to merge.
    pub fn routes(&self) -> &RouteRegistrar {
        &self.routes
    }

    /// Cron actions registered by modules, for the host's scheduler.
    pub fn cron(&self) -> &CronRegistrar {
        &self.cron
    }

    /// Build the capability context for one module.
    pub fn context_for(&self, module: &str) -> ModuleContext {
        ModuleContext::new(
            module,
            self.pool.clone(),
            self.routes.clone(),
            Arc::clone(&self.settings),
            self.cron.clone(),
        )
    }

    /// Dispatch `on_loaded`. A module without a compiled-in implementation
    /// is data-only and loads as a no-op.
    pub async fn on_loaded(&self, module: &str) -> anyhow::Result<()> {
        let Some(imp) = self.registry.get(module) else {
            debug!(module = %module, "no compiled-in implementation, nothing to load");
            return Ok(());
        };

        imp.on_loaded(&self.context_for(module)).await
    }

    /// Dispatch `on_disabled`. Disabling is soft: implementations must not
    /// delete module data.
    pub async fn on_disabled(&self, module: &str) -> anyhow::Result<()> {
        let Some(imp) = self.registry.get(module) else {
            debug!(module = %module, "no compiled-in implementation, nothing to disable");
            return Ok(());
        };

        imp.on_disabled(&self.context_for(module)).await
    }

    /// Run `on_loaded` for each module in order, isolating failures.
    /// Returns (module, error message) pairs for every callback that failed.
    pub async fn load_all(&self, modules: &[String]) -> Vec<(String, String)> {
        let mut failures = Vec::new();

        for module in modules {
            match self.on_loaded(module).await {
                Ok(()) => {}
                Err(e) => {
                    error!(module = %module, error = %e, "onModuleLoaded failed");
                    failures.push((module.clone(), e.to_string()));
                }
            }
        }

        info!(
            modules = modules.len(),
            failures = failures.len(),
            "lifecycle load pass complete"
        );

        failures
    }
}
