//! Boot orchestration.
//!
//! At boot, every enabled module runs the same pipeline: migrations, hook
//! registration, `on_loaded`. Modules are independent units of failure: a
//! failing module is reported and skipped, never allowed to block its
//! siblings. The same pipeline backs the administrative install and
//! enable/disable actions.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::{info, warn};

use super::hooks;
use super::lifecycle::{self, LifecycleDispatcher};
use super::manifest::{self, DiscoveredModule, MODULE_CONFIG_FILE};
use super::migration;
use super::registry::ModuleRegistry;
use crate::error::ModuleError;

/// Outcome of installing one module.
#[derive(Debug, Default)]
pub struct InstallOutcome {
    /// Newly applied migration filenames.
    pub applied: Vec<String>,
    /// Hook bindings processed from the manifest.
    pub hooks_registered: u64,
}

/// Per-module outcome of a boot pass.
#[derive(Debug)]
pub struct BootReport {
    pub module: String,
    pub applied: Vec<String>,
    pub hooks_registered: u64,
    /// Set when any stage of this module's pipeline failed.
    pub error: Option<String>,
}

/// The module runtime: discovery root, database pool, compiled-in registry.
pub struct ModuleRuntime {
    pool: PgPool,
    modules_dir: PathBuf,
    migration_debug: bool,
    lifecycle: LifecycleDispatcher,
}

impl ModuleRuntime {
    pub fn new(
        pool: PgPool,
        modules_dir: impl Into<PathBuf>,
        registry: Arc<ModuleRegistry>,
        migration_debug: bool,
    ) -> Self {
        let lifecycle = LifecycleDispatcher::new(pool.clone(), registry);
        Self {
            pool,
            modules_dir: modules_dir.into(),
            migration_debug,
            lifecycle,
        }
    }

    pub fn modules_dir(&self) -> &Path {
        &self.modules_dir
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn migration_debug(&self) -> bool {
        self.migration_debug
    }

    pub fn lifecycle(&self) -> &LifecycleDispatcher {
        &self.lifecycle
    }

    /// Discover all modules under the modules root.
    pub fn discover(&self) -> Vec<DiscoveredModule> {
        manifest::discover_modules(&self.modules_dir)
    }

    /// Load one module by id.
    pub fn module(&self, id: &str) -> Result<DiscoveredModule, ModuleError> {
        manifest::load_module(&self.modules_dir, id).ok_or_else(|| ModuleError::ModuleNotFound {
            module: id.to_string(),
            path: self.modules_dir.display().to_string(),
        })
    }

    /// Create the runtime-owned tables when absent.
    pub async fn ensure_schema(&self) -> Result<(), ModuleError> {
        migration::ensure_ledger(&self.pool).await?;
        hooks::ensure_hook_tables(&self.pool).await?;
        lifecycle::ensure_settings_table(&self.pool).await?;
        Ok(())
    }

    /// Install one module: apply pending migrations, then register the hook
    /// bindings its manifest declares.
    pub async fn install_module(&self, module: &DiscoveredModule) -> Result<InstallOutcome> {
        let applied = migration::apply_migrations(
            &self.pool,
            &module.id,
            &module.migrations_dir(),
            self.migration_debug,
        )
        .await?;

        let hooks_registered = match &module.manifest {
            Some(m) => hooks::register_manifest_hooks(&self.pool, m).await?,
            None => 0,
        };

        Ok(InstallOutcome {
            applied,
            hooks_registered,
        })
    }

    /// Boot pass: run the full pipeline for every enabled module.
    ///
    /// Module pipelines are isolated from each other; the returned reports
    /// carry each module's applied migrations and any failure.
    pub async fn boot(&self) -> Result<Vec<BootReport>> {
        self.ensure_schema().await?;

        let enabled: Vec<DiscoveredModule> = self
            .discover()
            .into_iter()
            .filter(DiscoveredModule::enabled)
            .collect();

        info!(modules = enabled.len(), "booting enabled modules");

        let mut reports = Vec::with_capacity(enabled.len());

        for module in &enabled {
            let mut report = BootReport {
                module: module.id.clone(),
                applied: Vec::new(),
                hooks_registered: 0,
                error: None,
            };

            match self.install_module(module).await {
                Ok(outcome) => {
                    report.applied = outcome.applied;
                    report.hooks_registered = outcome.hooks_registered;

                    if let Err(e) = self.lifecycle.on_loaded(&module.id).await {
                        warn!(module = %module.id, error = %e, "onModuleLoaded failed");
                        report.error = Some(e.to_string());
                    }
                }
                Err(e) => {
                    warn!(module = %module.id, error = %e, "module install failed, skipping");
                    report.error = Some(e.to_string());
                }
            }

            reports.push(report);
        }

        Ok(reports)
    }

    /// Administrative enable: flip the manifest flag, run the install
    /// pipeline, dispatch `on_loaded`.
    pub async fn enable_module(&self, id: &str) -> Result<InstallOutcome> {
        let module = self.module(id)?;
        set_manifest_enabled(&module.dir, id, true)?;

        self.ensure_schema().await?;
        let module = self.module(id)?;
        let outcome = self.install_module(&module).await?;
        self.lifecycle
            .on_loaded(id)
            .await
            .with_context(|| format!("onModuleLoaded failed for '{id}'"))?;

        info!(module = %id, "module enabled");
        Ok(outcome)
    }

    /// Administrative disable: flip the manifest flag and dispatch
    /// `on_disabled`. Soft by contract: module data stays in place.
    pub async fn disable_module(&self, id: &str) -> Result<()> {
        let module = self.module(id)?;
        set_manifest_enabled(&module.dir, id, false)?;

        self.lifecycle
            .on_disabled(id)
            .await
            .with_context(|| format!("onModuleDisabled failed for '{id}'"))?;

        info!(module = %id, "module disabled");
        Ok(())
    }
}

/// Rewrite the canonical manifest's `enabled` flag in place, preserving the
/// rest of the document.
pub fn set_manifest_enabled(dir: &Path, module: &str, enabled: bool) -> Result<()> {
    let path = dir.join(MODULE_CONFIG_FILE);

    let missing = || ModuleError::ManifestMissing {
        module: module.to_string(),
        path: path.display().to_string(),
    };

    let text = fs::read_to_string(&path).map_err(|_| missing())?;
    let mut doc: serde_json::Value = serde_json::from_str(&text).map_err(|_| missing())?;
    let obj = doc.as_object_mut().ok_or_else(missing)?;

    obj.insert("enabled".to_string(), serde_json::Value::Bool(enabled));

    let mut rendered = serde_json::to_string_pretty(&doc)?;
    rendered.push('\n');
    fs::write(&path, rendered)
        .with_context(|| format!("failed to write manifest for '{module}'"))?;

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::module::manifest::load_module;

    #[test]
    fn enabled_flag_round_trips_through_the_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("chat");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(MODULE_CONFIG_FILE),
            r#"{"name":"Chat","version":"1.0.0","enabled":false,"hooks":{"message_sent":"onMessageSent"}}"#,
        )
        .unwrap();

        set_manifest_enabled(&dir, "chat", true).unwrap();
        let module = load_module(tmp.path(), "chat").unwrap();
        let manifest = module.manifest.unwrap();
        assert!(manifest.enabled);
        // The rest of the document is preserved.
        assert_eq!(manifest.name, "Chat");
        assert_eq!(manifest.hooks.len(), 1);

        set_manifest_enabled(&dir, "chat", false).unwrap();
        assert!(!load_module(tmp.path(), "chat").unwrap().enabled());
    }

    #[test]
    fn flipping_without_a_canonical_manifest_is_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("legacy-only");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("config.json"), r#"{"name":"Legacy","defaultActive":true}"#).unwrap();

        let err = set_manifest_enabled(&dir, "legacy-only", true).unwrap_err();
        assert!(err.to_string().contains("module.config.json"));
    }
}
