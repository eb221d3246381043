//! Capability context handed to module callbacks.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use parking_lot::Mutex;
use sqlx::PgPool;

/// Everything a module is allowed to touch from a lifecycle or hook
/// callback. Cloning is cheap; all members are handles.
#[derive(Clone)]
pub struct ModuleContext {
    /// Id of the module this context was built for.
    pub module: String,
    /// Shared database connection pool.
    pub pool: PgPool,
    /// Route registration, merged into the host router after boot.
    pub routes: RouteRegistrar,
    /// Persistent key-value settings, scoped per module.
    pub settings: Arc<dyn SettingsStore>,
    /// Structured logger carrying the module id.
    pub log: ModuleLogger,
    /// Cron action registration, drained by the host's scheduler.
    pub cron: CronRegistrar,
}

impl ModuleContext {
    pub fn new(
        module: &str,
        pool: PgPool,
        routes: RouteRegistrar,
        settings: Arc<dyn SettingsStore>,
        cron: CronRegistrar,
    ) -> Self {
        Self {
            module: module.to_string(),
            pool,
            routes,
            settings,
            log: ModuleLogger::new(module),
            cron,
        }
    }
}

/// Persistent key-value settings storage.
///
/// The kernel provides a Postgres-backed implementation; tests may supply
/// an in-memory one.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, module: &str, name: &str) -> anyhow::Result<Option<String>>;
    async fn set(&self, module: &str, name: &str, value: &str) -> anyhow::Result<()>;
}

/// Collects routers registered by modules for the host to merge.
///
/// Prefix registration is deduplicated through an explicit owned set, so a
/// module whose `on_loaded` runs again after an enable/disable cycle cannot
/// double-mount its routes.
#[derive(Clone, Default)]
pub struct RouteRegistrar {
    inner: Arc<Mutex<RegistrarInner>>,
}

#[derive(Default)]
struct RegistrarInner {
    registered_prefixes: HashSet<String>,
    routes: Vec<(String, Router)>,
}

impl RouteRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a router under a prefix. Returns `false` when the prefix was
    /// already registered (the router is dropped in that case).
    pub fn register(&self, prefix: &str, router: Router) -> bool {
        let mut inner = self.inner.lock();
        if !inner.registered_prefixes.insert(prefix.to_string()) {
            tracing::debug!(prefix = %prefix, "route prefix already registered, skipping");
            return false;
        }
        inner.routes.push((prefix.to_string(), router));
        true
    }

    pub fn registered_prefixes(&self) -> Vec<String> {
        let mut prefixes: Vec<String> = self.inner.lock().registered_prefixes.iter().cloned().collect();
        prefixes.sort();
        prefixes
    }

    /// Drain collected routes for mounting. The prefix set is retained so
    /// later registrations under the same prefix are still rejected.
    pub fn take_routes(&self) -> Vec<(String, Router)> {
        std::mem::take(&mut self.inner.lock().routes)
    }
}

/// A named cron action registered by a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronAction {
    pub module: String,
    pub name: String,
    pub interval_secs: u64,
}

/// Collects cron actions for the host's scheduler.
#[derive(Clone, Default)]
pub struct CronRegistrar {
    inner: Arc<Mutex<Vec<CronAction>>>,
}

impl CronRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cron action. Re-registering the same (module, name) pair
    /// updates the interval instead of adding a duplicate, keeping repeated
    /// `on_loaded` runs idempotent.
    pub fn register(&self, module: &str, name: &str, interval_secs: u64) {
        let mut actions = self.inner.lock();
        if let Some(existing) = actions
            .iter_mut()
            .find(|a| a.module == module && a.name == name)
        {
            existing.interval_secs = interval_secs;
            return;
        }
        actions.push(CronAction {
            module: module.to_string(),
            name: name.to_string(),
            interval_secs,
        });
    }

    pub fn actions(&self) -> Vec<CronAction> {
        self.inner.lock().clone()
    }
}

/// Structured logger bound to one module.
#[derive(Clone)]
pub struct ModuleLogger {
    module: Arc<str>,
}

impl ModuleLogger {
    pub fn new(module: &str) -> Self {
        Self {
            module: Arc::from(module),
        }
    }

    pub fn debug(&self, message: &str) {
        tracing::debug!(module = %self.module, "{message}");
    }

    pub fn info(&self, message: &str) {
        tracing::info!(module = %self.module, "{message}");
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(module = %self.module, "{message}");
    }

    pub fn error(&self, message: &str) {
        tracing::error!(module = %self.module, "{message}");
    }
}
