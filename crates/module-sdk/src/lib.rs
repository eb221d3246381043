//! Bottega Module SDK
//!
//! The contract between the kernel and compiled-in modules. A module links
//! against this crate, implements [`ModuleHooks`], and is registered with
//! the kernel's module registry at host startup. The kernel hands every
//! callback a [`ModuleContext`] carrying the capabilities a module is
//! allowed to use: the database pool, route registration, settings storage,
//! a structured logger, and cron action registration.

pub mod context;

pub use context::{
    CronAction, CronRegistrar, ModuleContext, ModuleLogger, RouteRegistrar, SettingsStore,
};

use async_trait::async_trait;
use serde_json::Value;

/// Lifecycle and hook callbacks for one module.
///
/// `on_loaded` runs on every boot of the host process, not just on first
/// install, so every side effect inside it must be idempotent
/// (`CREATE TABLE IF NOT EXISTS`, `INSERT ... ON CONFLICT DO NOTHING`).
/// `on_disabled` must not delete module data: disabling is a soft,
/// reversible transition.
#[async_trait]
pub trait ModuleHooks: Send + Sync {
    /// Module id. Must match the module's directory name under the modules
    /// root so the kernel can pair the manifest with this implementation.
    fn id(&self) -> &str;

    async fn on_loaded(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_disabled(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Invoke a named hook callback with a shared event payload.
    ///
    /// The kernel resolves which (module, callback) pairs to run from the
    /// hook registry; a module only ever receives callback names it declared
    /// in its own manifest.
    async fn hook(&self, callback: &str, _payload: &Value) -> anyhow::Result<Value> {
        anyhow::bail!("unknown callback '{callback}'")
    }
}
