//! Hook registry and dispatch.
//!
//! A hook is a named extension point. Modules bind a callback to a hook in
//! their manifest; bindings are written to the database at install time and
//! read back at dispatch time. Definitions are created on first reference
//! and never deleted automatically.

use serde_json::Value;
use sqlx::{FromRow, PgPool, Row};
use tracing::{debug, error};

use super::manifest::ModuleManifest;
use super::registry::ModuleRegistry;
use crate::error::ModuleError;

const HOOKS_DDL: &str = "CREATE TABLE IF NOT EXISTS hooks (\
     id SERIAL PRIMARY KEY, \
     name VARCHAR(255) NOT NULL UNIQUE, \
     active BOOLEAN NOT NULL DEFAULT TRUE)";

const HOOK_MODULE_DDL: &str = "CREATE TABLE IF NOT EXISTS hook_module (\
     id SERIAL PRIMARY KEY, \
     hook_id INTEGER NOT NULL REFERENCES hooks(id), \
     module_name VARCHAR(255) NOT NULL, \
     callback VARCHAR(255) NOT NULL, \
     position INTEGER NOT NULL DEFAULT 0, \
     active BOOLEAN NOT NULL DEFAULT TRUE, \
     CONSTRAINT uq_hook_module UNIQUE(hook_id, module_name, callback))";

/// Ensure the hook tables exist.
pub async fn ensure_hook_tables(pool: &PgPool) -> Result<(), ModuleError> {
    sqlx::query(HOOKS_DDL).execute(pool).await?;
    sqlx::query(HOOK_MODULE_DDL).execute(pool).await?;
    Ok(())
}

/// Register one (hook, module, callback) binding.
///
/// Both writes are insert-or-ignore: re-registering an existing binding is
/// a benign no-op, which keeps repeated installs and concurrent boots safe
/// without application-level locking.
pub async fn register_hook(
    pool: &PgPool,
    module: &str,
    hook: &str,
    callback: &str,
    position: i32,
) -> Result<(), ModuleError> {
    sqlx::query("INSERT INTO hooks (name, active) VALUES ($1, TRUE) ON CONFLICT (name) DO NOTHING")
        .bind(hook)
        .execute(pool)
        .await?;

    sqlx::query(
        "INSERT INTO hook_module (hook_id, module_name, callback, position, active) \
         SELECT id, $2, $3, $4, TRUE FROM hooks WHERE name = $1 \
         ON CONFLICT (hook_id, module_name, callback) DO NOTHING",
    )
    .bind(hook)
    .bind(module)
    .bind(callback)
    .bind(position)
    .execute(pool)
    .await?;

    Ok(())
}

/// Register every hook binding a module's manifest declares. Returns the
/// number of bindings processed.
pub async fn register_manifest_hooks(
    pool: &PgPool,
    manifest: &ModuleManifest,
) -> Result<u64, ModuleError> {
    for (hook, callback) in &manifest.hooks {
        register_hook(pool, &manifest.id, hook, callback, 0).await?;
        debug!(
            module = %manifest.id,
            hook = %hook,
            callback = %callback,
            "hook binding registered"
        );
    }
    Ok(manifest.hooks.len() as u64)
}

/// One active binding of a hook, in dispatch order.
#[derive(Debug, Clone, FromRow)]
pub struct HookBinding {
    pub module_name: String,
    pub callback: String,
    pub position: i32,
}

/// Fetch the active bindings for a hook, position ascending (binding id as
/// the tie-break so dispatch order is stable).
pub async fn bindings(pool: &PgPool, hook: &str) -> Result<Vec<HookBinding>, ModuleError> {
    let rows = sqlx::query_as::<_, HookBinding>(
        "SELECT hm.module_name, hm.callback, hm.position \
         FROM hook_module hm \
         JOIN hooks h ON h.id = hm.hook_id \
         WHERE h.name = $1 AND h.active AND hm.active \
         ORDER BY hm.position ASC, hm.id ASC",
    )
    .bind(hook)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Count the bindings stored for a hook, active or not.
pub async fn binding_count(pool: &PgPool, hook: &str) -> Result<i64, ModuleError> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS cnt FROM hook_module hm \
         JOIN hooks h ON h.id = hm.hook_id WHERE h.name = $1",
    )
    .bind(hook)
    .fetch_one(pool)
    .await?;

    Ok(row.get("cnt"))
}

/// Result from a single callback invocation.
#[derive(Debug)]
pub struct HookResult {
    pub module: String,
    pub callback: String,
    pub output: Value,
}

/// A callback failure, retained for observability; it never stops dispatch.
#[derive(Debug)]
pub struct HookError {
    pub module: String,
    pub callback: String,
    pub message: String,
}

/// Aggregated outcome of one hook dispatch.
#[derive(Debug, Default)]
pub struct HookDispatch {
    pub results: Vec<HookResult>,
    pub errors: Vec<HookError>,
}

/// Dispatch a hook: fetch its active bindings and invoke each bound
/// module's callback with a shared payload. A failing callback is logged,
/// recorded, and skipped, so one module cannot starve the rest.
pub async fn dispatch_hook(
    pool: &PgPool,
    registry: &ModuleRegistry,
    hook: &str,
    payload: &Value,
) -> Result<HookDispatch, ModuleError> {
    let bound = bindings(pool, hook).await?;
    if bound.is_empty() {
        debug!(hook = %hook, "no bindings registered for hook");
        return Ok(HookDispatch::default());
    }

    Ok(invoke_bindings(registry, hook, &bound, payload).await)
}

/// Invoke an ordered list of bindings against the compiled-in registry.
pub async fn invoke_bindings(
    registry: &ModuleRegistry,
    hook: &str,
    bound: &[HookBinding],
    payload: &Value,
) -> HookDispatch {
    let mut dispatch = HookDispatch::default();

    for binding in bound {
        let Some(module) = registry.get(&binding.module_name) else {
            error!(
                module = %binding.module_name,
                hook = %hook,
                "binding has no compiled-in implementation"
            );
            dispatch.errors.push(HookError {
                module: binding.module_name.clone(),
                callback: binding.callback.clone(),
                message: "no compiled-in implementation".to_string(),
            });
            continue;
        };

        match module.hook(&binding.callback, payload).await {
            Ok(output) => dispatch.results.push(HookResult {
                module: binding.module_name.clone(),
                callback: binding.callback.clone(),
                output,
            }),
            Err(e) => {
                error!(
                    module = %binding.module_name,
                    hook = %hook,
                    callback = %binding.callback,
                    error = %e,
                    "hook callback failed"
                );
                dispatch.errors.push(HookError {
                    module: binding.module_name.clone(),
                    callback: binding.callback.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    debug!(
        hook = %hook,
        bindings = bound.len(),
        results = dispatch.results.len(),
        errors = dispatch.errors.len(),
        "dispatch complete"
    );

    dispatch
}
