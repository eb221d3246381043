//! CLI command implementations for module administration.
//!
//! These commands operate with a minimal context (database pool and the
//! modules directory) without starting an embedding host.

use std::path::Path;

use anyhow::{Result, bail};
use sqlx::PgPool;
use tracing::warn;

use crate::compliance;
use crate::module::manifest::{self, DiscoveredModule};
use crate::module::migration;
use crate::module::runtime::ModuleRuntime;
use crate::rename;

/// List all discovered modules and their declared state.
pub fn cmd_list(modules_dir: &Path) {
    let discovered = manifest::discover_modules(modules_dir);

    if discovered.is_empty() {
        println!("No modules found in {}.", modules_dir.display());
        return;
    }

    println!(
        "{:<24} {:<10} {:<9} {:<9} {:<9} {:<10}",
        "MODULE", "VERSION", "ENABLED", "FRONTEND", "BACKEND", "MIGRATIONS"
    );
    println!("{}", "-".repeat(74));

    for module in &discovered {
        let (version, enabled) = match &module.manifest {
            Some(m) => (m.display_version().to_string(), if m.enabled { "yes" } else { "no" }),
            None => ("?".to_string(), "no manifest"),
        };
        let migrations = migration::list_migration_files(&module.migrations_dir()).len();

        println!(
            "{:<24} {:<10} {:<9} {:<9} {:<9} {}",
            module.id,
            version,
            enabled,
            if module.has_frontend { "yes" } else { "no" },
            if module.has_backend { "yes" } else { "no" },
            migrations
        );
    }
}

/// Install one module, or every enabled module. Installing means running
/// pending migrations and registering manifest hook bindings; modules are
/// independent units of failure.
pub async fn cmd_install(runtime: &ModuleRuntime, module: Option<&str>) -> Result<()> {
    runtime.ensure_schema().await?;

    let targets: Vec<DiscoveredModule> = match module {
        Some(id) => vec![runtime.module(id)?],
        None => runtime
            .discover()
            .into_iter()
            .filter(DiscoveredModule::enabled)
            .collect(),
    };

    if targets.is_empty() {
        println!("No enabled modules to install.");
        return Ok(());
    }

    let mut failures = Vec::new();

    for target in &targets {
        match runtime.install_module(target).await {
            Ok(outcome) => {
                if outcome.applied.is_empty() {
                    println!("{}: no pending migrations", target.id);
                } else {
                    println!("{}:", target.id);
                    for applied in &outcome.applied {
                        println!("  applied: {applied}");
                    }
                }
            }
            Err(e) => {
                eprintln!("{}: {e:#}", target.id);
                failures.push(target.id.clone());
            }
        }
    }

    if !failures.is_empty() {
        bail!("{} module(s) failed to install: {}", failures.len(), failures.join(", "));
    }

    Ok(())
}

/// Run pending migrations for one or all enabled modules.
pub async fn cmd_migrate(runtime: &ModuleRuntime, module: Option<&str>) -> Result<()> {
    let targets: Vec<DiscoveredModule> = match module {
        Some(id) => vec![runtime.module(id)?],
        None => runtime
            .discover()
            .into_iter()
            .filter(DiscoveredModule::enabled)
            .collect(),
    };

    let mut failures = Vec::new();

    for target in &targets {
        let migrations_dir = target.migrations_dir();
        match migration::apply_migrations(
            runtime.pool(),
            &target.id,
            &migrations_dir,
            runtime.migration_debug(),
        )
        .await
        {
            Ok(applied) if applied.is_empty() => {
                println!("{}: no pending migrations", target.id);
            }
            Ok(applied) => {
                println!("Applied {} migration(s) for '{}':", applied.len(), target.id);
                for name in &applied {
                    println!("  {name}");
                }
            }
            Err(e) => {
                eprintln!("{e}");
                failures.push(target.id.clone());
            }
        }
    }

    if !failures.is_empty() {
        bail!("{} module(s) failed to migrate: {}", failures.len(), failures.join(", "));
    }

    Ok(())
}

/// Run the full boot pipeline: discover, migrate, register hooks, dispatch
/// `onModuleLoaded` for every enabled module.
pub async fn cmd_boot(runtime: &ModuleRuntime) -> Result<()> {
    let reports = runtime.boot().await?;

    if reports.is_empty() {
        println!("No enabled modules.");
        return Ok(());
    }

    let mut failed = 0usize;
    for report in &reports {
        match &report.error {
            Some(e) => {
                failed += 1;
                eprintln!("{}: FAILED: {e}", report.module);
            }
            None => println!(
                "{}: ok ({} migration(s), {} hook binding(s))",
                report.module,
                report.applied.len(),
                report.hooks_registered
            ),
        }
    }

    if failed > 0 {
        bail!("{failed} of {} module(s) failed to boot", reports.len());
    }

    Ok(())
}

/// Enable a module and dispatch its `onModuleLoaded`.
pub async fn cmd_enable(runtime: &ModuleRuntime, name: &str) -> Result<()> {
    let outcome = runtime.enable_module(name).await?;
    println!(
        "Module '{}' enabled ({} migration(s) applied, {} hook binding(s)).",
        name,
        outcome.applied.len(),
        outcome.hooks_registered
    );
    Ok(())
}

/// Disable a module and dispatch its `onModuleDisabled`. Module data is
/// left in place; disabling is reversible.
pub async fn cmd_disable(runtime: &ModuleRuntime, name: &str) -> Result<()> {
    runtime.disable_module(name).await?;
    println!("Module '{name}' disabled.");
    Ok(())
}

/// Run the compliance scanner. Returns the process exit code: non-zero iff
/// any module has error-severity findings and `--no-fail` was not given.
pub fn cmd_check(modules_dir: &Path, no_fail: bool, pretty: bool) -> Result<i32> {
    let report = compliance::scan_modules(modules_dir);

    let report_path = modules_dir.join(compliance::REPORT_FILE);
    compliance::write_report(&report, &report_path, pretty)?;
    println!("{}", compliance::render_report(&report, pretty)?);

    if report.ok || no_fail {
        Ok(0)
    } else {
        let failing = report.modules.iter().filter(|m| !m.is_compliant()).count();
        eprintln!("{failing} module(s) have compliance errors (see {})", report_path.display());
        Ok(1)
    }
}

/// Run the table rename planner. Never fails the surrounding pipeline: with
/// no reachable database the plan degrades and the exit code stays zero.
pub async fn cmd_plan_renames(
    pool: Option<&PgPool>,
    modules_dir: &Path,
    pretty: bool,
    with_views: bool,
) -> Result<()> {
    let module_ids: Vec<String> = manifest::discover_modules(modules_dir)
        .into_iter()
        .map(|m| m.id)
        .collect();

    let plan = match rename::build_plan(pool, &module_ids, with_views).await {
        Ok(plan) => plan,
        Err(e) => {
            warn!(error = %e, "rename planning degraded");
            rename::RenamePlan {
                ok: false,
                message: Some(e.to_string()),
                renames: Vec::new(),
                generated_at: chrono::Utc::now().to_rfc3339(),
            }
        }
    };

    let plan_path = modules_dir.join(rename::PLAN_FILE);
    rename::write_plan(&plan, &plan_path, pretty)?;
    println!("{}", rename::render_plan(&plan, pretty)?);

    Ok(())
}
