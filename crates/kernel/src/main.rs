//! Bottega module runtime CLI.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use bottega_kernel::module::{ModuleRegistry, ModuleRuntime};
use bottega_kernel::{Config, cli, db};

#[derive(Parser)]
#[command(name = "bottega", version, about = "Bottega module runtime")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List discovered modules and their declared state.
    List,
    /// Run migrations and hook registration for one module, or for all
    /// enabled modules.
    Install { module: Option<String> },
    /// Run pending migrations only.
    Migrate { module: Option<String> },
    /// Run the full boot pipeline for all enabled modules.
    Boot,
    /// Enable a module and dispatch its onModuleLoaded callback.
    Enable { module: String },
    /// Disable a module and dispatch its onModuleDisabled callback.
    Disable { module: String },
    /// Run the structural compliance scanner.
    Check {
        /// Exit 0 even when modules have compliance errors.
        #[arg(long)]
        no_fail: bool,
        /// Pretty-print the JSON report.
        #[arg(long)]
        pretty: bool,
    },
    /// Plan (without executing) table renames into the canonical
    /// mod_<module>_<suffix> convention.
    PlanRenames {
        /// Pretty-print the JSON plan.
        #[arg(long)]
        pretty: bool,
        /// Propose backward-compatible views under the old names.
        #[arg(long)]
        with_views: bool,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("bottega: error: {e:#}");
            1
        }
    };

    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let config = Config::from_env()?;

    match cli.command {
        Command::List => {
            cli::cmd_list(&config.modules_dir);
            Ok(0)
        }
        Command::Check { no_fail, pretty } => cli::cmd_check(&config.modules_dir, no_fail, pretty),
        Command::PlanRenames { pretty, with_views } => {
            // The planner must never fail the surrounding pipeline: an
            // unconfigured or unreachable database degrades to an empty plan.
            let pool = match &config.database_url {
                None => None,
                Some(_) => match db::create_pool(&config).await {
                    Ok(pool) => Some(pool),
                    Err(e) => {
                        warn!(error = %e, "database unreachable, planning degraded");
                        None
                    }
                },
            };
            cli::cmd_plan_renames(pool.as_ref(), &config.modules_dir, pretty, with_views).await?;
            Ok(0)
        }
        command => {
            let pool = db::create_pool(&config).await?;
            // The admin CLI runs with an empty compiled-in registry:
            // lifecycle callbacks belong to the embedding host process.
            let registry = Arc::new(ModuleRegistry::new());
            let runtime = ModuleRuntime::new(
                pool,
                config.modules_dir.clone(),
                registry,
                config.migration_debug,
            );

            match command {
                Command::Install { module } => {
                    cli::cmd_install(&runtime, module.as_deref()).await?;
                }
                Command::Migrate { module } => {
                    cli::cmd_migrate(&runtime, module.as_deref()).await?;
                }
                Command::Boot => cli::cmd_boot(&runtime).await?,
                Command::Enable { module } => cli::cmd_enable(&runtime, &module).await?,
                Command::Disable { module } => cli::cmd_disable(&runtime, &module).await?,
                Command::List
                | Command::Check { .. }
                | Command::PlanRenames { .. } => unreachable!("handled above"),
            }

            Ok(0)
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
