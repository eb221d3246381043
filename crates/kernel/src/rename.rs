//! Table rename planner.
//!
//! Proposes, never executes, renames of legacy tables into the canonical
//! `mod_<module_snake>_<suffix>` convention. The planner reads the live
//! schema when a database is configured and degrades to an empty plan when
//! none is, so it can run inside any pipeline without failing it. Applying
//! a plan is a separate, administrator-triggered operation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::{PgPool, Row};

use crate::error::ModuleError;

/// Plan filename, written under the modules root.
pub const PLAN_FILE: &str = "table_rename_plan.json";

/// Canonical table prefix; tables already carrying it are left alone.
pub const CANONICAL_PREFIX: &str = "mod_";

/// Tables owned by the runtime itself, never proposed for rename.
const RUNTIME_TABLES: &[&str] = &["migrations_log", "hooks", "hook_module", "settings"];

/// One proposed rename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenamePlanEntry {
    /// Module inferred to own the table.
    pub module: String,
    pub from: String,
    pub to: String,
    /// Whether a backward-compatible view under the old name is proposed.
    pub create_view: bool,
}

/// The full rename plan.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenamePlan {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub renames: Vec<RenamePlanEntry>,
    pub generated_at: String,
}

/// Snake-cased form of a module id (`ftp-connection` → `ftp_connection`).
pub fn snake_case_id(id: &str) -> String {
    id.to_lowercase().replace('-', "_")
}

/// Compute the rename plan for a set of tables against known module ids.
///
/// Matching tries module ids longest-first so `ftp-connection` claims
/// `ftp_connection_profiles` before a hypothetical `ftp` module could. The
/// matched segment is stripped wherever it occurs (prefix, substring, or
/// the whole name) and the remainder becomes the canonical suffix, `data`
/// when nothing remains.
pub fn plan_renames(
    tables: &[String],
    module_ids: &[String],
    with_views: bool,
) -> Vec<RenamePlanEntry> {
    let mut ids: Vec<(String, &String)> = module_ids
        .iter()
        .map(|id| (snake_case_id(id), id))
        .collect();
    ids.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

    let mut plan = Vec::new();

    for table in tables {
        if table.starts_with(CANONICAL_PREFIX) || RUNTIME_TABLES.contains(&table.as_str()) {
            continue;
        }

        // Historical carve-out for the module manager's own registry table.
        if table == "modules" {
            plan.push(RenamePlanEntry {
                module: "module-manager".to_string(),
                from: table.clone(),
                to: "mod_module_manager_modules".to_string(),
                create_view: with_views,
            });
            continue;
        }

        for (snake, id) in &ids {
            if snake.is_empty() {
                continue;
            }
            let Some(pos) = table.find(snake.as_str()) else {
                continue;
            };

            let stripped = format!("{}{}", &table[..pos], &table[pos + snake.len()..]);
            let remainder = stripped
                .split('_')
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join("_");
            let suffix = if remainder.is_empty() {
                "data"
            } else {
                remainder.as_str()
            };

            let to = format!("{CANONICAL_PREFIX}{snake}_{suffix}");
            if &to != table {
                plan.push(RenamePlanEntry {
                    module: (*id).clone(),
                    from: table.clone(),
                    to,
                    create_view: with_views,
                });
            }
            break;
        }
    }

    plan.sort_by(|a, b| a.from.cmp(&b.from));
    plan
}

/// List the base tables of the default schema.
pub async fn list_tables(pool: &PgPool) -> Result<Vec<String>, ModuleError> {
    let rows = sqlx::query(
        "SELECT table_name FROM information_schema.tables \
         WHERE table_schema = 'public' AND table_type = 'BASE TABLE' \
         ORDER BY table_name",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(|r| r.get("table_name")).collect())
}

/// The degraded plan emitted when no database is configured.
pub fn no_database_plan() -> RenamePlan {
    RenamePlan {
        ok: false,
        message: Some("no_database".to_string()),
        renames: Vec::new(),
        generated_at: chrono::Utc::now().to_rfc3339(),
    }
}

/// Build the plan: read the live schema when a pool is available, degrade
/// gracefully otherwise. Performs zero DDL either way.
pub async fn build_plan(
    pool: Option<&PgPool>,
    module_ids: &[String],
    with_views: bool,
) -> Result<RenamePlan> {
    let Some(pool) = pool else {
        return Ok(no_database_plan());
    };

    let tables = list_tables(pool).await?;
    Ok(RenamePlan {
        ok: true,
        message: None,
        renames: plan_renames(&tables, module_ids, with_views),
        generated_at: chrono::Utc::now().to_rfc3339(),
    })
}

/// Serialize the plan.
pub fn render_plan(plan: &RenamePlan, pretty: bool) -> Result<String> {
    let rendered = if pretty {
        serde_json::to_string_pretty(plan)?
    } else {
        serde_json::to_string(plan)?
    };
    Ok(rendered)
}

/// Write the plan to disk.
pub fn write_plan(plan: &RenamePlan, path: &Path, pretty: bool) -> Result<()> {
    let mut rendered = render_plan(plan, pretty)?;
    rendered.push('\n');
    fs::write(path, rendered)
        .with_context(|| format!("failed to write rename plan to {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn prefix_match_strips_the_module_segment() {
        let plan = plan_renames(
            &strings(&["ftp_connection_profiles"]),
            &strings(&["ftp-connection"]),
            false,
        );

        assert_eq!(
            plan,
            vec![RenamePlanEntry {
                module: "ftp-connection".to_string(),
                from: "ftp_connection_profiles".to_string(),
                to: "mod_ftp_connection_profiles".to_string(),
                create_view: false,
            }]
        );
    }

    #[test]
    fn exact_match_gets_a_data_suffix() {
        let plan = plan_renames(&strings(&["scraper"]), &strings(&["scraper"]), false);
        assert_eq!(plan[0].to, "mod_scraper_data");
    }

    #[test]
    fn substring_match_keeps_surrounding_segments() {
        let plan = plan_renames(
            &strings(&["legacy_chat_messages"]),
            &strings(&["chat"]),
            false,
        );
        assert_eq!(plan[0].to, "mod_chat_legacy_messages");
    }

    #[test]
    fn longest_module_id_wins() {
        let plan = plan_renames(
            &strings(&["ftp_connection_profiles"]),
            &strings(&["ftp", "ftp-connection"]),
            false,
        );
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].module, "ftp-connection");
        assert_eq!(plan[0].to, "mod_ftp_connection_profiles");
    }

    #[test]
    fn canonical_and_runtime_tables_are_skipped() {
        let plan = plan_renames(
            &strings(&[
                "mod_chat_messages",
                "migrations_log",
                "hooks",
                "hook_module",
                "settings",
            ]),
            &strings(&["chat", "hooks"]),
            false,
        );
        assert!(plan.is_empty());
    }

    #[test]
    fn modules_table_is_special_cased() {
        let plan = plan_renames(&strings(&["modules"]), &strings(&["chat"]), false);
        assert_eq!(plan[0].module, "module-manager");
        assert_eq!(plan[0].to, "mod_module_manager_modules");
    }

    #[test]
    fn unmatched_tables_produce_no_entries() {
        let plan = plan_renames(&strings(&["sessions"]), &strings(&["chat"]), false);
        assert!(plan.is_empty());
    }

    #[test]
    fn with_views_marks_every_entry() {
        let plan = plan_renames(
            &strings(&["chat_messages", "modules"]),
            &strings(&["chat"]),
            true,
        );
        assert_eq!(plan.len(), 2);
        assert!(plan.iter().all(|e| e.create_view));
    }

    #[test]
    fn plan_is_sorted_by_source_table() {
        let plan = plan_renames(
            &strings(&["zeta_chat", "chat_messages"]),
            &strings(&["chat"]),
            false,
        );
        let from: Vec<&str> = plan.iter().map(|e| e.from.as_str()).collect();
        assert_eq!(from, vec!["chat_messages", "zeta_chat"]);
    }

    #[test]
    fn no_database_plan_shape() {
        let plan = no_database_plan();
        assert!(!plan.ok);
        assert_eq!(plan.message.as_deref(), Some("no_database"));
        assert!(plan.renames.is_empty());

        let json = render_plan(&plan, false).unwrap();
        assert!(json.contains("\"message\":\"no_database\""));
        assert!(json.contains("\"renames\":[]"));
    }
}
