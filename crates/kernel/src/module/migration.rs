//! Migration ledger and runner.
//!
//! Applies a module's SQL migration files exactly once. The ledger table
//! `migrations_log` carries a unique constraint on (module_name, filename);
//! a file is applied inside a single transaction together with its ledger
//! row, so a failure leaves neither schema changes nor a ledger entry
//! behind. Filenames are expected to carry a timestamp prefix; lexical
//! order is the only ordering guarantee.

use std::fs;
use std::path::Path;

use sqlx::postgres::{PgDatabaseError, PgErrorPosition};
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use crate::error::ModuleError;

/// Ledger DDL. `IF NOT EXISTS` keeps repeated boots safe.
const LEDGER_DDL: &str = "CREATE TABLE IF NOT EXISTS migrations_log (\
     id SERIAL PRIMARY KEY, \
     module_name VARCHAR(255), \
     filename VARCHAR(255), \
     applied_at TIMESTAMP DEFAULT NOW(), \
     CONSTRAINT uq_migrations_log UNIQUE(module_name, filename))";

/// Characters shown on each side of a reported error position.
const SNIPPET_WINDOW: usize = 160;

/// Fallback snippet length when the driver reports no position.
const SNIPPET_HEAD: usize = 320;

/// Ensure the ledger table exists.
pub async fn ensure_ledger(pool: &PgPool) -> Result<(), ModuleError> {
    sqlx::query(LEDGER_DDL).execute(pool).await?;
    Ok(())
}

/// Get the list of already-applied migration filenames for a module.
pub async fn applied_migrations(pool: &PgPool, module: &str) -> Result<Vec<String>, ModuleError> {
    let rows = sqlx::query(
        "SELECT filename FROM migrations_log WHERE module_name = $1 ORDER BY filename",
    )
    .bind(module)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(|r| r.get("filename")).collect())
}

/// List `*.sql` files in a migrations directory, lexically ascending.
/// A missing directory is an empty list, not an error.
pub fn list_migration_files(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut files: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .filter(|name| name.ends_with(".sql"))
        .collect();

    files.sort();
    files
}

/// Extract the automatically-executable region of a migration file.
///
/// When a case-insensitive start-of-line `-- up` marker is present, the
/// region runs from the line after it to a subsequent `-- down` marker
/// (exclusive) or end of file. Without an `-- up` marker the whole file is
/// executable. The `-- down` section is a rollback convention and never
/// runs automatically.
pub fn extract_up_sql(text: &str) -> &str {
    let mut up_end: Option<usize> = None;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_end();
        match up_end {
            None => {
                if trimmed.eq_ignore_ascii_case("-- up") {
                    up_end = Some(offset + line.len());
                }
            }
            Some(start) => {
                if trimmed.eq_ignore_ascii_case("-- down") {
                    return &text[start..offset];
                }
            }
        }
        offset += line.len();
    }

    match up_end {
        Some(start) => &text[start..],
        None => text,
    }
}

/// Run pending migrations for a single module.
///
/// Each pending file executes in its own transaction: the extracted SQL,
/// then the ledger insert, then commit. Any failure rolls the transaction
/// back in full and aborts this module's remaining files; sibling modules
/// are unaffected because each module's installer is an independent unit
/// of failure.
///
/// Returns the list of newly applied migration filenames.
pub async fn apply_migrations(
    pool: &PgPool,
    module: &str,
    migrations_dir: &Path,
    debug_snippets: bool,
) -> Result<Vec<String>, ModuleError> {
    ensure_ledger(pool).await?;

    let files = list_migration_files(migrations_dir);
    if files.is_empty() {
        return Ok(Vec::new());
    }

    let applied = applied_migrations(pool, module).await?;
    let pending: Vec<&str> = files
        .iter()
        .map(|f| f.as_str())
        .filter(|f| !applied.iter().any(|a| a == f))
        .collect();

    if pending.is_empty() {
        debug!(module = %module, "no pending migrations");
        return Ok(Vec::new());
    }

    info!(
        module = %module,
        count = pending.len(),
        "running pending migrations"
    );

    let mut newly_applied = Vec::new();

    for filename in pending {
        let path = migrations_dir.join(filename);
        let text = fs::read_to_string(&path).map_err(|e| ModuleError::MigrationUnreadable {
            module: module.to_string(),
            migration: filename.to_string(),
            details: e.to_string(),
        })?;

        let sql = extract_up_sql(&text);

        debug!(module = %module, migration = %filename, "executing migration");

        let mut tx = pool.begin().await?;

        // raw_sql instead of query(): migration files contain multiple
        // statements, and prepared statements only support one per call.
        if let Err(e) = sqlx::raw_sql(sql).execute(&mut *tx).await {
            let _ = tx.rollback().await;
            let mut details = e.to_string();
            if debug_snippets {
                details.push('\n');
                details.push_str(&render_failure_snippet(sql, error_position(&e)));
            }
            return Err(ModuleError::migration_failed(module, filename, details));
        }

        let inserted = sqlx::query(
            "INSERT INTO migrations_log (module_name, filename) VALUES ($1, $2)",
        )
        .bind(module)
        .bind(filename)
        .execute(&mut *tx)
        .await;

        // A unique-constraint failure here means a concurrent installer won
        // the race for this file; this attempt loses and rolls back.
        if let Err(e) = inserted {
            let _ = tx.rollback().await;
            return Err(ModuleError::migration_failed(
                module,
                filename,
                format!("ledger insert failed: {e}"),
            ));
        }

        tx.commit().await?;
        newly_applied.push(filename.to_string());
    }

    info!(
        module = %module,
        applied = newly_applied.len(),
        "migrations complete"
    );

    Ok(newly_applied)
}

/// The 1-based character position reported by the driver, when present.
fn error_position(err: &sqlx::Error) -> Option<usize> {
    let pg = err
        .as_database_error()?
        .try_downcast_ref::<PgDatabaseError>()?;

    match pg.position()? {
        PgErrorPosition::Original(p) => Some(p),
        PgErrorPosition::Internal { position, .. } => Some(position),
    }
}

/// Render a diagnostic snippet of the executed SQL.
///
/// With a reported position: a window of the surrounding text with a caret
/// under the offending column. Without one: the head of the statement.
pub fn render_failure_snippet(sql: &str, position: Option<usize>) -> String {
    let chars: Vec<char> = sql.chars().collect();

    let Some(pos) = position.filter(|p| *p >= 1 && *p <= chars.len()) else {
        return chars.iter().take(SNIPPET_HEAD).collect();
    };

    let idx = pos - 1;
    let start = idx.saturating_sub(SNIPPET_WINDOW);
    let end = (idx + SNIPPET_WINDOW).min(chars.len());
    let window: String = chars[start..end].iter().collect();
    let rel = idx - start;

    let mut out = String::new();
    let mut line_start = 0usize;
    for line in window.split('\n') {
        let line_len = line.chars().count();
        out.push_str(line);
        out.push('\n');
        if rel >= line_start && rel <= line_start + line_len {
            out.push_str(&" ".repeat(rel - line_start));
            out.push('^');
            out.push('\n');
        }
        line_start += line_len + 1;
    }

    out.trim_end().to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn whole_file_executes_without_markers() {
        let sql = "CREATE TABLE a (id INT);\nINSERT INTO a VALUES (1);\n";
        assert_eq!(extract_up_sql(sql), sql);
    }

    #[test]
    fn up_section_runs_to_end_of_file() {
        let sql = "-- up\nCREATE TABLE a (id INT);\n";
        assert_eq!(extract_up_sql(sql), "CREATE TABLE a (id INT);\n");
    }

    #[test]
    fn down_section_is_never_part_of_the_executable_region() {
        let sql = "-- up\nCREATE TABLE a (id INT);\n-- down\nDROP TABLE nonexistent;\n";
        let up = extract_up_sql(sql);
        assert_eq!(up, "CREATE TABLE a (id INT);\n");
        assert!(!up.contains("DROP TABLE"));
    }

    #[test]
    fn markers_match_case_insensitively_at_line_start() {
        let sql = "-- UP\nSELECT 1;\n-- Down\nSELECT 2;\n";
        assert_eq!(extract_up_sql(sql), "SELECT 1;\n");

        // An indented marker is not a marker.
        let indented = "  -- up\nSELECT 1;\n";
        assert_eq!(extract_up_sql(indented), indented);
    }

    #[test]
    fn down_without_up_leaves_whole_file_executable() {
        let sql = "SELECT 1;\n-- down\nSELECT 2;\n";
        assert_eq!(extract_up_sql(sql), sql);
    }

    #[test]
    fn migration_files_sort_lexically() {
        let tmp = tempfile::tempdir().unwrap();
        for name in [
            "20240510_add_index.sql",
            "20240101_init.sql",
            "20240320_seed.sql",
            "notes.txt",
        ] {
            std::fs::write(tmp.path().join(name), "SELECT 1;").unwrap();
        }

        let files = list_migration_files(tmp.path());
        assert_eq!(
            files,
            vec![
                "20240101_init.sql",
                "20240320_seed.sql",
                "20240510_add_index.sql"
            ]
        );
    }

    #[test]
    fn missing_migrations_dir_is_empty_list() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(list_migration_files(&tmp.path().join("absent")).is_empty());
    }

    #[test]
    fn snippet_places_caret_under_offending_column() {
        let sql = "SELECT * FROM users WHRE id = 1";
        // Driver positions are 1-based; 21 points at the 'W' of WHRE.
        let snippet = render_failure_snippet(sql, Some(21));
        let lines: Vec<&str> = snippet.lines().collect();
        assert_eq!(lines[0], sql);
        assert_eq!(lines[1], format!("{}^", " ".repeat(20)));
    }

    #[test]
    fn snippet_caret_lands_on_the_right_line_of_multiline_sql() {
        let sql = "SELECT 1;\nSELEC 2;";
        let snippet = render_failure_snippet(sql, Some(11));
        let lines: Vec<&str> = snippet.lines().collect();
        assert_eq!(lines[0], "SELECT 1;");
        assert_eq!(lines[1], "SELEC 2;");
        assert_eq!(lines[2], "^");
    }

    #[test]
    fn snippet_window_is_bounded_around_the_position() {
        let sql = "x".repeat(1000);
        let snippet = render_failure_snippet(&sql, Some(500));
        // 160 chars each side plus the caret line.
        let body = snippet.lines().next().unwrap();
        assert_eq!(body.chars().count(), 320);
        assert!(snippet.ends_with('^'));
    }

    #[test]
    fn snippet_without_position_shows_the_head() {
        let sql = "y".repeat(1000);
        let snippet = render_failure_snippet(&sql, None);
        assert_eq!(snippet.chars().count(), 320);

        let out_of_range = render_failure_snippet("short", Some(99));
        assert_eq!(out_of_range, "short");
    }
}
