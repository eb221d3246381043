#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Integration tests for the compliance scanner over a realistic modules
//! tree, including the written report artifact.

use std::fs;
use std::path::Path;

use bottega_kernel::compliance::{self, REPORT_FILE};

fn write_module(root: &Path, id: &str, ping: bool) {
    let dir = root.join(id);
    fs::create_dir_all(dir.join("frontend")).unwrap();
    fs::create_dir_all(dir.join("backend")).unwrap();
    fs::create_dir_all(dir.join("db/migrations")).unwrap();

    fs::write(
        dir.join("module.config.json"),
        format!(
            r#"{{"name":"{id}","version":"1.0.0","enabled":true,"migrations":true,"hooks":{{"item_saved":"onItemSaved"}}}}"#
        ),
    )
    .unwrap();
    fs::write(
        dir.join("config.json"),
        format!(r#"{{"id":"{id}","name":"{id}","category":"core","icon":"box","order":1,"defaultActive":true}}"#),
    )
    .unwrap();
    fs::write(
        dir.join("frontend/index.tsx"),
        "export function Main() { return null; }\nexport default Main;\n",
    )
    .unwrap();

    let route = if ping {
        format!("  app.get('/api/{id}/ping', (req, res) => res.json({{ ok: true }}));\n")
    } else {
        String::new()
    };
    fs::write(
        dir.join("backend/index.js"),
        format!("module.exports = function register(app) {{\n{route}}};\n"),
    )
    .unwrap();
}

#[test]
fn scan_reports_only_the_broken_module() {
    let tmp = tempfile::tempdir().unwrap();
    write_module(tmp.path(), "billing", true);
    write_module(tmp.path(), "scraper", false);
    fs::create_dir_all(tmp.path().join("shared")).unwrap();

    let report = compliance::scan_modules(tmp.path());
    assert!(!report.ok);
    assert_eq!(report.modules.len(), 2);

    let billing = report.modules.iter().find(|m| m.id == "billing").unwrap();
    assert!(billing.errors.is_empty());
    assert!(billing.has_frontend && billing.has_backend && billing.has_migrations_dir);

    let scraper = report.modules.iter().find(|m| m.id == "scraper").unwrap();
    assert_eq!(scraper.errors, vec!["missing_ping"]);
}

#[test]
fn written_report_round_trips_as_json() {
    let tmp = tempfile::tempdir().unwrap();
    write_module(tmp.path(), "billing", true);

    let report = compliance::scan_modules(tmp.path());
    let path = tmp.path().join(REPORT_FILE);
    compliance::write_report(&report, &path, true).unwrap();

    let parsed: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(parsed["ok"], serde_json::json!(true));
    assert_eq!(parsed["modules"][0]["id"], serde_json::json!("billing"));
    assert!(parsed["generatedAt"].is_string());
    assert!(parsed["modules"][0]["errors"].as_array().unwrap().is_empty());
}

#[test]
fn scanner_never_reads_the_database_or_mutates_modules() {
    let tmp = tempfile::tempdir().unwrap();
    write_module(tmp.path(), "billing", true);

    let before: Vec<_> = walk(tmp.path());
    let _report = compliance::scan_modules(tmp.path());
    let after: Vec<_> = walk(tmp.path());

    assert_eq!(before, after);
}

fn walk(root: &Path) -> Vec<String> {
    let mut paths = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir).unwrap().filter_map(|e| e.ok()) {
            let path = entry.path();
            paths.push(path.display().to_string());
            if path.is_dir() {
                stack.push(path);
            }
        }
    }
    paths.sort();
    paths
}
