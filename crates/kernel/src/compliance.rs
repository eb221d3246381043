//! Structural compliance scanner.
//!
//! Offline and read-only: walks the modules directory and checks each
//! module against the runtime's filesystem contract, producing a
//! machine-readable report CI can gate on without touching the database.
//! Route detection is a text search over backend sources, a deliberately
//! simple heuristic for the `/api/<module-id>/ping` healthcheck convention.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;

use crate::module::manifest::{
    self, BACKEND_ENTRY_FILE, DiscoveredModule, frontend_entry,
};

/// Report filename, written under the modules root.
pub const REPORT_FILE: &str = "module_compliance_report.json";

pub const MISSING_FRONTEND: &str = "missing_frontend";
pub const MISSING_BACKEND: &str = "missing_backend";
pub const MISSING_MIGRATIONS_DIR: &str = "missing_migrations_dir";
pub const MISSING_BACKEND_INDEX: &str = "missing_backend_index";
pub const MISSING_MODULE_CONFIG: &str = "missing_module_config";
pub const MISSING_MANIFEST: &str = "missing_manifest";
pub const MISSING_PING: &str = "missing_ping";
pub const MISSING_FRONTEND_INDEX: &str = "missing_frontend_index";
pub const MISSING_EXPORT_MAIN: &str = "missing_export_Main";
pub const MISSING_EXPORT_DEFAULT: &str = "missing_export_default";
pub const LEGACY_PREFIX_REFS: &str = "legacy_prefix_refs";

#[allow(clippy::expect_used)]
static EXPORT_MAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)export\s+(?:(?:async\s+)?function\s+Main\b|const\s+Main\b|class\s+Main\b|let\s+Main\b|var\s+Main\b|\{[^}]*\bMain\b[^}]*\})",
    )
    .expect("static regex")
});

#[allow(clippy::expect_used)]
static EXPORT_DEFAULT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)export\s+default\b").expect("static regex"));

/// How severe a finding is. A module with zero error-severity findings is
/// compliant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// One structural check result for one module.
#[derive(Debug, Clone, Copy)]
pub struct Finding {
    pub code: &'static str,
    pub severity: Severity,
}

/// Per-module section of the report.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleReport {
    pub id: String,
    pub has_frontend: bool,
    pub has_backend: bool,
    pub has_migrations_dir: bool,
    pub errors: Vec<&'static str>,
    pub warnings: Vec<&'static str>,
}

impl ModuleReport {
    pub fn is_compliant(&self) -> bool {
        self.errors.is_empty()
    }
}

/// The full compliance report.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceReport {
    pub ok: bool,
    pub modules: Vec<ModuleReport>,
    pub generated_at: String,
}

/// Scan every module under the root.
pub fn scan_modules(root: &Path) -> ComplianceReport {
    let modules: Vec<ModuleReport> = manifest::discover_modules(root)
        .iter()
        .map(scan_module)
        .collect();

    ComplianceReport {
        ok: modules.iter().all(ModuleReport::is_compliant),
        modules,
        generated_at: chrono::Utc::now().to_rfc3339(),
    }
}

/// Evaluate the fixed rule set against one discovered module.
pub fn scan_module(module: &DiscoveredModule) -> ModuleReport {
    let mut findings: Vec<Finding> = Vec::new();
    let mut push = |code: &'static str, severity: Severity| {
        findings.push(Finding { code, severity });
    };

    if !module.has_module_config {
        push(MISSING_MODULE_CONFIG, Severity::Error);
    }
    if !module.has_legacy_config {
        push(MISSING_MANIFEST, Severity::Error);
    }

    // Capability declarations; a module without a parseable manifest is
    // held to the full contract.
    let (declares_frontend, declares_backend, declares_migrations) = match &module.manifest {
        Some(m) => (
            m.declares_frontend,
            m.declares_backend,
            m.declares_migrations,
        ),
        None => (true, true, false),
    };

    let frontend_dir = module.frontend_dir();
    if declares_frontend {
        if !frontend_dir.is_dir() {
            push(MISSING_FRONTEND, Severity::Error);
        } else {
            match frontend_entry(&frontend_dir) {
                None => push(MISSING_FRONTEND_INDEX, Severity::Error),
                Some(entry) => {
                    let text = fs::read_to_string(&entry).unwrap_or_default();
                    if !EXPORT_MAIN_RE.is_match(&text) {
                        push(MISSING_EXPORT_MAIN, Severity::Error);
                    }
                    if !EXPORT_DEFAULT_RE.is_match(&text) {
                        push(MISSING_EXPORT_DEFAULT, Severity::Error);
                    }
                }
            }
        }
    }

    let backend_dir = module.backend_dir();
    if declares_backend && !backend_dir.is_dir() {
        push(MISSING_BACKEND, Severity::Error);
    }
    if backend_dir.is_dir() {
        if !backend_dir.join(BACKEND_ENTRY_FILE).is_file() {
            push(MISSING_BACKEND_INDEX, Severity::Error);
        }

        let sources = collect_backend_text(&backend_dir);
        if !sources.contains(&format!("/api/{}/ping", module.id)) {
            push(MISSING_PING, Severity::Error);
        }
        if sources.contains(&format!("/api/modules/{}/", module.id)) {
            push(LEGACY_PREFIX_REFS, Severity::Warning);
        }
    }

    if declares_migrations && !module.migrations_dir().is_dir() {
        push(MISSING_MIGRATIONS_DIR, Severity::Error);
    }

    ModuleReport {
        id: module.id.clone(),
        has_frontend: module.has_frontend,
        has_backend: module.has_backend,
        has_migrations_dir: module.migrations_dir().is_dir(),
        errors: findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
            .map(|f| f.code)
            .collect(),
        warnings: findings
            .iter()
            .filter(|f| f.severity == Severity::Warning)
            .map(|f| f.code)
            .collect(),
    }
}

/// Concatenate all backend source text for the contains-style heuristics.
fn collect_backend_text(dir: &Path) -> String {
    let mut out = String::new();
    collect_into(dir, &mut out);
    out
}

fn collect_into(dir: &Path, out: &mut String) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };

    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.is_dir() {
            collect_into(&path, out);
        } else if matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("js" | "cjs" | "mjs" | "ts")
        ) {
            if let Ok(text) = fs::read_to_string(&path) {
                out.push_str(&text);
                out.push('\n');
            }
        }
    }
}

/// Serialize the report.
pub fn render_report(report: &ComplianceReport, pretty: bool) -> Result<String> {
    let rendered = if pretty {
        serde_json::to_string_pretty(report)?
    } else {
        serde_json::to_string(report)?
    };
    Ok(rendered)
}

/// Write the report to disk.
pub fn write_report(report: &ComplianceReport, path: &Path, pretty: bool) -> Result<()> {
    let mut rendered = render_report(report, pretty)?;
    rendered.push('\n');
    fs::write(path, rendered)
        .with_context(|| format!("failed to write compliance report to {}", path.display()))?;
    Ok(())
}
