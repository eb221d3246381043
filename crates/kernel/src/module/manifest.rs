//! Module manifest parsing and directory discovery.
//!
//! Each module lives in its own directory under the modules root and
//! declares metadata in `module.config.json` (canonical) and/or
//! `config.json` (legacy UI manifest). A module with neither parseable file
//! is still discovered; the missing manifest is a compliance finding, not
//! a discovery failure, and one bad module never blocks its siblings.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

/// Canonical manifest file name.
pub const MODULE_CONFIG_FILE: &str = "module.config.json";

/// Legacy UI manifest file name.
pub const LEGACY_CONFIG_FILE: &str = "config.json";

/// Migrations directory, relative to the module root.
pub const MIGRATIONS_SUBDIR: &str = "db/migrations";

/// Backend entry file the structural contract expects.
pub const BACKEND_ENTRY_FILE: &str = "index.js";

/// Accepted frontend entry files, checked in order.
pub const FRONTEND_ENTRY_CANDIDATES: &[&str] =
    &["index.js", "index.jsx", "index.ts", "index.tsx"];

/// Infrastructure directories that are not modules.
const EXCLUDED_DIRS: &[&str] = &["shared", "node_modules", ".git"];

/// Canonical manifest: `module.config.json`.
#[derive(Debug, Clone, Deserialize)]
struct CanonicalManifest {
    name: String,
    #[serde(default)]
    version: String,
    /// Map of hook name to callback name, registered at install time.
    #[serde(default)]
    hooks: BTreeMap<String, String>,
    #[serde(default)]
    enabled: bool,
    /// Capability declarations. Frontend and backend default to declared;
    /// migrations default to not declared.
    frontend: Option<bool>,
    backend: Option<bool>,
    migrations: Option<bool>,
}

/// Legacy UI manifest: `config.json`. Only the fields the runtime consumes
/// are parsed; the UI-only fields (category, icon, order) pass through
/// untouched.
#[derive(Debug, Clone, Deserialize)]
struct LegacyManifest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "defaultActive")]
    default_active: Option<bool>,
}

/// Merged declarative metadata for one module.
#[derive(Debug, Clone)]
pub struct ModuleManifest {
    /// Module id: the directory name under the modules root.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Declared version.
    pub version: String,
    /// Hook name to callback name bindings.
    pub hooks: BTreeMap<String, String>,
    /// Whether the module participates in boot.
    pub enabled: bool,
    pub declares_frontend: bool,
    pub declares_backend: bool,
    pub declares_migrations: bool,
}

impl ModuleManifest {
    /// Version in its display form, capped at 8 characters.
    pub fn display_version(&self) -> &str {
        match self.version.char_indices().nth(8) {
            Some((idx, _)) => &self.version[..idx],
            None => &self.version,
        }
    }
}

/// One discovered module directory.
#[derive(Debug, Clone)]
pub struct DiscoveredModule {
    pub id: String,
    pub dir: PathBuf,
    /// `None` when neither manifest file parsed.
    pub manifest: Option<ModuleManifest>,
    /// Canonical manifest present and parseable.
    pub has_module_config: bool,
    /// Legacy manifest present and parseable.
    pub has_legacy_config: bool,
    /// `frontend/` exists and contains an entry file.
    pub has_frontend: bool,
    /// `backend/` directory exists.
    pub has_backend: bool,
}

impl DiscoveredModule {
    pub fn enabled(&self) -> bool {
        self.manifest.as_ref().is_some_and(|m| m.enabled)
    }

    pub fn frontend_dir(&self) -> PathBuf {
        self.dir.join("frontend")
    }

    pub fn backend_dir(&self) -> PathBuf {
        self.dir.join("backend")
    }

    pub fn migrations_dir(&self) -> PathBuf {
        self.dir.join(MIGRATIONS_SUBDIR)
    }
}

/// Locate a frontend entry file under `frontend/`, if any.
pub fn frontend_entry(frontend_dir: &Path) -> Option<PathBuf> {
    FRONTEND_ENTRY_CANDIDATES
        .iter()
        .map(|name| frontend_dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Discover all modules under the root directory, ordered by directory name.
///
/// Infrastructure directories are excluded; unreadable or malformed
/// manifests are logged and leave the module with `manifest: None`.
pub fn discover_modules(root: &Path) -> Vec<DiscoveredModule> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(root = %root.display(), error = %e, "failed to read modules directory");
            return Vec::new();
        }
    };

    let mut dirs: Vec<_> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .filter(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            !name.starts_with('.') && !EXCLUDED_DIRS.contains(&name.as_ref())
        })
        .collect();

    dirs.sort_by_key(|e| e.file_name());

    dirs.iter()
        .map(|entry| read_module_dir(&entry.path()))
        .collect()
}

/// Load a single module by id. Returns `None` when the directory does not
/// exist or is excluded.
pub fn load_module(root: &Path, id: &str) -> Option<DiscoveredModule> {
    if EXCLUDED_DIRS.contains(&id) || id.starts_with('.') {
        return None;
    }
    let dir = root.join(id);
    if !dir.is_dir() {
        return None;
    }
    Some(read_module_dir(&dir))
}

fn read_module_dir(dir: &Path) -> DiscoveredModule {
    let id = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let canonical: Option<CanonicalManifest> = parse_json(&dir.join(MODULE_CONFIG_FILE));
    let legacy: Option<LegacyManifest> = parse_json(&dir.join(LEGACY_CONFIG_FILE));

    let has_module_config = canonical.is_some();
    let has_legacy_config = legacy.is_some();
    let manifest = merge_manifests(&id, canonical, legacy);

    let has_frontend = {
        let frontend = dir.join("frontend");
        frontend.is_dir() && frontend_entry(&frontend).is_some()
    };
    let has_backend = dir.join("backend").is_dir();

    DiscoveredModule {
        id,
        dir: dir.to_path_buf(),
        manifest,
        has_module_config,
        has_legacy_config,
        has_frontend,
        has_backend,
    }
}

/// Parse a JSON manifest file. Missing files and parse errors both produce
/// `None`; the difference only matters to the compliance scanner, which
/// treats either as an absent manifest.
fn parse_json<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let content = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring malformed manifest");
            None
        }
    }
}

fn merge_manifests(
    id: &str,
    canonical: Option<CanonicalManifest>,
    legacy: Option<LegacyManifest>,
) -> Option<ModuleManifest> {
    match (canonical, legacy) {
        (Some(c), _) => Some(ModuleManifest {
            id: id.to_string(),
            name: c.name,
            version: c.version,
            hooks: c.hooks,
            enabled: c.enabled,
            declares_frontend: c.frontend.unwrap_or(true),
            declares_backend: c.backend.unwrap_or(true),
            declares_migrations: c.migrations.unwrap_or(false),
        }),
        (None, Some(l)) => Some(ModuleManifest {
            id: id.to_string(),
            name: l.name.unwrap_or_else(|| id.to_string()),
            version: String::new(),
            hooks: BTreeMap::new(),
            enabled: l.default_active.unwrap_or(false),
            declares_frontend: true,
            declares_backend: true,
            declares_migrations: false,
        }),
        (None, None) => None,
    }
}
