//! Compiled-in module registry.
//!
//! Modules are resolved by id from a registry populated at host startup,
//! rather than loaded from paths at runtime. A discovered module with no
//! registered implementation is data-only: its migrations and hook
//! bindings still apply, but it has no lifecycle or hook behavior.

use std::collections::HashMap;
use std::sync::Arc;

use bottega_sdk::ModuleHooks;
use tracing::warn;

/// Registry mapping module id to its compiled-in implementation.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, Arc<dyn ModuleHooks>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module implementation under its own id. Re-registering an
    /// id replaces the previous implementation.
    pub fn register(&mut self, module: Arc<dyn ModuleHooks>) {
        let id = module.id().to_string();
        if self.modules.insert(id.clone(), module).is_some() {
            warn!(module = %id, "replacing previously registered module implementation");
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ModuleHooks>> {
        self.modules.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.modules.contains_key(id)
    }

    /// Registered ids, sorted for deterministic iteration.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.modules.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
