use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use parking_lot::RwLock;
use tracing::debug;

use crate::error::RegistryError;

/// Prefix of the host application's own permissions.
pub const CORE_PREFIX: &str = "core";
/// Prefix of permissions declared by the plugin framework itself.
pub const FRAMEWORK_PREFIX: &str = "framework";
/// Rendered in place of a prefix when an identifier has no domain.
pub const UNRECOGNIZED_DOMAIN: &str = "unrecognized-domain";

/// A loaded module that owns a permission namespace.
#[derive(Debug, PartialEq, Eq)]
pub struct ModuleInfo {
    pub name: String,
    pub prefix: String,
}

/// Namespace owner of a permission path.
///
/// Module domains compare by prefix, case-insensitively.
#[derive(Debug, Clone)]
pub enum Domain {
    Core,
    Framework,
    Module(Arc<ModuleInfo>),
}

impl Domain {
    pub fn prefix(&self) -> &str {
        match self {
            Domain::Core => CORE_PREFIX,
            Domain::Framework => FRAMEWORK_PREFIX,
            Domain::Module(module) => &module.prefix,
        }
    }

    pub fn module(&self) -> Option<&Arc<ModuleInfo>> {
        match self {
            Domain::Module(module) => Some(module),
            _ => None,
        }
    }
}

impl PartialEq for Domain {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Domain::Core, Domain::Core) | (Domain::Framework, Domain::Framework) => true,
            (Domain::Module(a), Domain::Module(b)) => a.prefix.eq_ignore_ascii_case(&b.prefix),
            _ => false,
        }
    }
}

impl Eq for Domain {}

impl Hash for Domain {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Domain::Core => 0u8.hash(state),
            Domain::Framework => 1u8.hash(state),
            Domain::Module(module) => {
                2u8.hash(state);
                hash_ignore_case(&module.prefix, state);
            }
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

pub(crate) fn hash_ignore_case<H: Hasher>(value: &str, state: &mut H) {
    for byte in value.bytes() {
        state.write_u8(byte.to_ascii_lowercase());
    }
    state.write_u8(0xff);
}

/// Modules currently loaded into the host, keyed by their unique prefix.
///
/// Text and binary decoding resolve prefixes against this registry.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: RwLock<Vec<Arc<ModuleInfo>>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a module and returns its domain.
    pub fn load(&self, name: &str, prefix: &str) -> Result<Domain, RegistryError> {
        if !is_valid_prefix(prefix)
            || prefix.eq_ignore_ascii_case(CORE_PREFIX)
            || prefix.eq_ignore_ascii_case(FRAMEWORK_PREFIX)
        {
            return Err(RegistryError::InvalidPrefix(prefix.to_string()));
        }

        let mut modules = self.modules.write();
        if modules.iter().any(|m| m.prefix.eq_ignore_ascii_case(prefix)) {
            return Err(RegistryError::DuplicatePrefix(prefix.to_string()));
        }

        let module = Arc::new(ModuleInfo {
            name: name.to_string(),
            prefix: prefix.to_string(),
        });
        modules.push(module.clone());
        debug!(module = name, prefix, "module loaded");
        Ok(Domain::Module(module))
    }

    /// Removes a module. Identifiers already holding its domain keep rendering its prefix.
    pub fn unload(&self, prefix: &str) -> Option<Arc<ModuleInfo>> {
        let mut modules = self.modules.write();
        let index = modules
            .iter()
            .position(|m| m.prefix.eq_ignore_ascii_case(prefix))?;
        let module = modules.remove(index);
        debug!(module = %module.name, prefix = %module.prefix, "module unloaded");
        Some(module)
    }

    /// Resolves a prefix: core, then framework, then loaded modules.
    pub fn resolve(&self, prefix: &str) -> Option<Domain> {
        if prefix.eq_ignore_ascii_case(CORE_PREFIX) {
            return Some(Domain::Core);
        }
        if prefix.eq_ignore_ascii_case(FRAMEWORK_PREFIX) {
            return Some(Domain::Framework);
        }
        self.modules
            .read()
            .iter()
            .find(|m| m.prefix.eq_ignore_ascii_case(prefix))
            .map(|m| Domain::Module(m.clone()))
    }

    pub fn modules(&self) -> Vec<Arc<ModuleInfo>> {
        self.modules.read().clone()
    }
}

fn is_valid_prefix(prefix: &str) -> bool {
    !prefix.is_empty()
        && prefix.is_ascii()
        && !prefix.contains("::")
        && !prefix
            .chars()
            .any(|c| c == '.' || c == '*' || c.is_whitespace())
        && !prefix.starts_with(['+', '-'])
}
