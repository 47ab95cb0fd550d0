use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use crate::{
    domain::{Domain, ModuleInfo, hash_ignore_case},
    leaf::{DOMAIN_SEPARATOR, PermissionLeaf},
};

/// A capability advertised by the core, the framework or a module.
///
/// This is a catalog entry, not an assignment. The description is display
/// metadata and takes no part in equality.
#[derive(Debug, Clone)]
pub struct Permission {
    domain: Domain,
    id: String,
    description: Option<String>,
}

impl Permission {
    pub fn new(domain: Domain, id: &str) -> Self {
        Permission {
            domain,
            id: id.to_string(),
            description: None,
        }
    }

    pub fn core(id: &str) -> Self {
        Self::new(Domain::Core, id)
    }

    pub fn framework(id: &str) -> Self {
        Self::new(Domain::Framework, id)
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn module(&self) -> Option<&Arc<ModuleInfo>> {
        self.domain.module()
    }

    pub fn is_core(&self) -> bool {
        matches!(self.domain, Domain::Core)
    }

    pub fn is_framework(&self) -> bool {
        matches!(self.domain, Domain::Framework)
    }

    /// Leaf checked when gating on this permission. A malformed id yields the
    /// Nil leaf, which only a superuser can satisfy.
    pub fn leaf(&self) -> PermissionLeaf {
        PermissionLeaf::new(self.domain.clone(), &self.id).unwrap_or_default()
    }
}

impl PartialEq for Permission {
    fn eq(&self, other: &Self) -> bool {
        self.domain == other.domain && self.id.eq_ignore_ascii_case(&other.id)
    }
}

impl Eq for Permission {}

impl Hash for Permission {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.domain.hash(state);
        hash_ignore_case(&self.id, state);
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}{}", self.domain, DOMAIN_SEPARATOR, self.id)
    }
}
