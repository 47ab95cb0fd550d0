use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::RwLock;
use tracing::{debug, error, info};

use crate::{
    Domain, EventHub, Handler, HandlerError, ModuleRegistry, Permission, PermissionBranch,
    PermissionEvent, PermissionGroup, group::GroupConfig,
};

/// Owns the declared [`Permission`]s and the registered [`PermissionGroup`]s.
pub trait CatalogHandler: Handler {
    /// Adds the permissions a module declares at load time. Re-declared entries are replaced.
    fn register_permissions(&self, permissions: Vec<Permission>);

    fn permissions(&self) -> Vec<Permission>;

    fn find_permission(&self, domain: &Domain, id: &str) -> Option<Permission>;

    /// Groups in registration order.
    fn permission_groups(&self) -> Vec<Arc<PermissionGroup>>;

    fn find_permission_group(&self, id: &str) -> Option<Arc<PermissionGroup>>;

    /// Returns `false` if a group with the same id is already registered.
    fn register_permission_group(&self, group: PermissionGroup) -> bool;

    /// Fires [`PermissionEvent::GroupDeregistered`] before removing the group.
    fn deregister_permission_group(&self, id: &str) -> bool;

    fn add_permission_to_group(&self, id: &str, branch: PermissionBranch) -> bool;

    fn remove_permission_from_group(&self, id: &str, branch: &PermissionBranch) -> bool;
}

/// In-memory catalog, optionally backed by a JSON file of groups.
pub struct DefaultCatalogHandler {
    modules: Arc<ModuleRegistry>,
    groups_file: Option<PathBuf>,
    permissions: RwLock<Vec<Permission>>,
    groups: RwLock<Vec<Arc<PermissionGroup>>>,
    events: EventHub,
}

impl DefaultCatalogHandler {
    pub fn new(modules: Arc<ModuleRegistry>) -> Self {
        DefaultCatalogHandler {
            modules,
            groups_file: None,
            permissions: RwLock::new(Vec::new()),
            groups: RwLock::new(Vec::new()),
            events: EventHub::new(),
        }
    }

    /// Loads groups from `path` on init and rewrites it after every group change.
    pub fn with_groups_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.groups_file = Some(path.into());
        self
    }

    fn load_groups(&self, path: &Path) -> Result<(), HandlerError> {
        let json = match fs::read_to_string(path) {
            Ok(json) => json,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no group file, starting empty");
                return Ok(());
            }
            Err(source) => {
                return Err(HandlerError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let loaded = PermissionGroup::list_from_json(&json, &self.modules)?;
        let mut groups = self.groups.write();
        for group in loaded {
            if groups.iter().any(|g| g.id().eq_ignore_ascii_case(group.id())) {
                continue;
            }
            groups.push(Arc::new(group));
        }
        info!(path = %path.display(), count = groups.len(), "loaded permission groups");
        Ok(())
    }

    fn save_groups(&self) {
        let Some(path) = &self.groups_file else {
            return;
        };
        let configs: Vec<GroupConfig> = self.groups.read().iter().map(|g| g.to_config()).collect();
        let result = serde_json::to_string_pretty(&configs)
            .map_err(io::Error::other)
            .and_then(|json| fs::write(path, json));
        if let Err(err) = result {
            error!(path = %path.display(), error = %err, "failed to save permission groups");
        }
    }

    /// Applies `change` to a copy of the group and publishes the result.
    fn update_group<F>(&self, id: &str, change: F) -> bool
    where
        F: FnOnce(&mut PermissionGroup) -> bool,
    {
        let updated = {
            let mut groups = self.groups.write();
            let Some(group) = groups.iter_mut().find(|g| g.id().eq_ignore_ascii_case(id)) else {
                return false;
            };
            let mut copy = (**group).clone();
            if !change(&mut copy) {
                return false;
            }
            *group = Arc::new(copy);
            group.clone()
        };
        self.events.emit(&PermissionEvent::GroupUpdated(updated));
        self.save_groups();
        true
    }
}

impl Handler for DefaultCatalogHandler {
    fn init(&self) -> Result<(), HandlerError> {
        match &self.groups_file {
            Some(path) => self.load_groups(path),
            None => Ok(()),
        }
    }

    fn events(&self) -> &EventHub {
        &self.events
    }

    fn modules_changed(&self) {
        let pending: Vec<String> = self
            .groups
            .read()
            .iter()
            .filter(|g| !g.unresolved().is_empty())
            .map(|g| g.id().to_string())
            .collect();
        for id in pending {
            if self.update_group(&id, |group| group.resolve_pending(&self.modules)) {
                debug!(group = %id, "resolved entries of a newly loaded module");
            }
        }
    }
}

impl CatalogHandler for DefaultCatalogHandler {
    fn register_permissions(&self, permissions: Vec<Permission>) {
        let mut known = self.permissions.write();
        for permission in permissions {
            known.retain(|p| p != &permission);
            known.push(permission);
        }
    }

    fn permissions(&self) -> Vec<Permission> {
        self.permissions.read().clone()
    }

    fn find_permission(&self, domain: &Domain, id: &str) -> Option<Permission> {
        self.permissions
            .read()
            .iter()
            .find(|p| p.domain() == domain && p.id().eq_ignore_ascii_case(id))
            .cloned()
    }

    fn permission_groups(&self) -> Vec<Arc<PermissionGroup>> {
        self.groups.read().clone()
    }

    fn find_permission_group(&self, id: &str) -> Option<Arc<PermissionGroup>> {
        self.groups
            .read()
            .iter()
            .find(|g| g.id().eq_ignore_ascii_case(id))
            .cloned()
    }

    fn register_permission_group(&self, group: PermissionGroup) -> bool {
        let group = {
            let mut groups = self.groups.write();
            if groups.iter().any(|g| g.id().eq_ignore_ascii_case(group.id())) {
                return false;
            }
            let group = Arc::new(group);
            groups.push(group.clone());
            group
        };
        debug!(group = group.id(), "permission group registered");
        self.events.emit(&PermissionEvent::GroupRegistered(group));
        self.save_groups();
        true
    }

    fn deregister_permission_group(&self, id: &str) -> bool {
        let Some(group) = self.find_permission_group(id) else {
            return false;
        };
        self.events.emit(&PermissionEvent::GroupDeregistered(group.clone()));
        self.groups.write().retain(|g| !g.id().eq_ignore_ascii_case(group.id()));
        debug!(group = group.id(), "permission group deregistered");
        self.save_groups();
        true
    }

    fn add_permission_to_group(&self, id: &str, branch: PermissionBranch) -> bool {
        self.update_group(id, |group| group.add_permission(branch))
    }

    fn remove_permission_from_group(&self, id: &str, branch: &PermissionBranch) -> bool {
        self.update_group(id, |group| group.remove_permission(branch))
    }
}
