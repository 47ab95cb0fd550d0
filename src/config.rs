use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Settings of a [`PermissionManager`](crate::PermissionManager) and its default handlers.
///
/// Missing keys take their defaults, unknown keys are ignored:
///
/// ```json
/// { "admins_are_superuser": false, "storage_dir": "data/permissions",
///   "groups_file": "data/permission_groups.json" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Host admins pass every check without consulting the permission store.
    pub admins_are_superuser: bool,
    /// Directory of the default per-user permission files.
    pub storage_dir: PathBuf,
    /// JSON array of groups loaded and saved by the default catalog.
    pub groups_file: Option<PathBuf>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            admins_are_superuser: true,
            storage_dir: PathBuf::from("permissions"),
            groups_file: None,
        }
    }
}

impl ManagerConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }
}
