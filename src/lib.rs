//! Crabby🦀 permission engine for plugin hosts.
//!
//! Permissions are addressed as `<domain>::<path>` where the domain is the host
//! core (`core`), the framework itself (`framework`) or a loaded module's prefix.
//! Users and groups are assigned [`PermissionBranch`]es: absolute paths, trailing
//! wildcards (`build::place.*`) or the superuser branch (`*`), each additive or
//! subtractive (`-build::place.wall`).
//!
//! Resolution scans a user's direct branches newest-first, then each of the
//! user's groups the same way. The first decisive match wins, so the most recently
//! added branch beats an older one no matter how specific either is.
//!
//! Handlers for the catalog and for per-user storage can be swapped at runtime on
//! the [`PermissionManager`]; a handler failing to initialize is rolled back.
//!
//! Example usage:
//!```
//! use permcrab::*;
//!
//! declare_permissions! {
//!     /// Building permissions
//!     pub permissions Build {
//!         PLACE_WALL = "place.wall" => "Place walls",
//!         PLACE_FLOOR = "place.floor" => "Place floors",
//!         DESTROY_WALL = "destroy.wall" => "Destroy walls",
//!     }
//! }
//!
//! let storage = tempfile::tempdir().unwrap();
//! let config = ManagerConfig {
//!     storage_dir: storage.path().to_path_buf(),
//!     ..Default::default()
//! };
//! let manager = PermissionManager::builder().config(config).build().unwrap();
//!
//! // Each module registers its prefix and declares its permissions at load time.
//! let build = manager.load_module("Build", "build").unwrap();
//! manager.register_permissions(Build::declare(&build));
//!
//! let user = UserId(76561198000000001);
//! let place_wall = manager.parse_leaf("build::place.wall").unwrap();
//! let place_floor = manager.parse_leaf("build::place.floor").unwrap();
//! assert!(!manager.has(&place_wall, &user));
//!
//! manager.add_permission(user, manager.parse_branch("build::place.*").unwrap());
//! manager.add_permission(user, manager.parse_branch("-build::place.wall").unwrap());
//!
//! // Newest branch wins: the subtractive wall entry overrides the wildcard.
//! assert!(!manager.has(&place_wall, &user));
//! assert!(manager.has(&place_floor, &user));
//! assert!(manager.require(&place_wall, &user).is_err());
//!```
use std::fmt;

use serde::{Deserialize, Serialize};

mod branch;
mod catalog;
mod codec;
mod config;
mod domain;
mod error;
mod events;
mod group;
mod leaf;
mod r#macro;
mod permission;
mod resolve;
mod service;
mod store;

pub use branch::{PermissionBranch, PermissionMode, SUPERUSER_TOKEN, UnresolvedBranch};
pub use catalog::{CatalogHandler, DefaultCatalogHandler};
pub use config::ManagerConfig;
pub use domain::{CORE_PREFIX, Domain, FRAMEWORK_PREFIX, ModuleInfo, ModuleRegistry, UNRECOGNIZED_DOMAIN};
pub use error::{
    ConfigError, DecodeError, GroupConfigError, HandlerError, MissingPermission, ParseError,
    PartialPermission, RegistryError,
};
pub use events::{EventHub, PermissionEvent, SubscriptionId};
pub use group::{Color, GroupConfig, PermissionGroup};
pub use leaf::{DOMAIN_SEPARATOR, PermissionLeaf};
pub use permission::Permission;
pub use resolve::resolve;
pub use service::{PermissionManager, PermissionManagerBuilder};
pub use store::{FileUserPermissionHandler, USER_RECORD_VERSION, UserPermissionHandler};

/// Identifier of a user of the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Anything permissions can be checked for (a connected player, a console, an offline id).
pub trait PermissionSubject {
    fn user_id(&self) -> UserId;

    /// Host-level admin flag. Admins are superusers when
    /// [`ManagerConfig::admins_are_superuser`] is set.
    fn is_admin(&self) -> bool {
        false
    }
}

impl PermissionSubject for UserId {
    fn user_id(&self) -> UserId {
        *self
    }
}

/// Lifecycle shared by every swappable handler.
pub trait Handler: Send + Sync {
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Called when the handler becomes active. An error aborts the swap.
    fn init(&self) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Called when the handler is replaced or its activation fails.
    fn dispose(&self) {}

    /// Called after a module is loaded so stored entries naming its prefix can resolve.
    fn modules_changed(&self) {}

    fn events(&self) -> &EventHub;
}
