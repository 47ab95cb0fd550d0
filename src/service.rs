use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, ThreadId},
};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::{
    CatalogHandler, DefaultCatalogHandler, Domain, EventHub, FileUserPermissionHandler, Handler,
    HandlerError, ManagerConfig, MissingPermission, ModuleRegistry, ParseError, Permission,
    PermissionBranch, PermissionGroup, PermissionLeaf, PermissionSubject, RegistryError,
    SubscriptionId, UserId, UserPermissionHandler, resolve,
};

/// An active (or activating) handler and its event forwarding.
struct HandlerSlot<H: ?Sized> {
    handler: Arc<H>,
    initialized: AtomicBool,
    forward: Mutex<Option<SubscriptionId>>,
}

impl<H: ?Sized> HandlerSlot<H> {
    fn new(handler: Arc<H>) -> Self {
        HandlerSlot {
            handler,
            initialized: AtomicBool::new(false),
            forward: Mutex::new(None),
        }
    }
}

fn same_handler<H: ?Sized>(a: &Arc<H>, b: &Arc<H>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// PermissionManager - answers "does this user have this permission?" and owns
/// the active catalog and user-storage handlers.
///
/// Handlers can be replaced at runtime with [.set_catalog_handler()][PermissionManager#method.set_catalog_handler]
/// and [.set_user_handler()][PermissionManager#method.set_user_handler]. Every mutation and every
/// swap must happen on the thread that built the manager; checks may run anywhere.
pub struct PermissionManager {
    config: ManagerConfig,
    modules: Arc<ModuleRegistry>,
    catalog: ArcSwap<HandlerSlot<dyn CatalogHandler>>,
    users: ArcSwap<HandlerSlot<dyn UserPermissionHandler>>,
    swap_lock: Mutex<()>,
    events: Arc<EventHub>,
    main_thread: ThreadId,
}

/// PermissionManagerBuilder - used when you create [PermissionManager].
/// Handlers not provided fall back to [DefaultCatalogHandler] and [FileUserPermissionHandler]
/// configured from [ManagerConfig].
#[derive(Default)]
pub struct PermissionManagerBuilder {
    config: ManagerConfig,
    modules: Option<Arc<ModuleRegistry>>,
    catalog: Option<Arc<dyn CatalogHandler>>,
    users: Option<Arc<dyn UserPermissionHandler>>,
}

impl PermissionManagerBuilder {
    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Shares an existing module registry. Custom handlers must use the same one.
    pub fn modules(mut self, modules: Arc<ModuleRegistry>) -> Self {
        self.modules = Some(modules);
        self
    }

    pub fn catalog_handler(mut self, handler: Arc<dyn CatalogHandler>) -> Self {
        self.catalog = Some(handler);
        self
    }

    pub fn user_handler(mut self, handler: Arc<dyn UserPermissionHandler>) -> Self {
        self.users = Some(handler);
        self
    }

    /// Builds the manager on the current thread, which becomes its main thread,
    /// and initializes both handlers.
    pub fn build(self) -> Result<PermissionManager, HandlerError> {
        let modules = self.modules.unwrap_or_default();
        let catalog: Arc<dyn CatalogHandler> = match self.catalog {
            Some(catalog) => catalog,
            None => {
                let mut catalog = DefaultCatalogHandler::new(modules.clone());
                if let Some(path) = &self.config.groups_file {
                    catalog = catalog.with_groups_file(path);
                }
                Arc::new(catalog)
            }
        };
        let users: Arc<dyn UserPermissionHandler> = match self.users {
            Some(users) => users,
            None => Arc::new(FileUserPermissionHandler::new(
                &self.config.storage_dir,
                modules.clone(),
            )),
        };

        let manager = PermissionManager {
            config: self.config,
            modules,
            catalog: ArcSwap::from_pointee(HandlerSlot::new(catalog.clone())),
            users: ArcSwap::from_pointee(HandlerSlot::new(users.clone())),
            swap_lock: Mutex::new(()),
            events: Arc::new(EventHub::new()),
            main_thread: thread::current().id(),
        };
        manager.set_catalog_handler(catalog)?;
        manager.set_user_handler(users)?;
        Ok(manager)
    }
}

impl PermissionManager {
    /// Creates builder ([PermissionManagerBuilder]) for [PermissionManager]
    pub fn builder() -> PermissionManagerBuilder {
        PermissionManagerBuilder::default()
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn modules(&self) -> &Arc<ModuleRegistry> {
        &self.modules
    }

    /// Events of whichever handlers are active, stable across swaps.
    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub fn catalog(&self) -> Arc<dyn CatalogHandler> {
        self.catalog.load().handler.clone()
    }

    pub fn user_handler(&self) -> Arc<dyn UserPermissionHandler> {
        self.users.load().handler.clone()
    }

    fn assert_main_thread(&self) {
        assert_eq!(
            thread::current().id(),
            self.main_thread,
            "permission handlers may only be mutated or swapped on the thread that built the manager"
        );
    }

    /// Replaces the catalog handler. On init failure the previous handler stays active.
    ///
    /// # Panics
    /// When called off the manager's main thread.
    pub fn set_catalog_handler(&self, handler: Arc<dyn CatalogHandler>) -> Result<(), HandlerError> {
        self.swap_handler("catalog", &self.catalog, handler)
    }

    /// Replaces the user permission handler. On init failure the previous handler stays active.
    ///
    /// # Panics
    /// When called off the manager's main thread.
    pub fn set_user_handler(&self, handler: Arc<dyn UserPermissionHandler>) -> Result<(), HandlerError> {
        self.swap_handler("user", &self.users, handler)
    }

    fn swap_handler<H>(
        &self,
        kind: &'static str,
        slot: &ArcSwap<HandlerSlot<H>>,
        handler: Arc<H>,
    ) -> Result<(), HandlerError>
    where
        H: Handler + ?Sized,
    {
        self.assert_main_thread();
        let _guard = self.swap_lock.lock();

        let next = Arc::new(HandlerSlot::new(handler));
        let previous = slot.swap(next.clone());

        if let Err(err) = next.handler.init() {
            error!(kind, handler = next.handler.name(), error = %err, "handler failed to initialize, rolling back");
            let current = slot.compare_and_swap(&next, previous.clone());
            if !Arc::ptr_eq(&*current, &next) {
                warn!(kind, "handler was swapped concurrently, rollback skipped");
            }
            next.handler.dispose();
            return Err(err);
        }
        next.initialized.store(true, Ordering::Release);

        if let Some(id) = previous.forward.lock().take() {
            previous.handler.events().unsubscribe(id);
        }
        if !same_handler(&previous.handler, &next.handler)
            && previous.initialized.load(Ordering::Acquire)
        {
            previous.handler.dispose();
        }

        let events = self.events.clone();
        let id = next.handler.events().subscribe(move |event| events.emit(event));
        *next.forward.lock() = Some(id);

        info!(kind, handler = next.handler.name(), "permission handler activated");
        Ok(())
    }

    /// Registers a module's prefix, then lets both handlers pick up stored
    /// entries that were waiting for it.
    pub fn load_module(&self, name: &str, prefix: &str) -> Result<Domain, RegistryError> {
        self.assert_main_thread();
        let domain = self.modules.load(name, prefix)?;
        self.catalog().modules_changed();
        self.user_handler().modules_changed();
        Ok(domain)
    }

    pub fn parse_leaf(&self, text: &str) -> Result<PermissionLeaf, ParseError> {
        PermissionLeaf::parse(text, &self.modules)
    }

    pub fn parse_branch(&self, text: &str) -> Result<PermissionBranch, ParseError> {
        PermissionBranch::parse(text, &self.modules)
    }

    /// Checks `leaf` for `subject`, honoring superuser grants.
    pub fn has(&self, leaf: &PermissionLeaf, subject: &impl PermissionSubject) -> bool {
        self.has_with(leaf, subject, true)
    }

    /// Checks `leaf` for `subject`.
    ///
    /// With `check_superuser` off, admin status and superuser branches are ignored
    /// and an invalid leaf is denied outright.
    pub fn has_with(
        &self,
        leaf: &PermissionLeaf,
        subject: &impl PermissionSubject,
        check_superuser: bool,
    ) -> bool {
        if check_superuser && self.config.admins_are_superuser && subject.is_admin() {
            return true;
        }

        let user = subject.user_id();
        let direct = self.permissions(user, false);
        let groups = self.permission_groups(user, false);
        let lists: Vec<&[PermissionBranch]> = groups.iter().map(|g| g.branches()).collect();
        resolve(leaf, &direct, &lists, check_superuser)
    }

    /// Checks a catalog entry.
    pub fn has_permission(&self, permission: &Permission, subject: &impl PermissionSubject) -> bool {
        self.has(&permission.leaf(), subject)
    }

    /// Like [.has()][PermissionManager#method.has], but a denial is an error.
    pub fn require(
        &self,
        leaf: &PermissionLeaf,
        subject: &impl PermissionSubject,
    ) -> Result<(), MissingPermission> {
        if self.has(leaf, subject) {
            Ok(())
        } else {
            Err(MissingPermission { leaf: leaf.clone() })
        }
    }

    pub fn connect(&self, user: UserId) {
        self.assert_main_thread();
        self.user_handler().connect(user);
    }

    pub fn disconnect(&self, user: UserId) {
        self.assert_main_thread();
        self.user_handler().disconnect(user);
    }

    pub fn permissions(&self, user: UserId, force_reload: bool) -> Vec<PermissionBranch> {
        self.user_handler().permissions(user, force_reload)
    }

    /// Groups assigned to `user` that the catalog knows, in assignment order.
    pub fn permission_groups(&self, user: UserId, force_reload: bool) -> Vec<Arc<PermissionGroup>> {
        let catalog = self.catalog();
        self.user_handler()
            .permission_groups(user, force_reload)
            .iter()
            .filter_map(|id| catalog.find_permission_group(id))
            .collect()
    }

    pub fn add_permission(&self, user: UserId, branch: PermissionBranch) -> bool {
        self.assert_main_thread();
        self.user_handler().add_permission(user, branch)
    }

    pub fn remove_permission(&self, user: UserId, branch: &PermissionBranch) -> bool {
        self.assert_main_thread();
        self.user_handler().remove_permission(user, branch)
    }

    pub fn clear_permissions(&self, user: UserId) -> bool {
        self.assert_main_thread();
        self.user_handler().clear_permissions(user)
    }

    pub fn add_permission_group(&self, user: UserId, group: &PermissionGroup) -> bool {
        self.assert_main_thread();
        self.user_handler().add_permission_group(user, group.id())
    }

    pub fn remove_permission_group(&self, user: UserId, group: &PermissionGroup) -> bool {
        self.assert_main_thread();
        self.user_handler().remove_permission_group(user, group.id())
    }

    /// Registers the permissions a module declared, usually via
    /// [`declare_permissions!`](crate::declare_permissions).
    pub fn register_permissions(&self, permissions: Vec<Permission>) {
        self.assert_main_thread();
        self.catalog().register_permissions(permissions);
    }

    pub fn find_permission(&self, domain: &Domain, id: &str) -> Option<Permission> {
        self.catalog().find_permission(domain, id)
    }

    pub fn find_permission_group(&self, id: &str) -> Option<Arc<PermissionGroup>> {
        self.catalog().find_permission_group(id)
    }

    pub fn register_permission_group(&self, group: PermissionGroup) -> bool {
        self.assert_main_thread();
        self.catalog().register_permission_group(group)
    }

    pub fn deregister_permission_group(&self, id: &str) -> bool {
        self.assert_main_thread();
        self.catalog().deregister_permission_group(id)
    }

    pub fn add_permission_to_group(&self, id: &str, branch: PermissionBranch) -> bool {
        self.assert_main_thread();
        self.catalog().add_permission_to_group(id, branch)
    }

    pub fn remove_permission_from_group(&self, id: &str, branch: &PermissionBranch) -> bool {
        self.assert_main_thread();
        self.catalog().remove_permission_from_group(id, branch)
    }
}
