use std::{
    collections::HashMap,
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, warn};

use crate::{
    EventHub, Handler, HandlerError, ModuleRegistry, PermissionBranch, PermissionEvent,
    UnresolvedBranch, UserId, codec,
    error::DecodeError,
    group::{add_replacing, resolve_pending},
};

/// Version written at the head of every user file.
///
/// Version 1 holds direct branches only; version 2 appends group memberships.
pub const USER_RECORD_VERSION: u8 = 2;

/// Owns per-user direct branches and group memberships.
///
/// Direct branches keep insertion order: the newest matching branch decides a
/// check. Every mutation is persisted before it returns.
pub trait UserPermissionHandler: Handler {
    /// Starts caching `user`'s record in memory.
    fn connect(&self, _user: UserId) {}

    /// Drops `user`'s cached record, saving it first if needed.
    fn disconnect(&self, _user: UserId) {}

    /// Direct branches, oldest first. Offline users are always read from storage.
    fn permissions(&self, user: UserId, force_reload: bool) -> Vec<PermissionBranch>;

    /// Group ids in assignment order.
    fn permission_groups(&self, user: UserId, force_reload: bool) -> Vec<String>;

    /// Appends `branch`, replacing an entry with the same pattern and another mode.
    fn add_permission(&self, user: UserId, branch: PermissionBranch) -> bool;

    fn remove_permission(&self, user: UserId, branch: &PermissionBranch) -> bool;

    /// Removes every direct branch of `user`.
    fn clear_permissions(&self, user: UserId) -> bool;

    fn add_permission_group(&self, user: UserId, group: &str) -> bool;

    fn remove_permission_group(&self, user: UserId, group: &str) -> bool;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct UserRecord {
    pub(crate) branches: Vec<PermissionBranch>,
    /// Branches of modules that are not loaded, written back as they were read.
    pub(crate) unresolved: Vec<UnresolvedBranch>,
    pub(crate) groups: Vec<String>,
}

impl UserRecord {
    pub(crate) fn encode(&self) -> io::Result<Vec<u8>> {
        let mut buf = vec![USER_RECORD_VERSION];
        codec::write_count(&mut buf, self.branches.len() + self.unresolved.len())?;
        for branch in &self.branches {
            branch.write_to(&mut buf)?;
        }
        for pending in &self.unresolved {
            pending.write_to(&mut buf)?;
        }
        codec::write_count(&mut buf, self.groups.len())?;
        for group in &self.groups {
            codec::write_string(&mut buf, group)?;
        }
        Ok(buf)
    }

    /// Decodes as much of a record as is valid. A bad version yields an empty
    /// record; a corrupt tail is dropped and everything before it kept.
    pub(crate) fn decode(mut reader: impl Read, modules: &ModuleRegistry) -> Self {
        let mut record = UserRecord::default();
        if let Err(err) = record.decode_into(&mut reader, modules) {
            warn!(error = %err, kept = record.branches.len(), "user permission record truncated");
        }
        record
    }

    fn decode_into<R: Read>(&mut self, reader: &mut R, modules: &ModuleRegistry) -> Result<(), DecodeError> {
        let version = codec::read_u8(reader)?;
        if version == 0 || version > USER_RECORD_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }

        let count = codec::read_count(reader)?;
        for _ in 0..count {
            match PermissionBranch::read_from(reader, modules) {
                Ok(branch) => self.branches.push(branch),
                Err(DecodeError::Parse(err)) => {
                    let pending = UnresolvedBranch::from_parse_error(err)?;
                    debug!(prefix = pending.prefix(), "keeping branch of a module that is not loaded");
                    self.unresolved.push(pending);
                }
                Err(err) => return Err(err),
            }
        }

        if version >= 2 {
            let count = codec::read_count(reader)?;
            for _ in 0..count {
                self.groups.push(codec::read_string(reader)?);
            }
        }
        Ok(())
    }

    /// Moves unresolved branches whose module is now loaded into `branches`.
    pub(crate) fn resolve_pending(&mut self, modules: &ModuleRegistry) -> bool {
        resolve_pending(&mut self.branches, &mut self.unresolved, modules)
    }
}

#[derive(Debug)]
struct Session {
    record: UserRecord,
    dirty: bool,
}

/// Default handler: one binary file per user under a storage directory.
///
/// Connected users are served from an in-memory session; everyone else is
/// read from disk on every call. Files are always rewritten whole.
pub struct FileUserPermissionHandler {
    root: PathBuf,
    modules: Arc<ModuleRegistry>,
    sessions: RwLock<HashMap<UserId, Session>>,
    read_lock: Mutex<()>,
    write_lock: Mutex<()>,
    events: EventHub,
}

impl FileUserPermissionHandler {
    pub fn new(root: impl Into<PathBuf>, modules: Arc<ModuleRegistry>) -> Self {
        FileUserPermissionHandler {
            root: root.into(),
            modules,
            sessions: RwLock::new(HashMap::new()),
            read_lock: Mutex::new(()),
            write_lock: Mutex::new(()),
            events: EventHub::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, user: UserId) -> PathBuf {
        self.root.join(format!("{user}.perm"))
    }

    pub fn is_connected(&self, user: UserId) -> bool {
        self.sessions.read().contains_key(&user)
    }

    /// Saves every session with unsaved changes.
    pub fn flush(&self) {
        let mut sessions = self.sessions.write();
        for (user, session) in sessions.iter_mut().filter(|(_, s)| s.dirty) {
            self.save_session(*user, session);
        }
    }

    /// Reads a record from disk. Unreadable files count as empty.
    fn load(&self, user: UserId) -> UserRecord {
        let path = self.path_for(user);
        let _guard = self.read_lock.lock();
        match fs::read(&path) {
            Ok(bytes) => UserRecord::decode(bytes.as_slice(), &self.modules),
            Err(err) if err.kind() == io::ErrorKind::NotFound => UserRecord::default(),
            Err(err) => {
                warn!(user = %user, path = %path.display(), error = %err, "failed to read user permissions");
                UserRecord::default()
            }
        }
    }

    fn save(&self, user: UserId, record: &UserRecord) -> io::Result<()> {
        let bytes = record.encode()?;
        let _guard = self.write_lock.lock();
        fs::write(self.path_for(user), bytes)
    }

    fn save_session(&self, user: UserId, session: &mut Session) {
        match self.save(user, &session.record) {
            Ok(()) => session.dirty = false,
            Err(err) => {
                error!(user = %user, error = %err, "failed to save user permissions");
            }
        }
    }

    fn record(&self, user: UserId, force_reload: bool) -> UserRecord {
        if force_reload {
            let mut sessions = self.sessions.write();
            if let Some(session) = sessions.get_mut(&user) {
                if session.dirty {
                    self.save_session(user, session);
                }
                session.record = self.load(user);
                return session.record.clone();
            }
        } else if let Some(session) = self.sessions.read().get(&user) {
            return session.record.clone();
        }
        self.load(user)
    }

    /// Runs `change` on the cached record of a connected user, or on a fresh
    /// copy from disk, and persists the result when it reports a change.
    fn mutate<F>(&self, user: UserId, change: F) -> bool
    where
        F: FnOnce(&mut UserRecord) -> bool,
    {
        let mut sessions = self.sessions.write();
        if let Some(session) = sessions.get_mut(&user) {
            if !change(&mut session.record) {
                return false;
            }
            session.dirty = true;
            self.save_session(user, session);
            return true;
        }
        drop(sessions);

        let mut record = self.load(user);
        if !change(&mut record) {
            return false;
        }
        if let Err(err) = self.save(user, &record) {
            error!(user = %user, error = %err, "failed to save user permissions");
        }
        true
    }
}

impl Handler for FileUserPermissionHandler {
    fn init(&self) -> Result<(), HandlerError> {
        fs::create_dir_all(&self.root).map_err(|source| HandlerError::Io {
            path: self.root.clone(),
            source,
        })
    }

    fn dispose(&self) {
        self.flush();
    }

    fn modules_changed(&self) {
        let mut sessions = self.sessions.write();
        for session in sessions.values_mut() {
            session.record.resolve_pending(&self.modules);
        }
    }

    fn events(&self) -> &EventHub {
        &self.events
    }
}

impl UserPermissionHandler for FileUserPermissionHandler {
    fn connect(&self, user: UserId) {
        if self.is_connected(user) {
            return;
        }
        let record = self.load(user);
        self.sessions
            .write()
            .entry(user)
            .or_insert(Session { record, dirty: false });
    }

    fn disconnect(&self, user: UserId) {
        let Some(mut session) = self.sessions.write().remove(&user) else {
            return;
        };
        if session.dirty {
            self.save_session(user, &mut session);
        }
    }

    fn permissions(&self, user: UserId, force_reload: bool) -> Vec<PermissionBranch> {
        self.record(user, force_reload).branches
    }

    fn permission_groups(&self, user: UserId, force_reload: bool) -> Vec<String> {
        self.record(user, force_reload).groups
    }

    fn add_permission(&self, user: UserId, branch: PermissionBranch) -> bool {
        let event = PermissionEvent::UserPermissionUpdated {
            user,
            branch: branch.clone(),
            added: true,
        };
        if !self.mutate(user, |record| add_replacing(&mut record.branches, branch)) {
            return false;
        }
        self.events.emit(&event);
        true
    }

    fn remove_permission(&self, user: UserId, branch: &PermissionBranch) -> bool {
        let removed = self.mutate(user, |record| {
            let before = record.branches.len();
            record.branches.retain(|b| b != branch);
            record.branches.len() != before
        });
        if removed {
            self.events.emit(&PermissionEvent::UserPermissionUpdated {
                user,
                branch: branch.clone(),
                added: false,
            });
        }
        removed
    }

    fn clear_permissions(&self, user: UserId) -> bool {
        let mut cleared = Vec::new();
        if !self.mutate(user, |record| {
            cleared = std::mem::take(&mut record.branches);
            let pending = std::mem::take(&mut record.unresolved);
            !cleared.is_empty() || !pending.is_empty()
        }) {
            return false;
        }
        for branch in cleared {
            self.events.emit(&PermissionEvent::UserPermissionUpdated {
                user,
                branch,
                added: false,
            });
        }
        true
    }

    fn add_permission_group(&self, user: UserId, group: &str) -> bool {
        let added = self.mutate(user, |record| {
            if record.groups.iter().any(|g| g.eq_ignore_ascii_case(group)) {
                return false;
            }
            record.groups.push(group.to_string());
            true
        });
        if added {
            self.events.emit(&PermissionEvent::UserGroupUpdated {
                user,
                group: group.to_string(),
                added: true,
            });
        }
        added
    }

    fn remove_permission_group(&self, user: UserId, group: &str) -> bool {
        let removed = self.mutate(user, |record| {
            let before = record.groups.len();
            record.groups.retain(|g| !g.eq_ignore_ascii_case(group));
            record.groups.len() != before
        });
        if removed {
            self.events.emit(&PermissionEvent::UserGroupUpdated {
                user,
                group: group.to_string(),
                added: false,
            });
        }
        removed
    }
}
