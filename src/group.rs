use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    PermissionBranch, UnresolvedBranch,
    codec,
    domain::ModuleRegistry,
    error::{DecodeError, GroupConfigError},
};

/// Display color of a group. Alpha defaults to opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    #[serde(default = "opaque")]
    pub a: u8,
}

fn opaque() -> u8 {
    u8::MAX
}

impl Color {
    pub const WHITE: Color = Color::rgb(255, 255, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Color { r, g, b, a: u8::MAX }
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::WHITE
    }
}

/// Structured form of a group as stored in config files.
///
/// ```json
/// { "id": "moderator", "name": "Moderator", "priority": 5,
///   "color": { "r": 40, "g": 120, "b": 255 },
///   "permissions": ["core::kick", "-core::ban"] }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Color>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl From<PermissionGroup> for GroupConfig {
    fn from(value: PermissionGroup) -> Self {
        GroupConfig {
            permissions: value
                .branches
                .iter()
                .map(ToString::to_string)
                .chain(value.unresolved.iter().map(ToString::to_string))
                .collect(),
            id: value.id,
            name: Some(value.display_name),
            color: Some(value.color),
            priority: Some(value.priority),
        }
    }
}

/// Named, ordered bundle of branches assignable to users as a unit.
///
/// Priority and color are presentation metadata. Resolution only looks at
/// branch order: the most recently added matching branch decides.
///
/// Entries naming a module that is not loaded are kept aside as
/// [`UnresolvedBranch`]es and written back on save. They join the branch list
/// once [`resolve_pending`](PermissionGroup::resolve_pending) finds their module.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "GroupConfig")]
pub struct PermissionGroup {
    id: String,
    display_name: String,
    color: Color,
    priority: i32,
    branches: Vec<PermissionBranch>,
    unresolved: Vec<UnresolvedBranch>,
}

impl PermissionGroup {
    pub fn new(id: &str, display_name: &str, color: Color, priority: i32) -> Self {
        PermissionGroup {
            id: id.to_string(),
            display_name: display_name.to_string(),
            color,
            priority,
            branches: Vec::new(),
            unresolved: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn branches(&self) -> &[PermissionBranch] {
        &self.branches
    }

    /// Entries waiting for their module to load.
    pub fn unresolved(&self) -> &[UnresolvedBranch] {
        &self.unresolved
    }

    /// Moves entries whose module is now loaded into the branch list, keeping
    /// their relative order. Returns `true` if any moved.
    pub fn resolve_pending(&mut self, modules: &ModuleRegistry) -> bool {
        resolve_pending(&mut self.branches, &mut self.unresolved, modules)
    }

    pub fn set_display_name(&mut self, display_name: &str) {
        self.display_name = display_name.to_string();
    }

    pub fn set_color(&mut self, color: Color) {
        self.color = color;
    }

    pub fn set_priority(&mut self, priority: i32) {
        self.priority = priority;
    }

    /// Appends `branch`, replacing an entry with the same pattern and another mode.
    /// Returns `false` if the exact branch is already present.
    pub fn add_permission(&mut self, branch: PermissionBranch) -> bool {
        add_replacing(&mut self.branches, branch)
    }

    /// Removes every entry equal to `branch`.
    pub fn remove_permission(&mut self, branch: &PermissionBranch) -> bool {
        let before = self.branches.len();
        self.branches.retain(|b| b != branch);
        self.branches.len() != before
    }

    /// Builds a group from its structured form.
    ///
    /// Malformed permission entries fail the whole group; entries with an
    /// unrecognized domain are kept unresolved with a warning.
    pub fn from_config(config: GroupConfig, modules: &ModuleRegistry) -> Result<Self, GroupConfigError> {
        if config.id.trim().is_empty() {
            return Err(GroupConfigError::BlankId);
        }

        let mut group = PermissionGroup::new(
            &config.id,
            config.name.as_deref().unwrap_or(&config.id),
            config.color.unwrap_or_default(),
            config.priority.unwrap_or(0),
        );
        for entry in config.permissions {
            match PermissionBranch::parse(&entry, modules) {
                Ok(branch) => {
                    group.add_permission(branch);
                }
                Err(err) => match UnresolvedBranch::from_parse_error(err) {
                    Ok(pending) => {
                        warn!(group = %group.id, entry = %entry, prefix = pending.prefix(), "permission domain not loaded, keeping entry unresolved");
                        group.unresolved.push(pending);
                    }
                    Err(source) => {
                        return Err(GroupConfigError::InvalidPermission {
                            group: group.id,
                            entry,
                            source,
                        });
                    }
                },
            }
        }
        Ok(group)
    }

    pub fn from_json(json: &str, modules: &ModuleRegistry) -> Result<Self, GroupConfigError> {
        let config: GroupConfig = serde_json::from_str(json)?;
        Self::from_config(config, modules)
    }

    /// Parses a JSON array of groups.
    pub fn list_from_json(json: &str, modules: &ModuleRegistry) -> Result<Vec<Self>, GroupConfigError> {
        let configs: Vec<GroupConfig> = serde_json::from_str(json)?;
        configs
            .into_iter()
            .map(|config| Self::from_config(config, modules))
            .collect()
    }

    pub fn to_config(&self) -> GroupConfig {
        self.clone().into()
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        codec::write_string(writer, &self.id)?;
        codec::write_string(writer, &self.display_name)?;
        writer.write_all(&[self.color.r, self.color.g, self.color.b, self.color.a])?;
        codec::write_i32(writer, self.priority)?;
        codec::write_count(writer, self.branches.len() + self.unresolved.len())?;
        for branch in &self.branches {
            branch.write_to(writer)?;
        }
        for pending in &self.unresolved {
            pending.write_to(writer)?;
        }
        Ok(())
    }

    /// Reads a group record. Branches of modules that are not loaded are kept unresolved.
    pub fn read_from<R: Read>(reader: &mut R, modules: &ModuleRegistry) -> Result<Self, DecodeError> {
        let id = codec::read_string(reader)?;
        let display_name = codec::read_string(reader)?;
        let mut rgba = [0u8; 4];
        reader.read_exact(&mut rgba)?;
        let priority = codec::read_i32(reader)?;
        let count = codec::read_count(reader)?;

        let color = Color { r: rgba[0], g: rgba[1], b: rgba[2], a: rgba[3] };
        let mut group = PermissionGroup::new(&id, &display_name, color, priority);
        for _ in 0..count {
            match PermissionBranch::read_from(reader, modules) {
                Ok(branch) => {
                    group.add_permission(branch);
                }
                Err(DecodeError::Parse(err)) => {
                    let pending = UnresolvedBranch::from_parse_error(err)?;
                    debug!(group = %group.id, prefix = pending.prefix(), "keeping branch of a module that is not loaded");
                    group.unresolved.push(pending);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(group)
    }
}

/// Shared add rule for groups and direct user assignments.
pub(crate) fn add_replacing(branches: &mut Vec<PermissionBranch>, branch: PermissionBranch) -> bool {
    if branches.contains(&branch) {
        return false;
    }
    branches.retain(|b| !b.equals_without_mode(&branch));
    branches.push(branch);
    true
}

/// Shared resolve rule for groups and user records.
pub(crate) fn resolve_pending(
    branches: &mut Vec<PermissionBranch>,
    unresolved: &mut Vec<UnresolvedBranch>,
    modules: &ModuleRegistry,
) -> bool {
    let mut moved = false;
    for pending in std::mem::take(unresolved) {
        match pending.resolve(modules) {
            Some(branch) => {
                add_replacing(branches, branch);
                moved = true;
            }
            None => unresolved.push(pending),
        }
    }
    moved
}
