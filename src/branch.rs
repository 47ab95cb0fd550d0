use std::{
    fmt,
    hash::{Hash, Hasher},
    io::{self, Read, Write},
};

use serde::{Deserialize, Serialize};

use crate::{
    codec::{self, FLAG_LONG_PATH, FLAG_LONG_PREFIX, FLAG_SUBTRACTIVE, FLAG_SUPERUSER},
    domain::{Domain, ModuleRegistry, UNRECOGNIZED_DOMAIN, hash_ignore_case},
    error::{DecodeError, ParseError, PartialPermission},
    leaf::{
        DOMAIN_SEPARATOR, DecodedDomain, PermissionLeaf, domain_flags, read_domain, segment_count,
        split_domain, validate_path,
    },
};

/// Token of the superuser branch.
pub const SUPERUSER_TOKEN: &str = "*";

/// Whether a branch grants or revokes what it matches.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PermissionMode {
    #[default]
    Additive,
    Subtractive,
}

impl PermissionMode {
    fn sign(self) -> &'static str {
        match self {
            PermissionMode::Additive => "",
            PermissionMode::Subtractive => "-",
        }
    }
}

/// Permission pattern assignable to users and groups, e.g. `-build::place.*`.
///
/// A branch is either the superuser branch, which matches every leaf of every
/// domain, or a domain-qualified path that is absolute or ends in `*`.
#[derive(Debug, Clone)]
pub struct PermissionBranch {
    domain: Option<Domain>,
    path: String,
    wildcard_level: usize,
    mode: PermissionMode,
    superuser: bool,
}

impl PermissionBranch {
    /// Additive superuser branch (`*`).
    pub const SUPERUSER: PermissionBranch = PermissionBranch::superuser(PermissionMode::Additive);

    pub const fn superuser(mode: PermissionMode) -> Self {
        PermissionBranch {
            domain: None,
            path: String::new(),
            wildcard_level: 0,
            mode,
            superuser: true,
        }
    }

    pub fn new(domain: Domain, path: &str, mode: PermissionMode) -> Result<Self, ParseError> {
        validate_path(path, path, true)?;
        Ok(Self::from_parts(Some(domain), path, mode))
    }

    /// Absolute branch matching exactly `leaf`.
    pub fn from_leaf(leaf: &PermissionLeaf, mode: PermissionMode) -> Self {
        Self::from_parts(leaf.domain().cloned(), leaf.path(), mode)
    }

    fn from_parts(domain: Option<Domain>, path: &str, mode: PermissionMode) -> Self {
        PermissionBranch {
            domain,
            wildcard_level: wildcard_level(path),
            path: path.to_string(),
            mode,
            superuser: false,
        }
    }

    /// Parses `[+|-]<prefix>::<path>[*]` or `[+|-]*`.
    pub fn parse(text: &str, modules: &ModuleRegistry) -> Result<Self, ParseError> {
        let (mode, rest) = match text.as_bytes().first() {
            Some(b'+') => (PermissionMode::Additive, &text[1..]),
            Some(b'-') => (PermissionMode::Subtractive, &text[1..]),
            _ => (PermissionMode::Additive, text),
        };
        if rest == SUPERUSER_TOKEN {
            return Ok(Self::superuser(mode));
        }

        let (prefix, path) = split_domain(rest)?;
        validate_path(text, path, true)?;
        match modules.resolve(prefix) {
            Some(domain) => Ok(Self::from_parts(Some(domain), path, mode)),
            None => Err(ParseError::UnknownDomain {
                prefix: prefix.to_string(),
                partial: PartialPermission::Branch(Self::from_parts(None, path, mode)),
            }),
        }
    }

    pub fn with_mode(mut self, mode: PermissionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn domain(&self) -> Option<&Domain> {
        self.domain.as_ref()
    }

    /// Path including a trailing `*` when present. Empty for superuser.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// 1-based segment index of the trailing wildcard, 0 when absolute.
    pub fn wildcard_level(&self) -> usize {
        self.wildcard_level
    }

    pub fn mode(&self) -> PermissionMode {
        self.mode
    }

    pub fn is_superuser(&self) -> bool {
        self.superuser
    }

    pub fn is_subtractive(&self) -> bool {
        self.mode == PermissionMode::Subtractive
    }

    pub fn is_wildcard(&self) -> bool {
        self.wildcard_level > 0
    }

    pub fn is_valid(&self) -> bool {
        self.superuser || (self.domain.is_some() && !self.path.is_empty())
    }

    fn stem(&self) -> &str {
        self.path.strip_suffix('*').unwrap_or(&self.path)
    }

    /// `true` if this branch matches `leaf`. Invalid leaves are never matched.
    pub fn contains(&self, leaf: &PermissionLeaf) -> bool {
        if !leaf.is_valid() {
            return false;
        }
        if self.superuser {
            return true;
        }
        if !self.same_domain(leaf.domain()) {
            return false;
        }
        if self.wildcard_level == 0 {
            self.path.eq_ignore_ascii_case(leaf.path())
        } else {
            leaf.level() >= self.wildcard_level && starts_with_ignore_case(leaf.path(), self.stem())
        }
    }

    /// `true` if every leaf matched by `other` is matched by this branch. Mode is ignored.
    pub fn contains_branch(&self, other: &PermissionBranch) -> bool {
        if self.superuser {
            return true;
        }
        if other.superuser || !self.same_domain(other.domain()) {
            return false;
        }
        match (self.wildcard_level, other.wildcard_level) {
            (0, 0) => self.path.eq_ignore_ascii_case(&other.path),
            (0, _) => false,
            (level, 0) => {
                segment_count(&other.path) >= level
                    && starts_with_ignore_case(&other.path, self.stem())
            }
            (level, other_level) => {
                other_level >= level && starts_with_ignore_case(other.stem(), self.stem())
            }
        }
    }

    /// Pattern equality, ignoring mode.
    pub fn equals_without_mode(&self, other: &PermissionBranch) -> bool {
        if self.superuser || other.superuser {
            return self.superuser == other.superuser;
        }
        self.domain == other.domain
            && self.wildcard_level == other.wildcard_level
            && self.path.eq_ignore_ascii_case(&other.path)
    }

    fn same_domain(&self, domain: Option<&Domain>) -> bool {
        matches!((&self.domain, domain), (Some(a), Some(b)) if a == b)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let mode_flag = if self.is_subtractive() { FLAG_SUBTRACTIVE } else { 0 };
        if self.superuser {
            return writer.write_all(&[FLAG_SUPERUSER | mode_flag]);
        }

        let (mut flags, prefix) = domain_flags(self.domain.as_ref());
        flags |= mode_flag;
        let long_path = codec::needs_long_length(&self.path);
        if long_path {
            flags |= FLAG_LONG_PATH;
        }
        writer.write_all(&[flags])?;
        if let Some(prefix) = prefix {
            codec::write_prefixed(writer, prefix, flags & FLAG_LONG_PREFIX != 0)?;
        }
        codec::write_prefixed(writer, &self.path, long_path)
    }

    pub fn read_from<R: Read>(reader: &mut R, modules: &ModuleRegistry) -> Result<Self, DecodeError> {
        let flags = codec::read_u8(reader)?;
        let mode = if flags & FLAG_SUBTRACTIVE != 0 {
            PermissionMode::Subtractive
        } else {
            PermissionMode::Additive
        };
        if flags & FLAG_SUPERUSER != 0 {
            return Ok(Self::superuser(mode));
        }

        let domain = read_domain(reader, flags, modules)?;
        let path = codec::read_prefixed(reader, flags & FLAG_LONG_PATH != 0)?;
        validate_path(&path, &path, true)?;
        match domain {
            DecodedDomain::Known(None) => Err(DecodeError::MissingDomain(path)),
            DecodedDomain::Known(domain) => Ok(Self::from_parts(domain, &path, mode)),
            DecodedDomain::Unknown(prefix) => Err(ParseError::UnknownDomain {
                prefix,
                partial: PartialPermission::Branch(Self::from_parts(None, &path, mode)),
            }
            .into()),
        }
    }
}

impl PartialEq for PermissionBranch {
    fn eq(&self, other: &Self) -> bool {
        self.mode == other.mode && self.equals_without_mode(other)
    }
}

impl Eq for PermissionBranch {}

impl Hash for PermissionBranch {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.superuser.hash(state);
        self.mode.hash(state);
        if !self.superuser {
            self.domain.hash(state);
            hash_ignore_case(&self.path, state);
        }
    }
}

impl fmt::Display for PermissionBranch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.mode.sign())?;
        if self.superuser {
            return f.write_str(SUPERUSER_TOKEN);
        }
        let prefix = self.domain.as_ref().map_or(UNRECOGNIZED_DOMAIN, Domain::prefix);
        write!(f, "{}{}{}", prefix, DOMAIN_SEPARATOR, self.path)
    }
}

/// A branch whose module prefix is not loaded.
///
/// Stored records keep these verbatim and write them back unchanged, so
/// assignments for a module survive while the module is absent.
#[derive(Debug, Clone, PartialEq)]
pub struct UnresolvedBranch {
    prefix: String,
    branch: PermissionBranch,
}

impl UnresolvedBranch {
    /// Recovers the pending branch from an unknown-domain parse failure.
    /// Any other error is handed back.
    pub(crate) fn from_parse_error(err: ParseError) -> Result<Self, ParseError> {
        match err {
            ParseError::UnknownDomain {
                prefix,
                partial: PartialPermission::Branch(branch),
            } => Ok(UnresolvedBranch { prefix, branch }),
            other => Err(other),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn path(&self) -> &str {
        &self.branch.path
    }

    pub fn mode(&self) -> PermissionMode {
        self.branch.mode
    }

    /// The full branch, once a module with this prefix is loaded.
    pub fn resolve(&self, modules: &ModuleRegistry) -> Option<PermissionBranch> {
        let domain = modules.resolve(&self.prefix)?;
        Some(PermissionBranch {
            domain: Some(domain),
            ..self.branch.clone()
        })
    }

    /// Same layout as a module branch record.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let mut flags = if self.branch.is_subtractive() { FLAG_SUBTRACTIVE } else { 0 };
        let long_prefix = codec::needs_long_length(&self.prefix);
        let long_path = codec::needs_long_length(&self.branch.path);
        if long_prefix {
            flags |= FLAG_LONG_PREFIX;
        }
        if long_path {
            flags |= FLAG_LONG_PATH;
        }
        writer.write_all(&[flags])?;
        codec::write_prefixed(writer, &self.prefix, long_prefix)?;
        codec::write_prefixed(writer, &self.branch.path, long_path)
    }
}

impl fmt::Display for UnresolvedBranch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}",
            self.branch.mode.sign(),
            self.prefix,
            DOMAIN_SEPARATOR,
            self.branch.path
        )
    }
}

/// Segments up to and including the first `*`; 0 without one.
fn wildcard_level(path: &str) -> usize {
    match path.find('*') {
        Some(star) => path[..=star].split('.').count(),
        None => 0,
    }
}

fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
    value.len() >= prefix.len()
        && value.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}
