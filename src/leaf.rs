use std::{
    fmt,
    hash::{Hash, Hasher},
    io::{self, Read, Write},
};

use crate::{
    codec::{self, FLAG_CORE, FLAG_FRAMEWORK, FLAG_LONG_PATH, FLAG_LONG_PREFIX, FLAG_NO_MODULE},
    domain::{Domain, ModuleRegistry, UNRECOGNIZED_DOMAIN, hash_ignore_case},
    error::{DecodeError, ParseError, PartialPermission},
};

/// Separator between a domain prefix and a path.
pub const DOMAIN_SEPARATOR: &str = "::";

/// Absolute, wildcard-free permission identifier, e.g. `core::control.editor`.
///
/// The default value is the Nil leaf: it has no domain, is never valid and no
/// branch contains it.
#[derive(Debug, Clone, Default)]
pub struct PermissionLeaf {
    domain: Option<Domain>,
    path: String,
    level: usize,
}

impl PermissionLeaf {
    pub fn new(domain: Domain, path: &str) -> Result<Self, ParseError> {
        validate_path(path, path, false)?;
        Ok(Self::from_parts(Some(domain), path))
    }

    /// The impossible-permission sentinel.
    pub fn nil() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(domain: Option<Domain>, path: &str) -> Self {
        PermissionLeaf {
            domain,
            level: segment_count(path),
            path: path.to_string(),
        }
    }

    /// Parses `<prefix>::<path>`, resolving the prefix against `modules`.
    pub fn parse(text: &str, modules: &ModuleRegistry) -> Result<Self, ParseError> {
        let (prefix, path) = split_domain(text)?;
        validate_path(text, path, false)?;
        match modules.resolve(prefix) {
            Some(domain) => Ok(Self::from_parts(Some(domain), path)),
            None => Err(ParseError::UnknownDomain {
                prefix: prefix.to_string(),
                partial: PartialPermission::Leaf(Self::from_parts(None, path)),
            }),
        }
    }

    pub fn domain(&self) -> Option<&Domain> {
        self.domain.as_ref()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Number of dot-separated segments in the path.
    pub fn level(&self) -> usize {
        self.level
    }

    pub fn is_valid(&self) -> bool {
        self.domain.is_some() && !self.path.is_empty()
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let (mut flags, prefix) = domain_flags(self.domain.as_ref());
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
        let domain = read_domain(reader, flags, modules)?;
        let path = codec::read_prefixed(reader, flags & FLAG_LONG_PATH != 0)?;
        match domain {
            // the Nil leaf is the only record without a domain
            DecodedDomain::Known(None) if path.is_empty() => Ok(Self::nil()),
            DecodedDomain::Known(None) => Err(DecodeError::MissingDomain(path)),
            DecodedDomain::Known(domain) => {
                validate_path(&path, &path, false)?;
                Ok(Self::from_parts(domain, &path))
            }
            DecodedDomain::Unknown(prefix) => Err(ParseError::UnknownDomain {
                prefix,
                partial: PartialPermission::Leaf(Self::from_parts(None, &path)),
            }
            .into()),
        }
    }
}

impl PartialEq for PermissionLeaf {
    fn eq(&self, other: &Self) -> bool {
        self.domain == other.domain && self.path.eq_ignore_ascii_case(&other.path)
    }
}

impl Eq for PermissionLeaf {}

impl Hash for PermissionLeaf {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.domain.hash(state);
        hash_ignore_case(&self.path, state);
    }
}

impl fmt::Display for PermissionLeaf {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let prefix = self.domain.as_ref().map_or(UNRECOGNIZED_DOMAIN, Domain::prefix);
        write!(f, "{}{}{}", prefix, DOMAIN_SEPARATOR, self.path)
    }
}

/// Splits on the first `::`. A lone `:` is not a separator.
pub(crate) fn split_domain(text: &str) -> Result<(&str, &str), ParseError> {
    let index = text
        .find(DOMAIN_SEPARATOR)
        .ok_or_else(|| ParseError::malformed(text, "no domain separator"))?;
    let prefix = &text[..index];
    let path = &text[index + DOMAIN_SEPARATOR.len()..];
    if prefix.is_empty() {
        return Err(ParseError::malformed(text, "empty domain prefix"));
    }
    Ok((prefix, path))
}

/// Checks path syntax. Paths are ASCII so case folding is well defined.
/// Branch paths may end in a single `*`.
pub(crate) fn validate_path(input: &str, path: &str, allow_wildcard: bool) -> Result<(), ParseError> {
    if path.is_empty() {
        return Err(ParseError::malformed(input, "empty path"));
    }
    if !path.is_ascii() {
        return Err(ParseError::malformed(input, "non-ASCII character in path"));
    }
    if path.contains(':') || path.chars().any(|c| c.is_ascii_whitespace() || c.is_ascii_control()) {
        return Err(ParseError::malformed(input, "illegal character in path"));
    }
    if let Some(star) = path.find('*') {
        if !allow_wildcard {
            return Err(ParseError::malformed(input, "wildcard in absolute permission"));
        }
        if star != path.len() - 1 {
            return Err(ParseError::malformed(input, "wildcard must be trailing"));
        }
    }
    if path.split('.').any(str::is_empty) {
        return Err(ParseError::malformed(input, "empty path segment"));
    }
    Ok(())
}

pub(crate) fn segment_count(path: &str) -> usize {
    if path.is_empty() {
        0
    } else {
        path.split('.').count()
    }
}

/// Flags and optional module prefix for a domain.
pub(crate) fn domain_flags(domain: Option<&Domain>) -> (u8, Option<&str>) {
    match domain {
        Some(Domain::Core) => (FLAG_CORE | FLAG_NO_MODULE, None),
        Some(Domain::Framework) => (FLAG_FRAMEWORK | FLAG_NO_MODULE, None),
        Some(Domain::Module(module)) => {
            let flags = if codec::needs_long_length(&module.prefix) {
                FLAG_LONG_PREFIX
            } else {
                0
            };
            (flags, Some(module.prefix.as_str()))
        }
        None => (FLAG_NO_MODULE, None),
    }
}

pub(crate) enum DecodedDomain {
    Known(Option<Domain>),
    Unknown(String),
}

pub(crate) fn read_domain<R: Read>(
    reader: &mut R,
    flags: u8,
    modules: &ModuleRegistry,
) -> Result<DecodedDomain, DecodeError> {
    if flags & FLAG_CORE != 0 {
        return Ok(DecodedDomain::Known(Some(Domain::Core)));
    }
    if flags & FLAG_FRAMEWORK != 0 {
        return Ok(DecodedDomain::Known(Some(Domain::Framework)));
    }
    if flags & FLAG_NO_MODULE != 0 {
        return Ok(DecodedDomain::Known(None));
    }
    let prefix = codec::read_prefixed(reader, flags & FLAG_LONG_PREFIX != 0)?;
    Ok(match modules.resolve(&prefix) {
        Some(domain) => DecodedDomain::Known(Some(domain)),
        None => DecodedDomain::Unknown(prefix),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ModuleRegistry {
        let modules = ModuleRegistry::new();
        modules.load("Build", "build").unwrap();
        modules
    }

    #[test]
    fn parses_core_and_module_leaves() {
        let modules = registry();
        let leaf = PermissionLeaf::parse("core::control.editor", &modules).unwrap();
        assert_eq!(leaf.domain(), Some(&Domain::Core));
        assert_eq!(leaf.path(), "control.editor");
        assert_eq!(leaf.level(), 2);

        let leaf = PermissionLeaf::parse("BUILD::place.wall", &modules).unwrap();
        assert_eq!(leaf.domain().map(Domain::prefix), Some("build"));
        assert_eq!(leaf.to_string(), "build::place.wall");
    }

    #[test]
    fn equality_ignores_case() {
        let modules = registry();
        let a = PermissionLeaf::parse("build::Place.Wall", &modules).unwrap();
        let b = PermissionLeaf::parse("Build::place.wall", &modules).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_separator_is_malformed() {
        let err = PermissionLeaf::parse("not-a-permission", &registry()).unwrap_err();
        assert!(matches!(err, ParseError::Malformed { .. }));
        // single colon is not a separator
        let err = PermissionLeaf::parse("core:kick", &registry()).unwrap_err();
        assert!(matches!(err, ParseError::Malformed { .. }));
    }

    #[test]
    fn unknown_domain_keeps_structure() {
        let err = PermissionLeaf::parse("nope::a.b", &registry()).unwrap_err();
        match err {
            ParseError::UnknownDomain { prefix, partial: PartialPermission::Leaf(leaf) } => {
                assert_eq!(prefix, "nope");
                assert_eq!(leaf.path(), "a.b");
                assert!(!leaf.is_valid());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn wildcards_are_not_leaves() {
        assert!(PermissionLeaf::parse("core::a.*", &registry()).is_err());
        assert!(PermissionLeaf::parse("*", &registry()).is_err());
        assert!(PermissionLeaf::parse("core::a..b", &registry()).is_err());
    }

    #[test]
    fn nil_is_invalid() {
        let nil = PermissionLeaf::nil();
        assert!(!nil.is_valid());
        assert_eq!(nil.level(), 0);
        assert_eq!(nil.to_string(), "unrecognized-domain::");
    }

    #[test]
    fn binary_layout() {
        let modules = registry();
        let leaf = PermissionLeaf::parse("core::kick", &modules).unwrap();
        let mut buf = Vec::new();
        leaf.write_to(&mut buf).unwrap();
        assert_eq!(buf, [FLAG_CORE | FLAG_NO_MODULE, 4, b'k', b'i', b'c', b'k']);

        let leaf = PermissionLeaf::parse("build::x", &modules).unwrap();
        let mut buf = Vec::new();
        leaf.write_to(&mut buf).unwrap();
        assert_eq!(buf, [0, 5, b'b', b'u', b'i', b'l', b'd', 1, b'x']);
        assert_eq!(PermissionLeaf::read_from(&mut buf.as_slice(), &modules).unwrap(), leaf);
    }

    #[test]
    fn binary_unknown_module_reports_prefix() {
        let modules = registry();
        let leaf = PermissionLeaf::parse("build::x", &modules).unwrap();
        let mut buf = Vec::new();
        leaf.write_to(&mut buf).unwrap();
        modules.unload("build");
        let err = PermissionLeaf::read_from(&mut buf.as_slice(), &modules).unwrap_err();
        assert!(matches!(err, DecodeError::Parse(ParseError::UnknownDomain { .. })));
    }

    #[test]
    fn long_path_and_prefix_flags() {
        let modules = ModuleRegistry::new();
        let prefix = "p".repeat(300);
        modules.load("Long", &prefix).unwrap();
        let path = "x".repeat(256);
        let leaf = PermissionLeaf::parse(&format!("{prefix}::{path}"), &modules).unwrap();

        let mut buf = Vec::new();
        leaf.write_to(&mut buf).unwrap();
        assert_eq!(buf[0], FLAG_LONG_PREFIX | FLAG_LONG_PATH);
        assert_eq!(&buf[1..3], &300u16.to_le_bytes());
        assert_eq!(&buf[303..305], &256u16.to_le_bytes());
        assert_eq!(buf.len(), 305 + 256);
        assert_eq!(PermissionLeaf::read_from(&mut buf.as_slice(), &modules).unwrap(), leaf);
    }

    #[test]
    fn nil_round_trips_but_domainless_paths_do_not() {
        let modules = registry();
        let mut buf = Vec::new();
        PermissionLeaf::nil().write_to(&mut buf).unwrap();
        assert_eq!(buf, [FLAG_NO_MODULE, 0]);
        assert!(!PermissionLeaf::read_from(&mut buf.as_slice(), &modules).unwrap().is_valid());

        let buf = [FLAG_NO_MODULE, 4, b'k', b'i', b'c', b'k'];
        let err = PermissionLeaf::read_from(&mut buf.as_slice(), &modules).unwrap_err();
        assert!(matches!(err, DecodeError::MissingDomain(_)));
    }

    #[test]
    fn non_ascii_is_rejected() {
        let modules = registry();
        let err = PermissionLeaf::parse("core::\u{c4}rger", &modules).unwrap_err();
        assert!(matches!(err, ParseError::Malformed { .. }));
        assert!(modules.load("Umlaut", "\u{e4}rger").is_err());
    }
}
