//! Error types.
//!
//! Each failure family gets its own enum so callers can match on exactly what
//! they care about. A plain "not granted" answer is never an error: only
//! [`MissingPermission`] is, and only when a caller asks for it through
//! [`PermissionManager::require`](crate::PermissionManager::require).

use std::path::PathBuf;

use thiserror::Error;

use crate::{PermissionBranch, PermissionLeaf};

/// Text parsing failure for leaves and branches.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    /// Input could not be tokenized at all.
    #[error("malformed permission {input:?}: {reason}")]
    Malformed { input: String, reason: &'static str },

    /// Input tokenized but the domain prefix is not core, framework or a loaded module.
    /// `partial` holds the structurally parsed value with no domain set.
    #[error("unrecognized permission domain {prefix:?}")]
    UnknownDomain {
        prefix: String,
        partial: PartialPermission,
    },
}

impl ParseError {
    pub(crate) fn malformed(input: &str, reason: &'static str) -> Self {
        ParseError::Malformed {
            input: input.to_string(),
            reason,
        }
    }

    /// `true` if the text was structurally fine and only the domain was unknown.
    pub fn is_unknown_domain(&self) -> bool {
        matches!(self, ParseError::UnknownDomain { .. })
    }
}

/// Structurally parsed value returned alongside [`ParseError::UnknownDomain`].
#[derive(Debug, Clone, PartialEq)]
pub enum PartialPermission {
    Leaf(PermissionLeaf),
    Branch(PermissionBranch),
}

/// Binary decoding failure.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported record version {0}")]
    UnsupportedVersion(u8),

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("negative element count {0}")]
    NegativeCount(i32),

    #[error("permission record {0:?} has no domain")]
    MissingDomain(String),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Structured group record could not be loaded.
#[derive(Debug, Error)]
pub enum GroupConfigError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("permission group id must not be blank")]
    BlankId,

    #[error("group {group:?} has an invalid permission entry {entry:?}: {source}")]
    InvalidPermission {
        group: String,
        entry: String,
        #[source]
        source: ParseError,
    },
}

/// Module registry misuse.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("invalid module prefix {0:?}")]
    InvalidPrefix(String),

    #[error("module prefix {0:?} is already registered")]
    DuplicatePrefix(String),
}

/// Handler lifecycle failure.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler {handler} failed to initialize: {reason}")]
    Init { handler: String, reason: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Groups(#[from] GroupConfigError),
}

/// Manager configuration could not be read.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Raised by gating code when an action is attempted without the required grant.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("missing permission: {leaf}")]
pub struct MissingPermission {
    pub leaf: PermissionLeaf,
}
