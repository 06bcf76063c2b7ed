//! Error types for the MMDB reader

use std::fmt;
use std::io;
use std::path::Path;

/// Result type alias for reader operations
pub type Result<T> = std::result::Result<T, MmdbError>;

/// Message for payloads that violate a type's size rules
pub(crate) const BAD_DATA: &str = "The MaxMind DB file's data section contains bad data (unknown data type or corrupt data)";

/// Message for reads past the end of the byte source
pub(crate) const SHORT_READ: &str = "The MaxMind DB file contains bad data";

/// Message for search tree records that point nowhere valid
pub(crate) const CORRUPT_TREE: &str = "The MaxMind DB file's search tree is corrupt";

/// Main error type for reader operations
///
/// Every failure is surfaced as one of these; nothing is retried or
/// swallowed internally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MmdbError {
    /// Malformed bytes: short reads, bad payload sizes, unknown types,
    /// corrupt tree records, missing metadata marker
    InvalidFormat(String),

    /// Caller misuse: unparsable IP, IPv6 query against an IPv4 database
    InvalidArgument(String),

    /// Operation on a closed reader, or a second close
    IllegalState(String),

    /// Database file does not exist
    FileNotFound(String),

    /// Database file exists but cannot be read
    PermissionDenied(String),

    /// Any other I/O failure while opening
    Io(String),
}

impl MmdbError {
    /// Build the error for a path that could not be opened
    pub(crate) fn from_open_error(path: &Path, err: io::Error) -> Self {
        let msg = format!(
            "The file \"{}\" does not exist or is not readable.",
            path.display()
        );
        match err.kind() {
            io::ErrorKind::NotFound => MmdbError::FileNotFound(msg),
            io::ErrorKind::PermissionDenied => MmdbError::PermissionDenied(msg),
            _ => MmdbError::Io(format!("{} ({})", msg, err)),
        }
    }

    /// True for [`MmdbError::InvalidFormat`]
    pub fn is_invalid_format(&self) -> bool {
        matches!(self, MmdbError::InvalidFormat(_))
    }

    /// True for [`MmdbError::InvalidArgument`]
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, MmdbError::InvalidArgument(_))
    }

    /// True for [`MmdbError::IllegalState`]
    pub fn is_illegal_state(&self) -> bool {
        matches!(self, MmdbError::IllegalState(_))
    }

    /// The human-readable message carried by the error
    pub fn message(&self) -> &str {
        match self {
            MmdbError::InvalidFormat(msg)
            | MmdbError::InvalidArgument(msg)
            | MmdbError::IllegalState(msg)
            | MmdbError::FileNotFound(msg)
            | MmdbError::PermissionDenied(msg)
            | MmdbError::Io(msg) => msg,
        }
    }
}

impl fmt::Display for MmdbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MmdbError::InvalidFormat(msg) => write!(f, "Invalid database: {}", msg),
            MmdbError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            MmdbError::IllegalState(msg) => write!(f, "Illegal state: {}", msg),
            MmdbError::FileNotFound(msg) => write!(f, "File not found: {}", msg),
            MmdbError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            MmdbError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for MmdbError {}
