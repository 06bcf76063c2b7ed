//! MMDB format constants and small shape types

use crate::error::{MmdbError, Result};
use std::fmt;

/// MMDB metadata marker: "\xAB\xCD\xEFMaxMind.com"
pub const METADATA_MARKER: &[u8] = b"\xAB\xCD\xEFMaxMind.com";

/// The metadata marker must start within this many bytes of end-of-file
pub const METADATA_SEARCH_WINDOW: usize = 128 * 1024;

/// Zero-filled gap between the search tree and the data section
pub const DATA_SECTION_SEPARATOR_SIZE: usize = 16;

/// IP version of a database's search tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpVersion {
    /// IPv4 only (32-bit tree)
    V4,
    /// IPv6 (128-bit tree, IPv4 lives under ::/96)
    V6,
}

impl IpVersion {
    /// Create from the metadata `ip_version` field
    pub fn from_number(n: u64) -> Result<Self> {
        match n {
            4 => Ok(IpVersion::V4),
            6 => Ok(IpVersion::V6),
            _ => Err(MmdbError::InvalidFormat(format!(
                "Unsupported ip_version in metadata: {}",
                n
            ))),
        }
    }

    /// The metadata `ip_version` number
    pub fn number(self) -> u16 {
        match self {
            IpVersion::V4 => 4,
            IpVersion::V6 => 6,
        }
    }

    /// Address width in bits
    pub fn bit_count(self) -> usize {
        match self {
            IpVersion::V4 => 32,
            IpVersion::V6 => 128,
        }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Record size in bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordSize {
    /// 24-bit records (3 bytes per record, 6 bytes per node)
    Bits24 = 24,
    /// 28-bit records (3.5 bytes per record, 7 bytes per node)
    Bits28 = 28,
    /// 32-bit records (4 bytes per record, 8 bytes per node)
    Bits32 = 32,
}

impl RecordSize {
    /// Size of a node (2 records) in bytes
    pub fn node_bytes(self) -> usize {
        match self {
            RecordSize::Bits24 => 6,
            RecordSize::Bits28 => 7,
            RecordSize::Bits32 => 8,
        }
    }

    /// Record width in bits
    pub fn bits(self) -> u16 {
        self as u16
    }

    /// Create from bit size
    pub fn from_bits(bits: u64) -> Result<Self> {
        match bits {
            24 => Ok(RecordSize::Bits24),
            28 => Ok(RecordSize::Bits28),
            32 => Ok(RecordSize::Bits32),
            _ => Err(MmdbError::InvalidFormat(format!(
                "Unknown record size: {} bits",
                bits
            ))),
        }
    }
}
