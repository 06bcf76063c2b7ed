//! MMDB Binary Format Parsing
//!
//! Locates the metadata section and turns the decoded metadata map into a
//! typed [`Metadata`].
//!
//! Layout of a database file:
//!
//! ```text
//! [search tree: node_count * node_bytes]
//! [16 zero bytes]
//! [data section]
//! ["\xAB\xCD\xEFMaxMind.com"][metadata map]
//! ```

use super::types::{IpVersion, RecordSize, METADATA_MARKER, METADATA_SEARCH_WINDOW};
use crate::byte_source::ByteSource;
use crate::data_section::{DataDecoder, DataValue};
use crate::error::{MmdbError, Result};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Find the metadata marker (zero allocation)
///
/// Only the last 128 KiB are searched. If the marker occurs more than once
/// the LAST occurrence wins, since data section strings may contain it.
/// Returns the offset of the marker itself.
pub fn find_metadata_marker(data: &[u8]) -> Option<usize> {
    let search_start = data.len().saturating_sub(METADATA_SEARCH_WINDOW);
    memchr::memmem::rfind(&data[search_start..], METADATA_MARKER).map(|i| search_start + i)
}

/// Database metadata, parsed once at open time
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    /// Number of nodes in the search tree
    pub node_count: u32,
    /// Record size in bits (24, 28, or 32)
    pub record_size: RecordSize,
    /// IP version of the tree
    pub ip_version: IpVersion,
    /// Database type, e.g. "GeoIP2-City"
    pub database_type: String,
    /// Locales the data section carries names for
    pub languages: Vec<String>,
    /// Format major version (2 for current databases)
    pub binary_format_major_version: u16,
    /// Format minor version
    pub binary_format_minor_version: u16,
    /// Build time, seconds since the Unix epoch
    pub build_epoch: u64,
    /// Description by language code
    pub description: BTreeMap<String, String>,
}

impl Metadata {
    /// Decode the metadata map starting at `metadata_start`.
    ///
    /// Pointers inside the metadata are relative to `metadata_start`.
    pub fn decode<S: ByteSource + ?Sized>(source: &S, metadata_start: usize) -> Result<Self> {
        let decoder = DataDecoder::new(source, metadata_start);
        let (value, _) = decoder.decode(metadata_start)?;
        Self::from_value(&value)
    }

    /// Build from an already-decoded metadata map
    pub fn from_value(value: &DataValue) -> Result<Self> {
        let map = value.as_map().ok_or_else(|| {
            MmdbError::InvalidFormat("Metadata section is not a map".to_string())
        })?;

        let node_count = required_uint(map, "node_count")?;
        let node_count = u32::try_from(node_count).map_err(|_| {
            MmdbError::InvalidFormat(format!("node_count {} exceeds 32 bits", node_count))
        })?;
        let record_size = RecordSize::from_bits(required_uint(map, "record_size")?)?;
        let ip_version = IpVersion::from_number(required_uint(map, "ip_version")?)?;

        let database_type = match map.get("database_type") {
            Some(v) => v.as_str().map(str::to_string).ok_or_else(|| wrong_type("database_type"))?,
            None => String::new(),
        };

        let languages = match map.get("languages") {
            Some(v) => v
                .as_array()
                .ok_or_else(|| wrong_type("languages"))?
                .iter()
                .map(|lang| lang.as_str().map(str::to_string).ok_or_else(|| wrong_type("languages")))
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        let description = match map.get("description") {
            Some(v) => v
                .as_map()
                .ok_or_else(|| wrong_type("description"))?
                .iter()
                .map(|(lang, text)| {
                    text.as_str()
                        .map(|t| (lang.clone(), t.to_string()))
                        .ok_or_else(|| wrong_type("description"))
                })
                .collect::<Result<BTreeMap<_, _>>>()?,
            None => BTreeMap::new(),
        };

        Ok(Metadata {
            node_count,
            record_size,
            ip_version,
            database_type,
            languages,
            binary_format_major_version: optional_u16(map, "binary_format_major_version")?,
            binary_format_minor_version: optional_u16(map, "binary_format_minor_version")?,
            build_epoch: optional_uint(map, "build_epoch")?,
            description,
        })
    }

    /// Bytes per search tree node (`record_size / 4`)
    pub fn node_byte_size(&self) -> usize {
        self.record_size.node_bytes()
    }

    /// Size of the search tree in bytes
    pub fn search_tree_size(&self) -> usize {
        self.node_count as usize * self.node_byte_size()
    }

    /// Build time as a `SystemTime`
    pub fn build_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.build_epoch)
    }

    /// JSON rendering used by the CLI's `inspect --json`
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "node_count": self.node_count,
            "record_size": self.record_size.bits(),
            "ip_version": self.ip_version.number(),
            "database_type": self.database_type,
            "languages": self.languages,
            "binary_format_major_version": self.binary_format_major_version,
            "binary_format_minor_version": self.binary_format_minor_version,
            "build_epoch": self.build_epoch,
            "description": self.description,
        })
    }
}

fn wrong_type(key: &str) -> MmdbError {
    MmdbError::InvalidFormat(format!("Metadata field '{}' has an unexpected type", key))
}

fn required_uint(map: &HashMap<String, DataValue>, key: &str) -> Result<u64> {
    match map.get(key) {
        Some(v) => v.as_u64().ok_or_else(|| wrong_type(key)),
        None => Err(MmdbError::InvalidFormat(format!(
            "Metadata is missing required field '{}'",
            key
        ))),
    }
}

fn optional_uint(map: &HashMap<String, DataValue>, key: &str) -> Result<u64> {
    match map.get(key) {
        Some(v) => v.as_u64().ok_or_else(|| wrong_type(key)),
        None => Ok(0),
    }
}

fn optional_u16(map: &HashMap<String, DataValue>, key: &str) -> Result<u16> {
    u16::try_from(optional_uint(map, key)?).map_err(|_| wrong_type(key))
}
