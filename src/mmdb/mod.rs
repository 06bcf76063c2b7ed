//! MaxMind DB (MMDB) format
//!
//! The MMDB format uses a binary search tree for efficient IP address
//! lookups. Values live in a data section using the self-describing
//! encoding decoded by [`crate::data_section::DataDecoder`].
//!
//! ## Architecture
//!
//! - **types**: format constants, IP version and record size
//! - **format**: metadata marker search and metadata parsing
//! - **tree**: search tree traversal for IP lookups

pub mod format;
pub mod tree;
pub mod types;

pub use format::{find_metadata_marker, Metadata};
pub use tree::{LookupResult, SearchTree};
pub use types::{
    IpVersion, RecordSize, DATA_SECTION_SEPARATOR_SIZE, METADATA_MARKER, METADATA_SEARCH_WINDOW,
};
