//! mmdb-reader - Read-only MaxMind DB (MMDB) lookups
//!
//! Looks up IP addresses in MMDB files (GeoIP2, GeoLite2, and any other
//! database written in the MaxMind DB format) and decodes the matching
//! record into a [`DataValue`].
//!
//! # Quick Start
//!
//! ```no_run
//! use mmdb_reader::Reader;
//!
//! let reader = Reader::open("GeoLite2-Country.mmdb")?;
//!
//! if let Some(record) = reader.get("1.2.3.4")? {
//!     let iso_code = record
//!         .get("country")
//!         .and_then(|c| c.get("iso_code"))
//!         .and_then(|c| c.as_str());
//!     println!("Country: {:?}", iso_code);
//! }
//!
//! println!("Built {:?}", reader.metadata()?.build_time());
//! # Ok::<(), mmdb_reader::MmdbError>(())
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │  MMDB File                           │
//! ├──────────────────────────────────────┤
//! │  1. Search Tree (binary trie)        │
//! │  2. 16-byte zero separator           │
//! │  3. Data Section (self-describing)   │
//! │  4. Metadata marker + metadata map   │
//! └──────────────────────────────────────┘
//!          ↓ mmap() (read-only)
//! ┌──────────────────────────────────────┐
//! │  Reader                              │
//! │  SearchTree → DataDecoder → DataValue│
//! └──────────────────────────────────────┘
//! ```
//!
//! Lookups walk one address bit per tree level and decode the matched
//! value on demand; nothing is cached per lookup, and a [`Reader`] can be
//! shared across threads.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod byte_source;
pub mod data_section;
pub mod error;
pub mod mmdb;
pub mod reader;

pub use crate::byte_source::{ByteSource, DatabaseStorage, MmapSource};
pub use crate::data_section::{DataDecoder, DataValue, Unsigned};
pub use crate::error::{MmdbError, Result};
pub use crate::mmdb::{IpVersion, Metadata, RecordSize};
pub use crate::reader::Reader;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
