//! Database reader
//!
//! [`Reader`] ties the pieces together: it locates and parses the metadata,
//! builds the search tree view, and answers lookups by walking the tree and
//! decoding the matched data section value.
//!
//! # Example
//!
//! ```no_run
//! use mmdb_reader::Reader;
//!
//! let reader = Reader::open("GeoLite2-City.mmdb")?;
//! if let Some(record) = reader.get("81.2.69.160")? {
//!     println!("{}", record.to_json());
//! }
//! let (_, prefix_len) = reader.get_with_prefix_len("81.2.69.160")?;
//! println!("matched /{}", prefix_len);
//! # Ok::<(), mmdb_reader::MmdbError>(())
//! ```

use crate::byte_source::{ByteSource, DatabaseStorage, MmapSource};
use crate::data_section::{DataDecoder, DataValue};
use crate::error::{MmdbError, Result};
use crate::mmdb::{find_metadata_marker, IpVersion, Metadata, SearchTree, METADATA_MARKER};
use std::fmt;
use std::net::IpAddr;
use std::path::Path;
use tracing::{debug, trace};

/// Name used in open errors for sources that have no path
const IN_MEMORY_NAME: &str = "in-memory database";

/// Read-only MMDB database handle
///
/// Lookups take `&self` and may run concurrently from many threads when
/// the byte source is `Sync` (both built-in sources are). [`Reader::close`]
/// takes `&mut self`, so it cannot overlap an in-flight lookup.
pub struct Reader<S: ByteSource = DatabaseStorage> {
    /// `None` once closed
    source: Option<S>,
    metadata: Metadata,
    tree: SearchTree,
}

impl Reader<DatabaseStorage> {
    /// Open a database file by memory-mapping it
    ///
    /// # Errors
    /// - [`MmdbError::FileNotFound`] / [`MmdbError::PermissionDenied`] if
    ///   the file cannot be opened
    /// - [`MmdbError::InvalidFormat`] if it is not a valid database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let source = MmapSource::open(path)?;
        Self::from_named_source(DatabaseStorage::Mmap(source), &path.display().to_string())
    }

    /// Open a database held in memory
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        Self::from_named_source(DatabaseStorage::Owned(data), IN_MEMORY_NAME)
    }
}

impl<S: ByteSource> Reader<S> {
    /// Open a database over any byte source
    pub fn from_source(source: S) -> Result<Self> {
        Self::from_named_source(source, IN_MEMORY_NAME)
    }

    fn from_named_source(source: S, name: &str) -> Result<Self> {
        let marker = find_metadata_marker(source.as_slice()).ok_or_else(|| {
            MmdbError::InvalidFormat(format!(
                "Error opening database file ({}). Is this a valid MaxMind DB file?",
                name
            ))
        })?;

        let metadata = Metadata::decode(&source, marker + METADATA_MARKER.len())?;
        let tree = SearchTree::new(&source, &metadata)?;

        debug!(
            database = name,
            node_count = metadata.node_count,
            record_size = metadata.record_size.bits(),
            ip_version = %metadata.ip_version,
            database_type = %metadata.database_type,
            "Opened MaxMind DB"
        );

        Ok(Reader {
            source: Some(source),
            metadata,
            tree,
        })
    }

    fn source(&self) -> Result<&S> {
        self.source.as_ref().ok_or_else(|| {
            MmdbError::IllegalState("Attempt to read from a closed MaxMind DB.".to_string())
        })
    }

    /// Look up the record for an IP address string
    ///
    /// Returns `Ok(None)` when no network in the database covers the
    /// address.
    pub fn get(&self, ip: &str) -> Result<Option<DataValue>> {
        self.get_with_prefix_len(ip).map(|(record, _)| record)
    }

    /// Look up the record and the prefix length of the matched network
    ///
    /// The prefix length is reported even when there is no match: it is
    /// the depth at which the search ended. IPv4 addresses report IPv4
    /// prefix lengths even in an IPv6 database.
    pub fn get_with_prefix_len(&self, ip: &str) -> Result<(Option<DataValue>, u8)> {
        self.source()?;

        let addr: IpAddr = ip.parse().map_err(|_| {
            MmdbError::InvalidArgument(format!("The value \"{}\" is not a valid IP address.", ip))
        })?;

        let addr = match addr {
            IpAddr::V6(v6) if self.metadata.ip_version == IpVersion::V4 => {
                match v6.to_ipv4_mapped() {
                    Some(v4) => IpAddr::V4(v4),
                    None => {
                        return Err(MmdbError::InvalidArgument(format!(
                            "Error looking up {}. You attempted to look up an IPv6 address in an IPv4-only database",
                            ip
                        )))
                    }
                }
            }
            other => other,
        };

        self.lookup(addr)
    }

    /// Look up an already-parsed address
    pub fn lookup(&self, addr: IpAddr) -> Result<(Option<DataValue>, u8)> {
        let source = self.source()?;
        let result = self.tree.lookup(source, addr)?;

        let record = match result.data_offset {
            Some(offset) => {
                let data_section_start = self.tree.data_section_start();
                let decoder = DataDecoder::new(source, data_section_start);
                let (value, _) = decoder.decode(data_section_start + offset)?;
                Some(value)
            }
            None => None,
        };

        trace!(
            ip = %addr,
            prefix_len = result.prefix_len,
            found = record.is_some(),
            "lookup"
        );

        Ok((record, result.prefix_len))
    }

    /// Database metadata
    pub fn metadata(&self) -> Result<&Metadata> {
        self.source()?;
        Ok(&self.metadata)
    }

    /// Release the byte source
    ///
    /// Every later call, including a second `close`, fails with
    /// [`MmdbError::IllegalState`].
    pub fn close(&mut self) -> Result<()> {
        match self.source.take() {
            Some(_) => {
                debug!("Closed MaxMind DB");
                Ok(())
            }
            None => Err(MmdbError::IllegalState(
                "Attempt to close a closed MaxMind DB.".to_string(),
            )),
        }
    }

    /// True once [`Reader::close`] has been called
    pub fn is_closed(&self) -> bool {
        self.source.is_none()
    }
}

impl<S: ByteSource> fmt::Debug for Reader<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("metadata", &self.metadata)
            .field("closed", &self.is_closed())
            .finish()
    }
}
