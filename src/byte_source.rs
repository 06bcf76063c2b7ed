//! Random-access byte sources backing a reader.
//!
//! The reader never streams: every tree node, control byte, and payload
//! is fetched by absolute offset. A [`ByteSource`] answers those reads.
//!
//! # Concurrency
//!
//! Both sources shipped here read from an immutable slice (a read-only
//! memory map or an owned buffer), so reads carry no cursor and are safe
//! from any number of threads at once. An implementation built on a
//! shared seek-then-read file cursor would NOT be; it must lock around
//! the seek and the read.
//!
//! # Example
//!
//! ```no_run
//! use mmdb_reader::byte_source::{ByteSource, MmapSource};
//!
//! let source = MmapSource::open("GeoLite2-City.mmdb")?;
//! let first_node = source.read(0, 6)?;
//! println!("{} bytes mapped, first node {:02x?}", source.len(), first_node);
//! # Ok::<(), mmdb_reader::MmdbError>(())
//! ```

use crate::error::{MmdbError, Result, SHORT_READ};
use memmap2::Mmap;
use std::fmt;
use std::fs::File;
use std::path::Path;

/// Random-access read of `len` bytes at absolute `offset`.
pub trait ByteSource {
    /// Total number of addressable bytes
    fn len(&self) -> usize;

    /// True when the source holds no bytes
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrow the whole source as one slice
    fn as_slice(&self) -> &[u8];

    /// Borrow exactly `len` bytes starting at `offset`.
    ///
    /// Fails with [`MmdbError::InvalidFormat`] if fewer than `len` bytes
    /// are available.
    fn read(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let data = self.as_slice();
        let end = offset
            .checked_add(len)
            .ok_or_else(|| MmdbError::InvalidFormat(SHORT_READ.to_string()))?;
        data.get(offset..end)
            .ok_or_else(|| MmdbError::InvalidFormat(SHORT_READ.to_string()))
    }

    /// Read a single byte at `offset`
    fn read_u8(&self, offset: usize) -> Result<u8> {
        Ok(self.read(offset, 1)?[0])
    }
}

/// A read-only memory-mapped database file.
///
/// The file is unmapped when the source is dropped.
pub struct MmapSource {
    mmap: Mmap,
}

impl MmapSource {
    /// Open and memory-map a file.
    ///
    /// Missing files fail with [`MmdbError::FileNotFound`], unreadable ones
    /// with [`MmdbError::PermissionDenied`].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| MmdbError::from_open_error(path, e))?;

        // SAFETY: the map is read-only. Databases are replaced by renaming a
        // new file into place, never by rewriting an open one.
        let mmap = unsafe { Mmap::map(&file) }
            .map_err(|e| MmdbError::Io(format!("Failed to mmap {}: {}", path.display(), e)))?;

        Ok(Self { mmap })
    }
}

impl ByteSource for MmapSource {
    fn len(&self) -> usize {
        self.mmap.len()
    }

    fn as_slice(&self) -> &[u8] {
        &self.mmap[..]
    }
}

impl fmt::Debug for MmapSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MmapSource")
            .field("size", &self.mmap.len())
            .finish()
    }
}

impl ByteSource for Vec<u8> {
    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn as_slice(&self) -> &[u8] {
        self
    }
}

impl ByteSource for [u8] {
    fn len(&self) -> usize {
        <[u8]>::len(self)
    }

    fn as_slice(&self) -> &[u8] {
        self
    }
}

impl<T: ByteSource + ?Sized> ByteSource for &T {
    fn len(&self) -> usize {
        (**self).len()
    }

    fn as_slice(&self) -> &[u8] {
        (**self).as_slice()
    }
}

/// Storage behind a reader opened from a path or from bytes
pub enum DatabaseStorage {
    /// Owned in-memory buffer
    Owned(Vec<u8>),
    /// Memory-mapped file
    Mmap(MmapSource),
}

impl ByteSource for DatabaseStorage {
    fn len(&self) -> usize {
        match self {
            DatabaseStorage::Owned(v) => v.len(),
            DatabaseStorage::Mmap(m) => m.len(),
        }
    }

    fn as_slice(&self) -> &[u8] {
        match self {
            DatabaseStorage::Owned(v) => v.as_slice(),
            DatabaseStorage::Mmap(m) => m.as_slice(),
        }
    }
}

impl fmt::Debug for DatabaseStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseStorage::Owned(v) => write!(f, "Owned({} bytes)", v.len()),
            DatabaseStorage::Mmap(m) => m.fmt(f),
        }
    }
}
