//! MMDB Search Tree Traversal
//!
//! Implements binary search tree traversal for IP address lookups.
//! The tree uses a compact binary representation where each node contains
//! two records (left and right) that point to either:
//! - Another node (continue traversal)
//! - A data section offset (found)
//! - A "not found" marker (the record equals `node_count`)

use super::format::Metadata;
use super::types::{IpVersion, RecordSize, DATA_SECTION_SEPARATOR_SIZE};
use crate::byte_source::ByteSource;
use crate::error::{MmdbError, Result, CORRUPT_TREE};
use std::net::IpAddr;

/// Bits of the IPv4-compatible prefix (`::/96`) inside an IPv6 tree
const IPV4_SUBTREE_DEPTH: usize = 96;

/// Result of an IP lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupResult {
    /// Offset into the data section (relative to data section start),
    /// `None` when no prefix covers the address
    pub data_offset: Option<usize>,
    /// Network prefix length (netmask), counted in the queried address width
    pub prefix_len: u8,
}

/// Search tree geometry plus the cached IPv4 entry point
///
/// Holds no bytes; each lookup borrows the [`ByteSource`]. Construct once
/// per database with [`SearchTree::new`].
#[derive(Debug, Clone, Copy)]
pub struct SearchTree {
    node_count: u32,
    record_size: RecordSize,
    ip_version: IpVersion,
    tree_size: usize,
    /// Record reached after walking 96 zero bits; `>= node_count` when the
    /// walk hit a terminal record before reaching the IPv4 subtree
    ipv4_start: u32,
}

impl SearchTree {
    /// Build the tree view for a database and locate the IPv4 subtree
    pub fn new<S: ByteSource + ?Sized>(source: &S, metadata: &Metadata) -> Result<Self> {
        let tree_size = (metadata.node_count as usize)
            .checked_mul(metadata.node_byte_size())
            .filter(|&size| size <= source.len())
            .ok_or_else(|| {
                MmdbError::InvalidFormat(format!(
                    "Search tree of {} nodes does not fit in a {} byte file",
                    metadata.node_count,
                    source.len()
                ))
            })?;

        let mut tree = SearchTree {
            node_count: metadata.node_count,
            record_size: metadata.record_size,
            ip_version: metadata.ip_version,
            tree_size,
            ipv4_start: 0,
        };

        if tree.ip_version == IpVersion::V6 {
            let (record, _) = tree.walk(source, 0, IPV4_SUBTREE_DEPTH, 0)?;
            tree.ipv4_start = record;
        }

        Ok(tree)
    }

    /// Size of the search tree in bytes
    pub fn tree_size(&self) -> usize {
        self.tree_size
    }

    /// Absolute offset of the first data section byte
    pub fn data_section_start(&self) -> usize {
        self.tree_size + DATA_SECTION_SEPARATOR_SIZE
    }

    /// Look up an IP address
    ///
    /// IPv4 addresses in an IPv6 tree start from the cached IPv4 subtree
    /// and report prefixes in IPv4 terms. The caller decides what to do
    /// with IPv6 addresses against an IPv4 tree; passing one here fails
    /// with [`MmdbError::InvalidArgument`].
    pub fn lookup<S: ByteSource + ?Sized>(&self, source: &S, ip: IpAddr) -> Result<LookupResult> {
        let (record, depth) = match (ip, self.ip_version) {
            (IpAddr::V4(addr), IpVersion::V4) => self.walk(source, u32::from(addr) as u128, 32, 0)?,
            (IpAddr::V4(addr), IpVersion::V6) => {
                self.walk(source, u32::from(addr) as u128, 32, self.ipv4_start)?
            }
            (IpAddr::V6(addr), IpVersion::V6) => self.walk(source, u128::from(addr), 128, 0)?,
            (IpAddr::V6(addr), IpVersion::V4) => {
                return Err(MmdbError::InvalidArgument(format!(
                    "Error looking up {}. You attempted to look up an IPv6 address in an IPv4-only database",
                    addr
                )))
            }
        };

        let data_offset = self.resolve(source, record)?;
        Ok(LookupResult {
            data_offset,
            prefix_len: depth as u8,
        })
    }

    /// Walk `bit_count` bits of `addr` (MSB first) from `start`, stopping at
    /// the first record that is not a node index. Returns the last record
    /// read and the number of bits consumed.
    fn walk<S: ByteSource + ?Sized>(
        &self,
        source: &S,
        addr: u128,
        bit_count: usize,
        start: u32,
    ) -> Result<(u32, usize)> {
        let mut node = start;
        let mut depth = 0;

        while depth < bit_count && node < self.node_count {
            let bit = ((addr >> (bit_count - 1 - depth)) & 1) as u8;
            node = self.read_record(source, node, bit)?;
            depth += 1;
        }

        Ok((node, depth))
    }

    /// Classify a terminal record into "no match" or a data section offset
    fn resolve<S: ByteSource + ?Sized>(&self, source: &S, record: u32) -> Result<Option<usize>> {
        if record == self.node_count {
            return Ok(None);
        }

        // Address bits ran out while still pointing at a node
        if record < self.node_count {
            return Err(MmdbError::InvalidFormat(CORRUPT_TREE.to_string()));
        }

        // Record values count from the end of the tree, separator included
        let data_offset = (record - self.node_count) as usize;
        let data_offset = data_offset
            .checked_sub(DATA_SECTION_SEPARATOR_SIZE)
            .ok_or_else(|| MmdbError::InvalidFormat(CORRUPT_TREE.to_string()))?;

        if self.data_section_start() + data_offset >= source.len() {
            return Err(MmdbError::InvalidFormat(CORRUPT_TREE.to_string()));
        }

        Ok(Some(data_offset))
    }

    /// Read a record from a node
    ///
    /// Each node contains two records. `side` determines which:
    /// - 0 = left record (for IP bit 0)
    /// - 1 = right record (for IP bit 1)
    pub fn read_record<S: ByteSource + ?Sized>(&self, source: &S, node: u32, side: u8) -> Result<u32> {
        if node >= self.node_count {
            return Err(MmdbError::InvalidFormat(format!(
                "Node index {} exceeds node count {}",
                node, self.node_count
            )));
        }

        let node_offset = node as usize * self.record_size.node_bytes();
        let bytes = source.read(node_offset, self.record_size.node_bytes())?;

        Ok(match self.record_size {
            RecordSize::Bits24 => {
                let b = if side == 0 { &bytes[0..3] } else { &bytes[3..6] };
                u32::from_be_bytes([0, b[0], b[1], b[2]])
            }
            RecordSize::Bits28 => {
                // [left 24 bits][left high nibble | right high nibble][right 24 bits]
                if side == 0 {
                    u32::from_be_bytes([bytes[3] >> 4, bytes[0], bytes[1], bytes[2]])
                } else {
                    u32::from_be_bytes([bytes[3] & 0x0F, bytes[4], bytes[5], bytes[6]])
                }
            }
            RecordSize::Bits32 => {
                let b = if side == 0 { &bytes[0..4] } else { &bytes[4..8] };
                u32::from_be_bytes([b[0], b[1], b[2], b[3]])
            }
        })
    }
}
