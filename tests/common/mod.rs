//! Test-only MMDB writer and fixture databases
//!
//! The crate only reads databases, so integration tests build their
//! fixtures here: a data section encoder, an arena-allocated trie builder,
//! and a metadata writer. The shapes mirror the MaxMind test databases.

#![allow(dead_code)]

use mmdb_reader::{DataValue, Unsigned};
use num_bigint::BigUint;
use std::collections::HashMap;
use std::io::Write;
use std::net::IpAddr;
use tempfile::NamedTempFile;

pub const METADATA_MARKER: &[u8] = b"\xAB\xCD\xEFMaxMind.com";
pub const BUILD_EPOCH: u64 = 1_704_067_200;

// ---------------------------------------------------------------------------
// Data section encoder
// ---------------------------------------------------------------------------

/// Appends encoded values, returning their offsets
#[derive(Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Append raw, possibly malformed, bytes
    pub fn raw(&mut self, bytes: &[u8]) -> u32 {
        let offset = self.buf.len() as u32;
        self.buf.extend_from_slice(bytes);
        offset
    }

    pub fn encode(&mut self, value: &DataValue) -> u32 {
        let offset = self.buf.len() as u32;
        self.write_value(value);
        offset
    }

    /// Pointer with the smallest encoding that reaches `target`
    pub fn pointer(&mut self, target: u32) -> u32 {
        let offset = self.buf.len() as u32;
        let target = target as u64;
        if target < 2048 {
            self.buf.push(0x20 | ((target >> 8) & 0x7) as u8);
            self.buf.push(target as u8);
        } else if target < 526_336 {
            let v = target - 2048;
            self.buf.push(0x28 | ((v >> 16) & 0x7) as u8);
            self.buf.extend_from_slice(&(v as u16).to_be_bytes());
        } else if target < 134_744_064 {
            let v = target - 526_336;
            self.buf.push(0x30 | ((v >> 24) & 0x7) as u8);
            self.buf.extend_from_slice(&(v as u32).to_be_bytes()[1..]);
        } else {
            self.buf.push(0x38);
            self.buf.extend_from_slice(&(target as u32).to_be_bytes());
        }
        offset
    }

    /// Reserve a two-byte pointer to be filled in by [`Encoder::patch_pointer`]
    pub fn pointer_placeholder(&mut self) -> usize {
        let pos = self.buf.len();
        self.buf.extend_from_slice(&[0x20, 0x00]);
        pos
    }

    pub fn patch_pointer(&mut self, pos: usize, target: u32) {
        assert!(target < 2048, "placeholder pointers hold 11 bits");
        self.buf[pos] = 0x20 | ((target >> 8) & 0x7) as u8;
        self.buf[pos + 1] = target as u8;
    }

    pub fn ctrl(&mut self, type_id: u8, size: usize) {
        let (size_bits, extra): (u8, Vec<u8>) = if size < 29 {
            (size as u8, vec![])
        } else if size < 285 {
            (29, vec![(size - 29) as u8])
        } else if size < 65_821 {
            (30, ((size - 285) as u16).to_be_bytes().to_vec())
        } else {
            (31, ((size - 65_821) as u32).to_be_bytes()[1..].to_vec())
        };

        if type_id <= 7 {
            self.buf.push((type_id << 5) | size_bits);
        } else {
            self.buf.push(size_bits);
            self.buf.push(type_id - 7);
        }
        self.buf.extend_from_slice(&extra);
    }

    pub fn string(&mut self, s: &str) -> u32 {
        let offset = self.buf.len() as u32;
        self.ctrl(2, s.len());
        self.buf.extend_from_slice(s.as_bytes());
        offset
    }

    fn uint(&mut self, type_id: u8, be_bytes: &[u8]) {
        let first = be_bytes.iter().position(|&b| b != 0).unwrap_or(be_bytes.len());
        let payload = &be_bytes[first..];
        self.ctrl(type_id, payload.len());
        self.buf.extend_from_slice(payload);
    }

    fn write_value(&mut self, value: &DataValue) {
        match value {
            DataValue::String(s) => {
                self.string(s);
            }
            DataValue::Double(d) => {
                self.ctrl(3, 8);
                self.buf.extend_from_slice(&d.to_be_bytes());
            }
            DataValue::Bytes(b) => {
                self.ctrl(4, b.len());
                self.buf.extend_from_slice(b);
            }
            DataValue::Uint16(n) => self.uint(5, &n.to_be_bytes()),
            DataValue::Uint32(n) => self.uint(6, &n.to_be_bytes()),
            DataValue::Map(m) => {
                self.ctrl(7, m.len());
                let mut keys: Vec<_> = m.keys().collect();
                keys.sort();
                for key in keys {
                    self.string(key);
                    self.write_value(&m[key]);
                }
            }
            DataValue::Int32(n) => {
                if *n < 0 {
                    self.ctrl(8, 4);
                    self.buf.extend_from_slice(&n.to_be_bytes());
                } else {
                    self.uint(8, &n.to_be_bytes());
                }
            }
            DataValue::Uint64(n) => self.uint(9, &n.to_biguint().to_bytes_be()),
            DataValue::Uint128(n) => self.uint(10, &n.to_biguint().to_bytes_be()),
            DataValue::Array(items) => {
                self.ctrl(11, items.len());
                for item in items {
                    self.write_value(item);
                }
            }
            DataValue::Bool(b) => self.ctrl(14, *b as usize),
            DataValue::Float(f) => {
                self.ctrl(15, 4);
                self.buf.extend_from_slice(&f.to_be_bytes());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Value helpers
// ---------------------------------------------------------------------------

pub fn s(v: &str) -> DataValue {
    DataValue::String(v.to_string())
}

pub fn map(entries: &[(&str, DataValue)]) -> DataValue {
    DataValue::Map(
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect::<HashMap<_, _>>(),
    )
}

pub fn uints(values: &[u32]) -> DataValue {
    DataValue::Array(values.iter().map(|&v| DataValue::Uint32(v)).collect())
}

pub fn decoder_record() -> DataValue {
    map(&[
        ("array", uints(&[1, 2, 3])),
        ("boolean", DataValue::Bool(true)),
        ("bytes", DataValue::Bytes(vec![0, 0, 0, 42])),
        ("double", DataValue::Double(42.123456)),
        ("float", DataValue::Float(1.1)),
        ("int32", DataValue::Int32(-268_435_456)),
        (
            "map",
            map(&[(
                "mapX",
                map(&[("arrayX", uints(&[7, 8, 9])), ("utf8_stringX", s("hello"))]),
            )]),
        ),
        (
            "uint128",
            DataValue::Uint128(Unsigned::Big(BigUint::from(1u8) << 120)),
        ),
        ("uint16", DataValue::Uint16(100)),
        ("uint32", DataValue::Uint32(268_435_456)),
        (
            "uint64",
            DataValue::Uint64(Unsigned::Native(1_152_921_504_606_846_976)),
        ),
        ("utf8_string", s("unicode! ☯ - ♫")),
    ])
}

pub fn zeros_record() -> DataValue {
    map(&[
        ("array", DataValue::Array(vec![])),
        ("boolean", DataValue::Bool(false)),
        ("bytes", DataValue::Bytes(vec![])),
        ("double", DataValue::Double(0.0)),
        ("float", DataValue::Float(0.0)),
        ("int32", DataValue::Int32(0)),
        ("map", DataValue::Map(HashMap::new())),
        ("uint128", DataValue::Uint128(Unsigned::Native(0))),
        ("uint16", DataValue::Uint16(0)),
        ("uint32", DataValue::Uint32(0)),
        ("uint64", DataValue::Uint64(Unsigned::Native(0))),
        ("utf8_string", s("")),
    ])
}

pub fn max_record() -> DataValue {
    map(&[
        ("double", DataValue::Double(f64::INFINITY)),
        ("float", DataValue::Float(f32::INFINITY)),
        ("int32", DataValue::Int32(i32::MAX)),
        ("uint16", DataValue::Uint16(65_535)),
        ("uint32", DataValue::Uint32(u32::MAX)),
        ("uint64", DataValue::Uint64(Unsigned::Native(u64::MAX))),
        (
            "uint128",
            DataValue::Uint128(Unsigned::Big(BigUint::from(u128::MAX))),
        ),
    ])
}

// ---------------------------------------------------------------------------
// Search tree builder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Record {
    Node(u32),
    /// Data section offset and the prefix length that produced it
    Data(u32, u8),
    Empty,
}

#[derive(Debug, Clone, Copy)]
struct Node {
    left: Record,
    right: Record,
}

impl Node {
    fn empty() -> Self {
        Node {
            left: Record::Empty,
            right: Record::Empty,
        }
    }

    fn child(&self, bit: u8) -> Record {
        if bit == 0 {
            self.left
        } else {
            self.right
        }
    }

    fn set_child(&mut self, bit: u8, record: Record) {
        if bit == 0 {
            self.left = record;
        } else {
            self.right = record;
        }
    }
}

/// Arena trie; addresses are MSB-aligned in a u128
struct TreeBuilder {
    nodes: Vec<Node>,
}

impl TreeBuilder {
    fn new() -> Self {
        TreeBuilder {
            nodes: vec![Node::empty()],
        }
    }

    fn allocate(&mut self) -> u32 {
        self.nodes.push(Node::empty());
        (self.nodes.len() - 1) as u32
    }

    fn bit(bits: u128, depth: u8) -> u8 {
        ((bits >> (127 - depth as u32)) & 1) as u8
    }

    /// Walk to the parent of the record at `prefix_len`, creating nodes.
    /// A data leaf met on the way is split so it keeps covering its range.
    fn descend(&mut self, bits: u128, prefix_len: u8) -> u32 {
        let mut node = 0u32;
        for depth in 0..prefix_len.saturating_sub(1) {
            let bit = Self::bit(bits, depth);
            node = match self.nodes[node as usize].child(bit) {
                Record::Node(id) => id,
                Record::Empty => {
                    let id = self.allocate();
                    self.nodes[node as usize].set_child(bit, Record::Node(id));
                    id
                }
                data @ Record::Data(..) => {
                    let id = self.allocate();
                    self.nodes[id as usize] = Node {
                        left: data,
                        right: data,
                    };
                    self.nodes[node as usize].set_child(bit, Record::Node(id));
                    id
                }
            };
        }
        node
    }

    fn insert(&mut self, bits: u128, prefix_len: u8, offset: u32) {
        assert!(prefix_len > 0, "cannot insert a /0");
        let parent = self.descend(bits, prefix_len);
        let bit = Self::bit(bits, prefix_len - 1);

        match self.nodes[parent as usize].child(bit) {
            Record::Node(child) => self.backfill(child, offset, prefix_len),
            Record::Data(_, existing) if existing > prefix_len => {}
            _ => self.nodes[parent as usize].set_child(bit, Record::Data(offset, prefix_len)),
        }
    }

    /// Create the path to a network but leave its record empty
    fn reserve(&mut self, bits: u128, prefix_len: u8) {
        self.descend(bits, prefix_len);
    }

    /// Fill empty or less specific records under `node` with a less
    /// specific network inserted after more specific ones
    fn backfill(&mut self, node: u32, offset: u32, prefix_len: u8) {
        for bit in [0u8, 1] {
            match self.nodes[node as usize].child(bit) {
                Record::Node(child) => self.backfill(child, offset, prefix_len),
                Record::Data(_, existing) if existing >= prefix_len => {}
                _ => self.nodes[node as usize].set_child(bit, Record::Data(offset, prefix_len)),
            }
        }
    }

    /// Node reached by following `prefix_len` bits, if every step is a node
    fn node_at(&self, bits: u128, prefix_len: u8) -> Option<u32> {
        let mut node = 0u32;
        for depth in 0..prefix_len {
            match self.nodes[node as usize].child(Self::bit(bits, depth)) {
                Record::Node(id) => node = id,
                _ => return None,
            }
        }
        Some(node)
    }

    /// Point the record for `bits/prefix_len` at an existing node
    fn alias(&mut self, bits: u128, prefix_len: u8, target: u32) {
        let parent = self.descend(bits, prefix_len);
        let bit = Self::bit(bits, prefix_len - 1);
        self.nodes[parent as usize].set_child(bit, Record::Node(target));
    }

    fn record_value(record: Record, node_count: u32) -> u32 {
        match record {
            Record::Node(id) => id,
            Record::Data(offset, _) => node_count + 16 + offset,
            Record::Empty => node_count,
        }
    }

    fn write(&self, record_size: u16) -> (Vec<u8>, u32) {
        let node_count = self.nodes.len() as u32;
        let mut out = Vec::with_capacity(self.nodes.len() * record_size as usize / 4);

        for node in &self.nodes {
            let left = Self::record_value(node.left, node_count);
            let right = Self::record_value(node.right, node_count);
            push_node(&mut out, record_size, left, right);
        }

        (out, node_count)
    }
}

/// Serialize one node's two records
pub fn push_node(out: &mut Vec<u8>, record_size: u16, left: u32, right: u32) {
    match record_size {
        24 => {
            out.extend_from_slice(&left.to_be_bytes()[1..]);
            out.extend_from_slice(&right.to_be_bytes()[1..]);
        }
        28 => {
            out.extend_from_slice(&left.to_be_bytes()[1..]);
            out.push((((left >> 24) & 0x0F) << 4) as u8 | ((right >> 24) & 0x0F) as u8);
            out.extend_from_slice(&right.to_be_bytes()[1..]);
        }
        32 => {
            out.extend_from_slice(&left.to_be_bytes());
            out.extend_from_slice(&right.to_be_bytes());
        }
        other => panic!("unsupported record size {}", other),
    }
}

// ---------------------------------------------------------------------------
// Database builder
// ---------------------------------------------------------------------------

/// Metadata section contents; `raw` replaces the generated map entirely
pub struct MetadataSpec {
    pub database_type: String,
    pub languages: Vec<String>,
    pub description: Vec<(String, String)>,
    pub raw: Option<Vec<u8>>,
}

impl Default for MetadataSpec {
    fn default() -> Self {
        MetadataSpec {
            database_type: "Test".to_string(),
            languages: vec!["en".to_string(), "zh".to_string()],
            description: vec![
                ("en".to_string(), "Test Database".to_string()),
                ("zh".to_string(), "Test Database Chinese".to_string()),
            ],
            raw: None,
        }
    }
}

pub struct DbBuilder {
    ip_version: u16,
    record_size: u16,
    tree: TreeBuilder,
    data: Encoder,
    alias_ipv4_mapped: bool,
    pub metadata: MetadataSpec,
}

impl DbBuilder {
    pub fn new(ip_version: u16, record_size: u16) -> Self {
        DbBuilder {
            ip_version,
            record_size,
            tree: TreeBuilder::new(),
            data: Encoder::new(),
            alias_ipv4_mapped: false,
            metadata: MetadataSpec::default(),
        }
    }

    /// MSB-aligned bits and tree prefix length for a CIDR string
    fn network(&self, cidr: &str) -> (u128, u8) {
        let (addr, len) = cidr.split_once('/').unwrap_or((cidr, ""));
        let addr: IpAddr = addr.parse().unwrap();
        match (addr, self.ip_version) {
            (IpAddr::V4(v4), 4) => {
                let len = if len.is_empty() { 32 } else { len.parse().unwrap() };
                ((u32::from(v4) as u128) << 96, len)
            }
            (IpAddr::V4(v4), _) => {
                let len: u8 = if len.is_empty() { 32 } else { len.parse().unwrap() };
                (u32::from(v4) as u128, 96 + len)
            }
            (IpAddr::V6(v6), 6) => {
                let len = if len.is_empty() { 128 } else { len.parse().unwrap() };
                (u128::from(v6), len)
            }
            (IpAddr::V6(_), _) => panic!("IPv6 network {} in an IPv4 tree", cidr),
        }
    }

    pub fn insert(&mut self, cidr: &str, value: &DataValue) -> u32 {
        let offset = self.data.encode(value);
        self.insert_offset(cidr, offset);
        offset
    }

    /// Insert a network whose record holds raw (possibly invalid) bytes
    pub fn insert_raw(&mut self, cidr: &str, bytes: &[u8]) -> u32 {
        let offset = self.data.raw(bytes);
        self.insert_offset(cidr, offset);
        offset
    }

    /// Insert a network pointing at an arbitrary data section offset
    pub fn insert_offset(&mut self, cidr: &str, offset: u32) {
        let (bits, len) = self.network(cidr);
        self.tree.insert(bits, len, offset);
    }

    pub fn reserve(&mut self, cidr: &str) {
        let (bits, len) = self.network(cidr);
        self.tree.reserve(bits, len);
    }

    pub fn data(&mut self) -> &mut Encoder {
        &mut self.data
    }

    /// Make ::ffff:0:0/96 lead to the IPv4 subtree
    pub fn alias_ipv4_mapped(&mut self) -> &mut Self {
        self.alias_ipv4_mapped = true;
        self
    }

    fn metadata_bytes(&self, node_count: u32) -> Vec<u8> {
        if let Some(raw) = &self.metadata.raw {
            return raw.clone();
        }

        let spec = &self.metadata;
        let value = map(&[
            ("binary_format_major_version", DataValue::Uint16(2)),
            ("binary_format_minor_version", DataValue::Uint16(0)),
            ("build_epoch", DataValue::Uint64(Unsigned::Native(BUILD_EPOCH))),
            ("database_type", s(&spec.database_type)),
            (
                "description",
                DataValue::Map(
                    spec.description
                        .iter()
                        .map(|(k, v)| (k.clone(), s(v)))
                        .collect(),
                ),
            ),
            ("ip_version", DataValue::Uint16(self.ip_version.into())),
            (
                "languages",
                DataValue::Array(spec.languages.iter().map(|l| s(l)).collect()),
            ),
            ("node_count", DataValue::Uint32(node_count)),
            ("record_size", DataValue::Uint16(self.record_size.into())),
        ]);

        let mut encoder = Encoder::new();
        encoder.encode(&value);
        encoder.into_bytes()
    }

    pub fn build(mut self) -> Vec<u8> {
        if self.alias_ipv4_mapped {
            if let Some(ipv4_root) = self.tree.node_at(0, 96) {
                self.tree.alias(0xFFFF_u128 << 32, 96, ipv4_root);
            }
        }

        let (tree, node_count) = self.tree.write(self.record_size);
        let mut out = tree;
        out.extend_from_slice(&[0u8; 16]);
        out.extend_from_slice(&self.data.buf);
        out.extend_from_slice(METADATA_MARKER);
        out.extend(self.metadata_bytes(node_count));
        out
    }
}

// ---------------------------------------------------------------------------
// Fixture databases
// ---------------------------------------------------------------------------

pub const IPV4_NETWORKS: [&str; 6] = [
    "1.1.1.1/32",
    "1.1.1.2/31",
    "1.1.1.4/30",
    "1.1.1.8/29",
    "1.1.1.16/28",
    "1.1.1.32/32",
];

pub const IPV6_NETWORKS: [&str; 5] = [
    "::1:ffff:ffff/128",
    "::2:0:0/122",
    "::2:0:40/124",
    "::2:0:50/125",
    "::2:0:58/127",
];

fn ip_record(cidr: &str) -> DataValue {
    let addr = cidr.split('/').next().unwrap_or(cidr);
    map(&[("ip", s(addr))])
}

/// `{"ip": <network address>}` for each of 1.1.1.{1,2,4,8,16,32}
pub fn ipv4_test_db(record_size: u16) -> Vec<u8> {
    let mut builder = DbBuilder::new(4, record_size);
    for network in IPV4_NETWORKS {
        builder.insert(network, &ip_record(network));
    }
    builder.build()
}

/// `{"ip": <network address>}` for the ::1:ffff:ffff and ::2:0:xx networks.
/// 0.0.0.0/8 is reserved (path only) so the IPv4 subtree exists.
pub fn ipv6_test_db(record_size: u16) -> Vec<u8> {
    let mut builder = DbBuilder::new(6, record_size);
    for network in IPV6_NETWORKS {
        builder.insert(network, &ip_record(network));
    }
    builder.reserve("0.0.0.0/8");
    builder.alias_ipv4_mapped();
    builder.build()
}

/// Every data type at 1.1.1.0/24, zero values at ::, max values at
/// ::255.255.255.255
pub fn decoder_test_db() -> Vec<u8> {
    let mut builder = DbBuilder::new(6, 24);
    builder.metadata.database_type = "MaxMind DB Decoder Test".to_string();
    builder.insert("1.1.1.0/24", &decoder_record());
    builder.insert("0.0.0.0/32", &zeros_record());
    builder.insert("255.255.255.255/32", &max_record());
    builder.alias_ipv4_mapped();
    builder.build()
}

/// Only ::/64 is populated; IPv4 lookups land on it before the 96-bit walk ends
pub fn no_ipv4_search_tree_db() -> Vec<u8> {
    let mut builder = DbBuilder::new(6, 24);
    builder.insert("::/64", &s("::0/64"));
    builder.build()
}

/// 1.1.1.16/28 holds a data pointer past end-of-file; 1.1.1.32/32 has a
/// tree record pointing past end-of-file
pub fn broken_pointers_db() -> Vec<u8> {
    let mut builder = DbBuilder::new(4, 24);
    for network in &IPV4_NETWORKS[..4] {
        builder.insert(network, &ip_record(network));
    }
    builder.insert_raw("1.1.1.16/28", &[0x38, 0xFF, 0xFF, 0xFF, 0x00]);
    builder.insert_offset("1.1.1.32/32", 1_000_000);
    builder.build()
}

/// A double stored with a 7-byte payload at 2001:220::/32
pub fn broken_double_db() -> Vec<u8> {
    let mut builder = DbBuilder::new(6, 28);
    builder.metadata.database_type = "GeoIP2-City".to_string();
    builder.insert("2001:218::/32", &map(&[("location", map(&[("latitude", DataValue::Double(35.68))]))]));

    let mut raw = Encoder::new();
    raw.ctrl(7, 1);
    raw.string("location");
    raw.ctrl(7, 1);
    raw.string("latitude");
    raw.raw(&[0x67, 0x40, 0x41, 0xD7, 0x0A, 0x3D, 0x70, 0xA4]);
    builder.insert_raw("2001:220::/32", &raw.into_bytes());
    builder.build()
}

/// Metadata whose values and keys are reached through pointers
pub fn metadata_pointers_db() -> Vec<u8> {
    let mut builder = DbBuilder::new(4, 24);
    for network in IPV4_NETWORKS {
        builder.insert(network, &ip_record(network));
    }

    // node_count is only known once the tree is final; count it the same way
    let node_count = builder.tree.nodes.len() as u32;

    let mut meta = Encoder::new();
    meta.ctrl(7, 6);
    meta.string("database_type");
    let database_type = meta.pointer_placeholder();
    meta.string("languages");
    let languages = meta.pointer_placeholder();
    meta.string("description");
    let description = meta.pointer_placeholder();
    meta.string("node_count");
    meta.encode(&DataValue::Uint32(node_count));
    meta.string("record_size");
    meta.encode(&DataValue::Uint16(24));
    meta.string("ip_version");
    meta.encode(&DataValue::Uint16(4));

    let target = meta.string("Lots of pointers in metadata");
    meta.patch_pointer(database_type, target);
    let en = meta.string("en");
    let target = meta.len() as u32;
    meta.ctrl(11, 2);
    meta.pointer(en);
    meta.string("zh");
    meta.patch_pointer(languages, target);
    let target = meta.len() as u32;
    meta.ctrl(7, 1);
    meta.pointer(en);
    meta.string("Test Database");
    meta.patch_pointer(description, target);

    builder.metadata.raw = Some(meta.into_bytes());
    builder.build()
}

/// Write bytes to a temporary file that lives as long as the handle
pub fn temp_db(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}
