//! Data section decoding
//!
//! Decodes the self-describing MMDB value encoding used by both the data
//! section and the metadata section.
//!
//! # Supported Types
//!
//! - **Pointer**: Reference to another data item (followed transparently)
//! - **String**: UTF-8 text data (payloads that are not valid UTF-8
//!   come back as **Bytes**)
//! - **Double**: 64-bit floating point (IEEE 754)
//! - **Bytes**: Raw byte arrays
//! - **Uint16**: Unsigned integers of up to 4 payload bytes
//! - **Uint32**: Unsigned 32-bit integers
//! - **Map**: Key-value pairs (string keys)
//! - **Int32**: Signed 32-bit integers
//! - **Uint64**: Unsigned 64-bit integers
//! - **Uint128**: Unsigned 128-bit integers
//! - **Array**: Ordered lists of values
//! - **Bool**: Boolean values
//! - **Float**: 32-bit floating point (IEEE 754)
//!
//! # Format
//!
//! Control byte(s) followed by data. The top 3 bits of the control byte
//! select the type (0 means "read the real type from the next byte"), the
//! low 5 bits encode the payload size.
//!
//! See: https://maxmind.github.io/MaxMind-DB/

use crate::byte_source::ByteSource;
use crate::error::{MmdbError, Result, BAD_DATA};
use num_bigint::BigUint;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::collections::HashMap;
use std::fmt;

const TYPE_EXTENDED: usize = 0;
const TYPE_POINTER: usize = 1;
const TYPE_UTF8_STRING: usize = 2;
const TYPE_DOUBLE: usize = 3;
const TYPE_BYTES: usize = 4;
const TYPE_UINT16: usize = 5;
const TYPE_UINT32: usize = 6;
const TYPE_MAP: usize = 7;
const TYPE_INT32: usize = 8;
const TYPE_UINT64: usize = 9;
const TYPE_UINT128: usize = 10;
const TYPE_ARRAY: usize = 11;
const TYPE_BOOLEAN: usize = 14;
const TYPE_FLOAT: usize = 15;

/// Type names indexed by type number, for error messages
const TYPE_NAMES: [&str; 16] = [
    "extended",
    "pointer",
    "utf8_string",
    "double",
    "bytes",
    "uint16",
    "uint32",
    "map",
    "int32",
    "uint64",
    "uint128",
    "array",
    "container",
    "end_marker",
    "boolean",
    "float",
];

/// Value added to a pointer's magnitude, indexed by pointer size in bytes
const POINTER_VALUE_OFFSET: [usize; 5] = [0, 0, 2048, 526_336, 0];

/// Mask applied to the three size-extension bytes of a size-31 control byte
const SIZE_31_MASK: usize = 0x0FFF_FFFF >> 8;

/// Nesting limit for maps, arrays and pointer chains
const MAX_DEPTH: usize = 512;

/// Widest unsigned payload, in bytes, kept as a native integer
const NATIVE_UINT_BYTES: usize = std::mem::size_of::<u64>();

fn type_name(type_id: usize) -> String {
    TYPE_NAMES
        .get(type_id)
        .map(|name| name.to_string())
        .unwrap_or_else(|| type_id.to_string())
}

/// Unsigned integer that may not fit the native word.
///
/// Payloads up to 8 bytes wide decode to [`Unsigned::Native`]; wider ones
/// are accumulated losslessly into [`Unsigned::Big`]. The variant tells the
/// caller which representation the decoder chose. Equality compares values,
/// so `Native(5) == Big(5)`.
#[derive(Debug, Clone)]
pub enum Unsigned {
    /// Fits in a `u64`
    Native(u64),
    /// Arbitrary precision
    Big(BigUint),
}

impl Unsigned {
    /// Accumulate big-endian bytes, choosing the representation by width
    pub fn from_be_bytes(bytes: &[u8]) -> Self {
        if bytes.len() <= NATIVE_UINT_BYTES {
            Unsigned::Native(bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64))
        } else {
            Unsigned::Big(BigUint::from_bytes_be(bytes))
        }
    }

    /// True when the value is held as a native integer
    pub fn is_native(&self) -> bool {
        matches!(self, Unsigned::Native(_))
    }

    /// The native value, or `None` for the arbitrary-precision form
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Unsigned::Native(n) => Some(*n),
            Unsigned::Big(_) => None,
        }
    }

    /// The value as a `u128` if it fits, whatever the representation
    pub fn to_u128(&self) -> Option<u128> {
        match self {
            Unsigned::Native(n) => Some(*n as u128),
            Unsigned::Big(b) => u128::try_from(b).ok(),
        }
    }

    /// The value as an arbitrary-precision integer (always succeeds)
    pub fn to_biguint(&self) -> BigUint {
        match self {
            Unsigned::Native(n) => BigUint::from(*n),
            Unsigned::Big(b) => b.clone(),
        }
    }
}

impl PartialEq for Unsigned {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Unsigned::Native(a), Unsigned::Native(b)) => a == b,
            _ => self.to_biguint() == other.to_biguint(),
        }
    }
}

impl Eq for Unsigned {}

impl From<u64> for Unsigned {
    fn from(n: u64) -> Self {
        Unsigned::Native(n)
    }
}

impl From<BigUint> for Unsigned {
    fn from(n: BigUint) -> Self {
        Unsigned::Big(n)
    }
}

/// Canonical decimal form
impl fmt::Display for Unsigned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unsigned::Native(n) => write!(f, "{}", n),
            Unsigned::Big(b) => write!(f, "{}", b),
        }
    }
}

/// Native values serialize as numbers, wide ones as decimal strings
impl Serialize for Unsigned {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Unsigned::Native(n) => serializer.serialize_u64(*n),
            Unsigned::Big(b) => serializer.serialize_str(&b.to_string()),
        }
    }
}

/// A decoded data section value
///
/// Containers own their children. Pointers are resolved during decoding
/// and never appear in a decoded tree.
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    /// UTF-8 string
    String(String),
    /// IEEE 754 double precision float
    Double(f64),
    /// Raw byte array
    Bytes(Vec<u8>),
    /// uint16; the payload may be up to 4 bytes wide, so the value is
    /// carried in a `u32`
    Uint16(u32),
    /// Unsigned 32-bit integer
    Uint32(u32),
    /// Key-value map (string keys only)
    Map(HashMap<String, DataValue>),
    /// Signed 32-bit integer
    Int32(i32),
    /// Unsigned 64-bit integer
    Uint64(Unsigned),
    /// Unsigned 128-bit integer
    Uint128(Unsigned),
    /// Array of values
    Array(Vec<DataValue>),
    /// Boolean value
    Bool(bool),
    /// IEEE 754 single precision float
    Float(f32),
}

impl DataValue {
    /// Look up a key if this value is a map
    pub fn get(&self, key: &str) -> Option<&DataValue> {
        self.as_map()?.get(key)
    }

    /// Borrow the string if this is a `String`
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the map if this is a `Map`
    pub fn as_map(&self) -> Option<&HashMap<String, DataValue>> {
        match self {
            DataValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Borrow the elements if this is an `Array`
    pub fn as_array(&self) -> Option<&[DataValue]> {
        match self {
            DataValue::Array(a) => Some(a),
            _ => None,
        }
    }

    /// The flag if this is a `Bool`
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DataValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Any unsigned integer type that fits in a `u64`
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            DataValue::Uint16(n) => Some(*n as u64),
            DataValue::Uint32(n) => Some(*n as u64),
            DataValue::Uint64(n) | DataValue::Uint128(n) => n.as_u64(),
            _ => None,
        }
    }

    /// Either float type, widened to `f64`
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DataValue::Double(d) => Some(*d),
            DataValue::Float(f) => Some(*f as f64),
            _ => None,
        }
    }

    /// Convert to a JSON value (bytes become arrays of numbers, wide
    /// integers become decimal strings)
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::json;

        match self {
            DataValue::String(s) => json!(s),
            DataValue::Double(d) => json!(d),
            DataValue::Bytes(b) => json!(b),
            DataValue::Uint16(u) => json!(u),
            DataValue::Uint32(u) => json!(u),
            DataValue::Uint64(u) | DataValue::Uint128(u) => match u {
                Unsigned::Native(n) => json!(n),
                Unsigned::Big(b) => json!(b.to_string()),
            },
            DataValue::Int32(i) => json!(i),
            DataValue::Bool(b) => json!(b),
            DataValue::Float(f) => json!(f),
            DataValue::Map(entries) => {
                let mut map = serde_json::Map::new();
                for (k, v) in entries {
                    map.insert(k.clone(), v.to_json());
                }
                serde_json::Value::Object(map)
            }
            DataValue::Array(items) => {
                serde_json::Value::Array(items.iter().map(DataValue::to_json).collect())
            }
        }
    }
}

impl Serialize for DataValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            DataValue::String(s) => serializer.serialize_str(s),
            DataValue::Double(d) => serializer.serialize_f64(*d),
            DataValue::Bytes(b) => {
                let mut seq = serializer.serialize_seq(Some(b.len()))?;
                for byte in b {
                    seq.serialize_element(byte)?;
                }
                seq.end()
            }
            DataValue::Uint16(n) => serializer.serialize_u32(*n),
            DataValue::Uint32(n) => serializer.serialize_u32(*n),
            DataValue::Map(m) => {
                let mut map = serializer.serialize_map(Some(m.len()))?;
                for (k, v) in m {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            DataValue::Int32(n) => serializer.serialize_i32(*n),
            DataValue::Uint64(n) | DataValue::Uint128(n) => n.serialize(serializer),
            DataValue::Array(a) => {
                let mut seq = serializer.serialize_seq(Some(a.len()))?;
                for v in a {
                    seq.serialize_element(v)?;
                }
                seq.end()
            }
            DataValue::Bool(b) => serializer.serialize_bool(*b),
            DataValue::Float(f) => serializer.serialize_f32(*f),
        }
    }
}

/// Data section decoder
///
/// Decodes values at absolute offsets of a [`ByteSource`]. Pointer targets
/// are relative to `pointer_base`: the start of the data section for
/// record data, the start of the metadata map for metadata.
///
/// The decoder holds no state between calls and can be shared freely.
pub struct DataDecoder<'a, S: ByteSource + ?Sized> {
    source: &'a S,
    pointer_base: usize,
}

impl<'a, S: ByteSource + ?Sized> DataDecoder<'a, S> {
    /// Create a decoder over `source`
    ///
    /// # Arguments
    /// * `source` - Bytes holding the encoded values
    /// * `pointer_base` - Absolute offset that pointer values are relative to
    pub fn new(source: &'a S, pointer_base: usize) -> Self {
        Self {
            source,
            pointer_base,
        }
    }

    /// Decode the value at `offset`.
    ///
    /// Returns the value and the offset just past its encoding. For a
    /// pointer that is the offset after the pointer bytes, not after the
    /// target it resolved to.
    pub fn decode(&self, offset: usize) -> Result<(DataValue, usize)> {
        let mut cursor = offset;
        let value = self.decode_at(&mut cursor, 0)?;
        Ok((value, cursor))
    }

    fn decode_at(&self, cursor: &mut usize, depth: usize) -> Result<DataValue> {
        if depth > MAX_DEPTH {
            return Err(depth_exceeded());
        }

        let ctrl = self.source.read_u8(*cursor)?;
        *cursor += 1;

        let mut type_id = (ctrl >> 5) as usize;

        // Pointers reuse the size bits for their own width and are followed
        // from a scratch cursor so the caller resumes after the pointer.
        if type_id == TYPE_POINTER {
            let mut target = self.read_pointer(ctrl, cursor)?;
            return self.decode_at(&mut target, depth + 1);
        }

        if type_id == TYPE_EXTENDED {
            let next = self.source.read_u8(*cursor)?;
            *cursor += 1;
            type_id = next as usize + 7;
            if type_id < TYPE_INT32 {
                return Err(MmdbError::InvalidFormat(format!(
                    "Something went horribly wrong in the decoder. An extended type resolved to a type number < 8 ({})",
                    type_id
                )));
            }
        }

        let size = self.size_from_ctrl(ctrl, cursor)?;

        match type_id {
            TYPE_MAP => self.decode_map(size, cursor, depth),
            TYPE_ARRAY => self.decode_array(size, cursor, depth),
            // Booleans keep their value in the size bits and have no payload
            TYPE_BOOLEAN => Ok(DataValue::Bool(size != 0)),
            TYPE_UTF8_STRING | TYPE_DOUBLE | TYPE_BYTES | TYPE_UINT16 | TYPE_UINT32
            | TYPE_INT32 | TYPE_UINT64 | TYPE_UINT128 | TYPE_FLOAT => {
                let bytes = self.source.read(*cursor, size)?;
                *cursor += size;
                decode_scalar(type_id, bytes)
            }
            _ => Err(MmdbError::InvalidFormat(format!(
                "Unknown or unexpected type: {}",
                type_name(type_id)
            ))),
        }
    }

    /// Resolve a pointer control byte to an absolute offset, advancing
    /// `cursor` past the pointer's own bytes
    fn read_pointer(&self, ctrl: u8, cursor: &mut usize) -> Result<usize> {
        let pointer_size = ((ctrl >> 3) & 0x3) as usize + 1;
        let bytes = self.source.read(*cursor, pointer_size)?;
        *cursor += pointer_size;

        // Sizes 1-3 borrow the low 3 bits of the control byte as a leading byte
        let leading = if pointer_size == 4 {
            0
        } else {
            (ctrl & 0x7) as usize
        };
        let magnitude = bytes
            .iter()
            .fold(leading, |acc, &b| (acc << 8) | b as usize);

        self.pointer_base
            .checked_add(POINTER_VALUE_OFFSET[pointer_size])
            .and_then(|base| base.checked_add(magnitude))
            .ok_or_else(|| {
                MmdbError::InvalidFormat(format!(
                    "Pointer {} overflows the address space (base {})",
                    magnitude, self.pointer_base
                ))
            })
    }

    /// Payload size from the low 5 bits of `ctrl`, reading 0-3 extension bytes
    fn size_from_ctrl(&self, ctrl: u8, cursor: &mut usize) -> Result<usize> {
        let size = (ctrl & 0x1F) as usize;
        if size < 29 {
            return Ok(size);
        }

        let bytes_to_read = size - 28;
        let bytes = self.source.read(*cursor, bytes_to_read)?;
        *cursor += bytes_to_read;
        let extra = bytes.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize);

        Ok(match size {
            29 => 29 + extra,
            30 => 285 + extra,
            _ => 65_821 + (extra & SIZE_31_MASK),
        })
    }

    fn decode_map(&self, size: usize, cursor: &mut usize, depth: usize) -> Result<DataValue> {
        // Cap the preallocation; a corrupt size must not reserve gigabytes
        let mut map = HashMap::with_capacity(size.min(64));

        for _ in 0..size {
            let key = self.decode_key(cursor, depth + 1)?;
            let value = self.decode_at(cursor, depth + 1)?;
            map.insert(key, value);
        }

        Ok(DataValue::Map(map))
    }

    /// Map keys are utf8_string values, possibly behind pointers. Invalid
    /// UTF-8 is replaced with U+FFFD so the rest of the map stays readable.
    fn decode_key(&self, cursor: &mut usize, depth: usize) -> Result<String> {
        if depth > MAX_DEPTH {
            return Err(depth_exceeded());
        }

        let ctrl = self.source.read_u8(*cursor)?;
        match (ctrl >> 5) as usize {
            TYPE_POINTER => {
                *cursor += 1;
                let mut target = self.read_pointer(ctrl, cursor)?;
                self.decode_key(&mut target, depth + 1)
            }
            TYPE_UTF8_STRING => {
                *cursor += 1;
                let size = self.size_from_ctrl(ctrl, cursor)?;
                let bytes = self.source.read(*cursor, size)?;
                *cursor += size;
                Ok(String::from_utf8_lossy(bytes).into_owned())
            }
            _ => {
                let other = self.decode_at(cursor, depth)?;
                Err(MmdbError::InvalidFormat(format!(
                    "Map key must be a utf8_string, found {:?}",
                    other
                )))
            }
        }
    }

    fn decode_array(&self, size: usize, cursor: &mut usize, depth: usize) -> Result<DataValue> {
        let mut array = Vec::with_capacity(size.min(64));

        for _ in 0..size {
            array.push(self.decode_at(cursor, depth + 1)?);
        }

        Ok(DataValue::Array(array))
    }
}

fn depth_exceeded() -> MmdbError {
    MmdbError::InvalidFormat(format!(
        "Exceeded maximum data structure depth ({}); the data section may contain a pointer cycle",
        MAX_DEPTH
    ))
}

fn bad_data() -> MmdbError {
    MmdbError::InvalidFormat(BAD_DATA.to_string())
}

/// Interpret a fixed payload by type
fn decode_scalar(type_id: usize, bytes: &[u8]) -> Result<DataValue> {
    match type_id {
        TYPE_UTF8_STRING => Ok(match std::str::from_utf8(bytes) {
            Ok(s) => DataValue::String(s.to_string()),
            Err(_) => DataValue::Bytes(bytes.to_vec()),
        }),
        TYPE_BYTES => Ok(DataValue::Bytes(bytes.to_vec())),
        TYPE_DOUBLE => {
            let bytes: [u8; 8] = bytes.try_into().map_err(|_| bad_data())?;
            Ok(DataValue::Double(f64::from_be_bytes(bytes)))
        }
        TYPE_FLOAT => {
            let bytes: [u8; 4] = bytes.try_into().map_err(|_| bad_data())?;
            Ok(DataValue::Float(f32::from_be_bytes(bytes)))
        }
        TYPE_UINT16 | TYPE_UINT32 => {
            if bytes.len() > 4 {
                return Err(bad_data());
            }
            let n = accumulate(bytes) as u32;
            Ok(if type_id == TYPE_UINT16 {
                DataValue::Uint16(n)
            } else {
                DataValue::Uint32(n)
            })
        }
        TYPE_INT32 => {
            if bytes.len() > 4 {
                return Err(bad_data());
            }
            // Left-pad to 4 bytes, then reinterpret as two's complement
            let mut padded = [0u8; 4];
            padded[4 - bytes.len()..].copy_from_slice(bytes);
            Ok(DataValue::Int32(i32::from_be_bytes(padded)))
        }
        TYPE_UINT64 => Ok(DataValue::Uint64(Unsigned::from_be_bytes(bytes))),
        TYPE_UINT128 => Ok(DataValue::Uint128(Unsigned::from_be_bytes(bytes))),
        _ => Err(MmdbError::InvalidFormat(format!(
            "Unknown or unexpected type: {}",
            type_name(type_id)
        ))),
    }
}

/// Big-endian accumulation for payloads of at most 4 bytes
fn accumulate(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32)
}
