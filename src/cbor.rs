//! Thin layer over `serde_cbor` for the pieces of CBOR the COSE code needs to
//! control byte for byte: item headers, pre-encoded arrays and tags, and
//! parsing a single item off the front of a larger buffer.

use alloc::{collections::BTreeMap, vec::Vec};
use serde::{de::IgnoredAny, Deserialize, Serialize};
use serde_cbor::{Deserializer, Value};

use crate::cose::{Error, Result};

pub const MAJOR_BYTES: u8 = 2;
pub const MAJOR_ARRAY: u8 = 4;
pub const MAJOR_MAP: u8 = 5;
pub const MAJOR_TAG: u8 = 6;

/// Longest possible item header: initial byte plus an 8 byte argument.
pub const MAX_HEADER_LEN: usize = 9;

/// Serializes an object into CBOR.
pub fn encode(object: impl Serialize) -> Result<Vec<u8>> {
    Ok(serde_cbor::to_vec(&object)?)
}

/// Decodes a buffer holding exactly one CBOR item.
pub fn decode(bytes: &[u8]) -> Result<Value> {
    Ok(serde_cbor::from_slice(bytes)?)
}

/// Decodes the first CBOR item of `bytes`, returning it together with the
/// number of bytes it occupies. Trailing bytes are left alone.
pub fn decode_prefix(bytes: &[u8]) -> Result<(Value, usize)> {
    let mut de = Deserializer::from_slice(bytes);
    let value = Value::deserialize(&mut de)?;
    Ok((value, de.byte_offset()))
}

/// Returns the encoded length of the first CBOR item of `bytes` without
/// building it.
pub fn item_len(bytes: &[u8]) -> Result<usize> {
    let mut de = Deserializer::from_slice(bytes);
    IgnoredAny::deserialize(&mut de)?;
    Ok(de.byte_offset())
}

/// Number of bytes a header with argument `arg` takes.
pub fn header_len(arg: u64) -> usize {
    match arg {
        0..=23 => 1,
        24..=0xFF => 2,
        0x100..=0xFFFF => 3,
        0x1_0000..=0xFFFF_FFFF => 5,
        _ => 9,
    }
}

/// Appends the shortest header for the given major type and argument.
pub fn write_header(out: &mut Vec<u8>, major: u8, arg: u64) {
    let initial = major << 5;
    match header_len(arg) {
        1 => out.push(initial | arg as u8),
        2 => {
            out.push(initial | 24);
            out.push(arg as u8);
        }
        3 => {
            out.push(initial | 25);
            out.extend(&(arg as u16).to_be_bytes());
        }
        5 => {
            out.push(initial | 26);
            out.extend(&(arg as u32).to_be_bytes());
        }
        _ => {
            out.push(initial | 27);
            out.extend(&arg.to_be_bytes());
        }
    }
}

/// Returns the header of a byte string of length `len`.
pub fn bstr_header(len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(MAX_HEADER_LEN);
    write_header(&mut out, MAJOR_BYTES, len as u64);
    out
}

/// Encodes a byte string.
pub fn encode_bytes(bytes: &[u8]) -> Vec<u8> {
    let mut out = bstr_header(bytes.len());
    out.extend(bytes);
    out
}

/// Wraps already encoded items into a CBOR array.
pub fn encode_array(items: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::with_capacity(items.iter().map(Vec::len).sum::<usize>() + 1);
    write_header(&mut out, MAJOR_ARRAY, items.len() as u64);
    for item in items {
        out.extend(item);
    }
    out
}

/// Prefixes an already encoded item with a semantic tag.
pub fn encode_tagged(tag: u64, item: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(item.len() + MAX_HEADER_LEN);
    write_header(&mut out, MAJOR_TAG, tag);
    out.extend(item);
    out
}

/// The decoded initial bytes of a CBOR item.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Header {
    pub major: u8,
    pub arg: u64,
    /// Number of bytes the header itself occupies.
    pub len: usize,
}

/// Reads the header of the item starting at `bytes[0]`.
///
/// Only definite lengths are accepted; indefinite-length and reserved
/// additional information values are rejected.
pub fn read_header(bytes: &[u8]) -> Result<Header> {
    let initial = *bytes.first().ok_or(Error::Structure("truncated CBOR item"))?;
    let major = initial >> 5;
    let info = initial & 0x1F;
    let (arg, len) = match info {
        0..=23 => (u64::from(info), 1),
        24..=27 => {
            let width = 1usize << (info - 24);
            let raw = bytes
                .get(1..1 + width)
                .ok_or(Error::Structure("truncated CBOR item header"))?;
            let arg = raw.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
            (arg, 1 + width)
        }
        _ => return Err(Error::Structure("unsupported CBOR length encoding")),
    };
    Ok(Header { major, arg, len })
}

/// Reads the semantic tags in front of an item, returning them outermost
/// first together with the offset of the tagged item.
pub fn read_tags(bytes: &[u8]) -> Result<(Vec<u64>, usize)> {
    let mut tags = Vec::new();
    let mut pos = 0;
    loop {
        let header = read_header(&bytes[pos..])?;
        if header.major != MAJOR_TAG {
            return Ok((tags, pos));
        }
        tags.push(header.arg);
        pos += header.len;
    }
}

/// Failable accessors on a decoded item tree.
pub trait ValueExt {
    fn array(&self) -> Option<&Vec<Value>>;
    fn map(&self) -> Option<&BTreeMap<Value, Value>>;
    fn bstr(&self) -> Option<&[u8]>;
    fn int(&self) -> Option<i128>;
    fn boolean(&self) -> Option<bool>;
    /// Looks up an integer label in a map item.
    fn get_label(&self, label: i64) -> Option<&Value>;
}

impl ValueExt for Value {
    fn array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    fn map(&self) -> Option<&BTreeMap<Value, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    fn bstr(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    fn int(&self) -> Option<i128> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    fn boolean(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    fn get_label(&self, label: i64) -> Option<&Value> {
        self.map()?.get(&Value::Integer(i128::from(label)))
    }
}
