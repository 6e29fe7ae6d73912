//! Protected and unprotected header maps.
//!
//! Protected headers are authenticated as the exact bytes they encode to, so
//! a map is put into canonical key order before it is encoded anywhere.

use alloc::vec::Vec;
use core::cmp::Ordering;
use serde_cbor::Value;

use super::{Error, Result};
use crate::cbor::{self, ValueExt};

/// An ordered mapping from header labels to values.
///
/// Entries keep insertion order until [`HeaderMap::canonicalize`] is called.
/// Inserting an existing label replaces its value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderMap {
    entries: Vec<(Value, Value)>,
}

impl HeaderMap {
    pub fn new() -> HeaderMap {
        HeaderMap::default()
    }

    /// Sets an integer label.
    pub fn insert(&mut self, label: i64, value: Value) {
        self.insert_value(Value::Integer(i128::from(label)), value);
    }

    /// Sets a label of any CBOR type.
    pub fn insert_value(&mut self, label: Value, value: Value) {
        match self.entries.iter_mut().find(|(k, _)| *k == label) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((label, value)),
        }
    }

    pub fn get(&self, label: i64) -> Option<&Value> {
        let label = Value::Integer(i128::from(label));
        self.entries.iter().find(|(k, _)| *k == label).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sorts the entries by their encoded keys: shorter encodings first,
    /// equal lengths bytewise.
    pub fn canonicalize(&mut self) -> Result<()> {
        let mut keyed = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            keyed.push((cbor::encode(&entry.0)?, entry.clone()));
        }
        keyed.sort_by(|a, b| canonical_cmp(&a.0, &b.0));
        self.entries = keyed.into_iter().map(|(_, entry)| entry).collect();
        Ok(())
    }

    /// Encodes the map in its current entry order.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        cbor::write_header(&mut out, cbor::MAJOR_MAP, self.entries.len() as u64);
        for (label, value) in &self.entries {
            out.extend(cbor::encode(label)?);
            out.extend(cbor::encode(value)?);
        }
        Ok(out)
    }

    /// Returns the contents of the protected header byte string: nothing for
    /// an empty map, the encoded map otherwise.
    pub fn encode_protected(&self) -> Result<Vec<u8>> {
        if self.is_empty() {
            return Ok(Vec::new());
        }
        self.encode()
    }

    /// Builds a header map from a decoded map item.
    pub fn from_value(value: &Value) -> Result<HeaderMap> {
        let map = value.map().ok_or(Error::Structure("headers are not a map"))?;
        Ok(HeaderMap {
            entries: map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        })
    }

    /// Decodes the contents of a protected header byte string.
    pub fn decode_protected(bytes: &[u8]) -> Result<HeaderMap> {
        if bytes.is_empty() {
            return Ok(HeaderMap::new());
        }
        HeaderMap::from_value(&cbor::decode(bytes)?)
    }
}

fn canonical_cmp(a: &[u8], b: &[u8]) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}
