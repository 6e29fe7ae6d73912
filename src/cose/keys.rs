use alloc::{collections::BTreeMap, vec::Vec};

/// Resolves a one byte key id to key material.
///
/// For decryption the key is a raw 16 byte key-encryption key, for
/// verification a DER encoded public key.
pub trait KeyLookup {
    fn key(&self, key_id: u8) -> Option<Vec<u8>>;
}

impl<F> KeyLookup for F
where
    F: Fn(u8) -> Option<Vec<u8>>,
{
    fn key(&self, key_id: u8) -> Option<Vec<u8>> {
        self(key_id)
    }
}

impl KeyLookup for BTreeMap<u8, Vec<u8>> {
    fn key(&self, key_id: u8) -> Option<Vec<u8>> {
        self.get(&key_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_and_maps_resolve_keys() {
        let closure = |id: u8| if id == 7 { Some(vec![7; 16]) } else { None };
        assert_eq!(closure.key(7), Some(vec![7; 16]));
        assert_eq!(closure.key(8), None);

        let mut map = BTreeMap::new();
        map.insert(3u8, vec![1, 2, 3]);
        assert_eq!(map.key(3), Some(vec![1, 2, 3]));
        assert_eq!(map.key(4), None);
    }
}
