//! `COSE_Sign1` creation and the general (parsing) verifier.

use alloc::vec::Vec;
use serde_cbor::Value;

use super::{
    cose_error, crypto, signature, structure, Error, HeaderMap, Result, COSE_ALG_ECDSA_256,
    COSE_LABEL_ALG, COSE_LABEL_KID, COSE_TAG_SIGN1, ECDSA_SIGNATURE_SIZE,
};
use crate::cbor::{self, ValueExt};

/// A `COSE_Sign1` object as produced by [`sign`].
#[derive(Debug, Clone, PartialEq)]
pub struct CoseSign1 {
    /// Encoded protected headers, exactly as signed.
    pub protected: Vec<u8>,
    pub unprotected: HeaderMap,
    /// `None` for a detached payload.
    pub payload: Option<Vec<u8>>,
    pub signature: [u8; ECDSA_SIGNATURE_SIZE],
    pub tagged: bool,
}

impl CoseSign1 {
    /// Returns the CBOR encoding, prefixed with tag 18 if `tagged` is set.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = match &self.payload {
            Some(payload) => cbor::encode_bytes(payload),
            None => cbor::encode(Value::Null)?,
        };
        let array = cbor::encode_array(&[
            cbor::encode_bytes(&self.protected),
            self.unprotected.encode()?,
            payload,
            cbor::encode_bytes(&self.signature),
        ]);
        if self.tagged {
            Ok(cbor::encode_tagged(COSE_TAG_SIGN1, array))
        } else {
            Ok(array)
        }
    }
}

/// Signs `data` with ECDSA P-256/SHA-256.
///
/// The algorithm is added to `protected` and `key_id` to `unprotected` before
/// both maps are canonicalized. With `detach` the payload slot holds `null`
/// and the caller is responsible for transporting `data`.
pub fn sign(
    key: &[u8],
    key_id: u8,
    data: &[u8],
    mut protected: HeaderMap,
    mut unprotected: HeaderMap,
    detach: bool,
    tagged: bool,
) -> Result<CoseSign1> {
    protected.insert(COSE_LABEL_ALG, Value::Integer(COSE_ALG_ECDSA_256.into()));
    unprotected.insert(COSE_LABEL_KID, Value::Bytes(vec![key_id]));
    protected.canonicalize()?;
    unprotected.canonicalize()?;

    let protected = protected.encode_protected()?;
    let to_be_signed = structure::sig_structure(&protected, data)?;
    let digest = crypto::sha256(&to_be_signed);
    let der = crypto::sign_digest(key, &digest)?;
    let signature = signature::der_to_cose(&der).map_err(|e| {
        cose_error!("Error converting signature to COSE format");
        e
    })?;
    log::debug!("Signed {} bytes with key id {}", data.len(), key_id);

    Ok(CoseSign1 {
        protected,
        unprotected,
        payload: if detach { None } else { Some(data.to_vec()) },
        signature,
        tagged,
    })
}

/// Returns the encoded length of the `COSE_Sign1` object at the start of
/// `data`, or `None` if `data` does not start with a CBOR item carrying tag 18.
///
/// Bytes following the object (such as a detached payload) are ignored.
pub fn is_signed(data: &[u8]) -> Option<usize> {
    let (tags, start) = cbor::read_tags(data).ok()?;
    if !tags.contains(&COSE_TAG_SIGN1) {
        return None;
    }
    let len = cbor::item_len(&data[start..]).ok()?;
    Some(start + len)
}

/// Verifies a `COSE_Sign1` object against a DER encoded public key.
///
/// The payload is either embedded in the object or passed as `detached`;
/// supplying both is an error. The protected header bytes are used exactly
/// as found in the object.
pub fn verify(sign1: &[u8], detached: &[u8], public_key: &[u8]) -> Result<()> {
    let (_, start) = cbor::read_tags(sign1)?;
    let item = cbor::decode(&sign1[start..]).map_err(|e| {
        cose_error!("Passed-in COSE_Sign1 is not valid CBOR");
        e
    })?;
    let array = match item.array() {
        Some(array) if array.len() == 4 => array,
        _ => {
            cose_error!("Value for COSE_Sign1 is not an array of size 4");
            return Err(Error::Structure("COSE_Sign1 is not an array of size 4"));
        }
    };

    let protected = array[0].bstr().ok_or_else(|| {
        cose_error!("Value for encodedProtectedHeaders is not a bstr");
        Error::Structure("protected headers are not a bstr")
    })?;
    if array[1].map().is_none() {
        cose_error!("Value for unprotectedHeaders is not a map");
        return Err(Error::Structure("unprotected headers are not a map"));
    }
    let payload: &[u8] = match &array[2] {
        Value::Null => &[],
        Value::Bytes(payload) => payload,
        _ => {
            cose_error!("Value for payload is not null or a bstr");
            return Err(Error::Structure("payload is not null or a bstr"));
        }
    };
    if !payload.is_empty() && !detached.is_empty() {
        cose_error!("data and detachedContent cannot both be non-empty");
        return Err(Error::AmbiguousPayload);
    }
    let cose_signature = array[3].bstr().ok_or_else(|| {
        cose_error!("Value for signature is not a bstr");
        Error::Structure("signature is not a bstr")
    })?;
    if cose_signature.len() != ECDSA_SIGNATURE_SIZE {
        cose_error!(
            "COSE signature length is {}, expected {}",
            cose_signature.len(),
            ECDSA_SIGNATURE_SIZE
        );
        return Err(Error::InvalidLength {
            what: "signature",
            expected: ECDSA_SIGNATURE_SIZE,
            actual: cose_signature.len(),
        });
    }

    let content = if payload.is_empty() { detached } else { payload };
    let to_be_signed = structure::sig_structure(protected, content)?;
    let der = signature::cose_to_der(cose_signature)?;
    crypto::verify_digest(public_key, &crypto::sha256(&to_be_signed), &der).map_err(|e| {
        cose_error!("Signature check failed");
        e
    })
}

#[cfg(test)]
mod tests {
    use super::super::{test_vectors::*, COSE_LABEL_TRUSTY};
    use super::*;
    use rstest::rstest;

    fn sign_simple(private_key: &[u8], data: &[u8], detach: bool, tagged: bool) -> Vec<u8> {
        sign(private_key, 1, data, HeaderMap::new(), HeaderMap::new(), detach, tagged)
            .unwrap()
            .encode()
            .unwrap()
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    fn embedded_payload_round_trip(#[case] tagged: bool) {
        let (private_key, public_key) = generate_key_pair();
        let data = b"firmware image bytes";
        let sign1 = sign_simple(&private_key, data, false, tagged);
        verify(&sign1, b"", &public_key).unwrap();
        assert_eq!(is_signed(&sign1).is_some(), tagged);
    }

    #[test]
    fn detached_payload_must_be_supplied() {
        let (private_key, public_key) = generate_key_pair();
        let data = b"detached content";
        let sign1 = sign_simple(&private_key, data, true, true);
        verify(&sign1, data, &public_key).unwrap();
        assert!(verify(&sign1, b"", &public_key).is_err());
    }

    #[test]
    fn embedded_and_detached_is_ambiguous() {
        let (private_key, public_key) = generate_key_pair();
        let sign1 = sign_simple(&private_key, b"abc", false, false);
        assert!(matches!(
            verify(&sign1, b"abc", &public_key),
            Err(Error::AmbiguousPayload)
        ));
    }

    #[test]
    fn single_bit_flips_are_detected() {
        let (private_key, public_key) = generate_key_pair();
        let data = vec![0x5A; 100];
        let sign1 = sign_simple(&private_key, &data, true, false);
        verify(&sign1, &data, &public_key).unwrap();

        for i in 0..data.len() {
            let mut flipped = data.clone();
            flipped[i] ^= 0x01;
            assert!(verify(&sign1, &flipped, &public_key).is_err());
        }
        // 84 43 a10126 ...: the protected header contents start at offset 2
        let signature_start = sign1.len() - ECDSA_SIGNATURE_SIZE;
        for i in (2..5).chain(signature_start..sign1.len()) {
            let mut flipped = sign1.clone();
            flipped[i] ^= 0x01;
            assert!(verify(&flipped, &data, &public_key).is_err(), "byte {}", i);
        }
    }

    #[test]
    fn protected_header_bit_flip_is_detected() {
        let (private_key, public_key) = generate_key_pair();
        let mut protected = HeaderMap::new();
        protected.insert(COSE_LABEL_TRUSTY, trusty_label());
        let mut sign1 = sign(&private_key, 3, b"data", protected, HeaderMap::new(), false, false)
            .unwrap();
        let last = sign1.protected.len() - 1;
        sign1.protected[last] ^= 0x01;
        assert!(verify(&sign1.encode().unwrap(), b"", &public_key).is_err());
    }

    #[test]
    fn wrong_public_key_fails() {
        let (private_key, _) = generate_key_pair();
        let (_, other_public_key) = generate_key_pair();
        let sign1 = sign_simple(&private_key, b"data", false, true);
        assert!(matches!(
            verify(&sign1, b"", &other_public_key),
            Err(Error::BadSignature)
        ));
    }

    #[test]
    fn headers_are_canonical() {
        let (private_key, _) = generate_key_pair();
        let mut protected = HeaderMap::new();
        protected.insert(COSE_LABEL_TRUSTY, trusty_label());
        let sign1 = sign(&private_key, 0xA5, b"", protected, HeaderMap::new(), true, true).unwrap();
        assert_eq!(sign1.protected, TRUSTY_PROTECTED_HEADERS.to_vec());
        assert_eq!(sign1.unprotected.encode().unwrap(), vec![0xA1, 0x04, 0x41, 0xA5]);
        assert_eq!(sign1.payload, None);
    }

    #[test]
    fn structural_errors() {
        let (_, public_key) = generate_key_pair();
        // three element array
        let short = cbor::encode_array(&[vec![0x40], vec![0xA0], vec![0xF6]]);
        assert!(verify(&short, b"x", &public_key).is_err());
        // 63 byte signature
        let bad_size = cbor::encode_array(&[
            vec![0x40],
            vec![0xA0],
            vec![0xF6],
            cbor::encode_bytes(&[0u8; 63]),
        ]);
        assert!(matches!(
            verify(&bad_size, b"x", &public_key),
            Err(Error::InvalidLength { .. })
        ));
        // payload that is neither null nor a bstr
        let bad_payload = cbor::encode_array(&[
            vec![0x40],
            vec![0xA0],
            vec![0x01],
            cbor::encode_bytes(&[0u8; 64]),
        ]);
        assert!(verify(&bad_payload, b"", &public_key).is_err());
    }

    #[test]
    fn is_signed_classifies_input() {
        let (private_key, _) = generate_key_pair();
        let sign1 = sign_simple(&private_key, b"payload", true, true);

        let mut with_trailer = sign1.clone();
        with_trailer.extend(b"payload");
        assert_eq!(is_signed(&with_trailer), Some(sign1.len()));

        // untagged and unrelated tag
        assert_eq!(is_signed(&sign1[1..]), None);
        assert_eq!(is_signed(&cbor::encode_tagged(96, sign1[1..].to_vec())), None);
        // garbage and truncation never panic
        assert_eq!(is_signed(&[]), None);
        assert_eq!(is_signed(&[0xD2]), None);
        assert_eq!(is_signed(&sign1[..sign1.len() - 1]), None);
        assert_eq!(is_signed(&[0xFF, 0x00, 0x12]), None);
    }
}
