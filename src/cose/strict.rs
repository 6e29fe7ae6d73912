//! Fixed-layout signature verification.
//!
//! Signed packages produced with the Trusty protected headers have a
//! completely predictable prefix: tag, array header, the protected header
//! bytes, a one entry unprotected map holding the key id, a `null` payload and
//! the signature. This verifier compares the input against that template and
//! hashes the payload that follows without ever running a CBOR parser over
//! unauthenticated data. Anything that deviates from the template is
//! rejected; such packages must go through [`super::verify`].

use core::ops::Range;

use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::{
    cose_error, crypto, signature, Error, KeyLookup, Result, ECDSA_SIGNATURE_SIZE,
};
use crate::cbor;

/// Everything up to the key id byte.
pub(crate) const SIGNATURE_HEADER: [u8; 26] = [
    0xD2, // tag 18 (COSE_Sign1)
    0x84, // array(4)
    0x54, // bstr(20), protected headers
    0xA2, // map(2)
    0x01, // alg
    0x26, // ES256
    0x3A, 0x00, 0x01, 0x00, 0x00, // -65537
    0x82, // array(2)
    0x69, b'T', b'r', b'u', b's', b't', b'y', b'A', b'p', b'p',
    0x01, // format version
    0xA1, // map(1), unprotected headers
    0x04, // kid
    0x41, // bstr(1)
];

/// Follows the key id: `null` payload and the signature bstr header.
pub(crate) const SIGNATURE_HEADER_PART2: [u8; 3] = [0xF6, 0x58, 0x40];

/// `Sig_structure` up to (and excluding) the payload bstr header, for the
/// protected headers in [`SIGNATURE_HEADER`] and empty external data.
pub(crate) const SIGNATURE1_HEADER: [u8; 34] = [
    0x84, // array(4)
    0x6A, b'S', b'i', b'g', b'n', b'a', b't', b'u', b'r', b'e', b'1',
    0x54, // bstr(20)
    0xA2, 0x01, 0x26, 0x3A, 0x00, 0x01, 0x00, 0x00, 0x82, 0x69, b'T', b'r', b'u', b's', b't', b'y',
    b'A', b'p', b'p', 0x01,
    0x40, // external_aad
];

pub(crate) const KEY_ID_OFFSET: usize = SIGNATURE_HEADER.len();
pub(crate) const PART2_OFFSET: usize = KEY_ID_OFFSET + 1;
pub(crate) const SIGNATURE_OFFSET: usize = PART2_OFFSET + SIGNATURE_HEADER_PART2.len();
pub(crate) const PAYLOAD_OFFSET: usize = SIGNATURE_OFFSET + ECDSA_SIGNATURE_SIZE;

/// Verifies a package laid out as the fixed signature prefix followed by the
/// payload, resolving the public key through `lookup`.
///
/// On success returns the range of the payload within `package`.
pub fn verify_strict(package: &[u8], lookup: &impl KeyLookup) -> Result<Range<usize>> {
    if package.len() < PAYLOAD_OFFSET {
        cose_error!("Passed-in COSE_Sign1 is not large enough");
        return Err(Error::TemplateMismatch);
    }
    if !bool::from(package[..KEY_ID_OFFSET].ct_eq(&SIGNATURE_HEADER)) {
        cose_error!("Passed-in COSE_Sign1 is not valid CBOR");
        return Err(Error::TemplateMismatch);
    }

    let key_id = package[KEY_ID_OFFSET];
    let public_key = Zeroizing::new(lookup.key(key_id).ok_or_else(|| {
        cose_error!("Failed to retrieve public key");
        Error::UnknownKeyId(key_id)
    })?);

    if !bool::from(package[PART2_OFFSET..SIGNATURE_OFFSET].ct_eq(&SIGNATURE_HEADER_PART2)) {
        cose_error!("Passed-in COSE_Sign1 is not valid CBOR");
        return Err(Error::TemplateMismatch);
    }

    let payload = &package[PAYLOAD_OFFSET..];
    let payload_header = cbor::bstr_header(payload.len());
    let digest = crypto::sha256_parts(&[&SIGNATURE1_HEADER[..], &payload_header[..], payload]);

    let der = signature::cose_to_der(&package[SIGNATURE_OFFSET..PAYLOAD_OFFSET])?;
    crypto::verify_digest(&public_key, &digest, &der).map_err(|e| {
        cose_error!("Signature check failed");
        e
    })?;
    log::debug!("Strict signature check passed for key id {}", key_id);

    Ok(PAYLOAD_OFFSET..package.len())
}
