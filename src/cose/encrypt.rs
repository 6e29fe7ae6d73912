//! AES-128-GCM `COSE_Encrypt` with a single key-wrap recipient.
//!
//! The payload is encrypted under a random content encryption key (CEK). The
//! CEK, as a symmetric `COSE_Key`, is encrypted under a key encryption key
//! (KEK) identified by a one byte key id and carried as the only recipient.
//!
//! Decryption works in place on the encoded object: the ciphertext regions of
//! the caller's buffer become plaintext and the payload is returned as a range
//! into that buffer.

use aes_gcm::{
    aead::{AeadInPlace, KeyInit},
    Aes128Gcm, Nonce, Tag,
};
use alloc::vec::Vec;
use core::ops::Range;
use serde_cbor::Value;
use zeroize::{Zeroize, Zeroizing};

use super::{
    cose_error, crypto, structure, Context, Error, HeaderMap, KeyLookup, Result,
    AES_128_GCM_KEY_SIZE, AES_GCM_IV_SIZE, AES_GCM_TAG_SIZE, COSE_ALG_A128GCM,
    COSE_KEY_TYPE_SYMMETRIC, COSE_LABEL_ALG, COSE_LABEL_IV, COSE_LABEL_KEY_ALG,
    COSE_LABEL_KEY_KTY, COSE_LABEL_KEY_SYMMETRIC_KEY, COSE_LABEL_KID, COSE_TAG_ENCRYPT,
};
use crate::cbor::{self, ValueExt};

/// A `COSE_Encrypt` object, or a recipient when `recipients` is `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct CoseEncrypt {
    /// Encoded protected headers, exactly as authenticated.
    pub protected: Vec<u8>,
    pub unprotected: HeaderMap,
    /// Ciphertext followed by the 16 byte authentication tag.
    pub ciphertext: Vec<u8>,
    pub recipients: Option<Vec<CoseEncrypt>>,
    pub tagged: bool,
}

impl CoseEncrypt {
    /// Returns the CBOR encoding, prefixed with tag 96 if `tagged` is set.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut items = Vec::with_capacity(4);
        items.push(cbor::encode_bytes(&self.protected));
        items.push(self.unprotected.encode()?);
        items.push(cbor::encode_bytes(&self.ciphertext));
        if let Some(recipients) = &self.recipients {
            let recipients = recipients
                .iter()
                .map(CoseEncrypt::encode)
                .collect::<Result<Vec<_>>>()?;
            items.push(cbor::encode_array(&recipients));
        }
        let array = cbor::encode_array(&items);
        if self.tagged {
            Ok(cbor::encode_tagged(COSE_TAG_ENCRYPT, array))
        } else {
            Ok(array)
        }
    }
}

/// In-place AEAD decryption: `(key, nonce, ciphertext || tag, aad)` to the
/// plaintext length.
pub trait DecryptFn: Fn(&[u8], &[u8], &mut [u8], &[u8]) -> Result<usize> {}

impl<F> DecryptFn for F where F: Fn(&[u8], &[u8], &mut [u8], &[u8]) -> Result<usize> {}

fn check_sizes(key: &[u8], nonce: &[u8]) -> Result<()> {
    if key.len() != AES_128_GCM_KEY_SIZE {
        cose_error!("key is not {} bytes, got {}", AES_128_GCM_KEY_SIZE, key.len());
        return Err(Error::InvalidLength {
            what: "key",
            expected: AES_128_GCM_KEY_SIZE,
            actual: key.len(),
        });
    }
    if nonce.len() != AES_GCM_IV_SIZE {
        cose_error!("nonce is not {} bytes, got {}", AES_GCM_IV_SIZE, nonce.len());
        return Err(Error::InvalidLength {
            what: "nonce",
            expected: AES_GCM_IV_SIZE,
            actual: nonce.len(),
        });
    }
    Ok(())
}

/// Encrypts `data` with AES-128-GCM, returning the ciphertext followed by the
/// tag.
pub fn encrypt_aead(key: &[u8], nonce: &[u8], data: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    check_sizes(key, nonce)?;
    let cipher = Aes128Gcm::new_from_slice(key).map_err(|_| Error::InvalidKey)?;

    let mut out = Vec::with_capacity(data.len() + AES_GCM_TAG_SIZE);
    out.extend_from_slice(data);
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(nonce), aad, &mut out)
        .map_err(|e| {
            cose_error!("AES-GCM encryption failed");
            Error::from(e)
        })?;
    out.extend_from_slice(&tag);
    Ok(out)
}

/// Decrypts `buffer` (ciphertext followed by tag) in place and returns the
/// plaintext length. The plaintext occupies the front of `buffer`.
///
/// If the tag does not verify the whole buffer is zeroed, so no unauthenticated
/// plaintext is left behind.
pub fn decrypt_aead_in_place(
    key: &[u8],
    nonce: &[u8],
    buffer: &mut [u8],
    aad: &[u8],
) -> Result<usize> {
    if buffer.len() < AES_GCM_TAG_SIZE {
        cose_error!("encryptedData too small");
        return Err(Error::InvalidLength {
            what: "ciphertext",
            expected: AES_GCM_TAG_SIZE,
            actual: buffer.len(),
        });
    }
    check_sizes(key, nonce)?;
    let cipher = Aes128Gcm::new_from_slice(key).map_err(|_| Error::InvalidKey)?;

    let (ciphertext, tag) = buffer.split_at_mut(buffer.len() - AES_GCM_TAG_SIZE);
    let len = ciphertext.len();
    let result =
        cipher.decrypt_in_place_detached(Nonce::from_slice(nonce), aad, ciphertext, Tag::from_slice(tag));
    if let Err(e) = result {
        cose_error!("AES-GCM decryption failed");
        buffer.zeroize();
        return Err(Error::from(e));
    }
    Ok(len)
}

/// Encrypts `data` under `key` with a fresh random IV.
///
/// The IV goes into `unprotected`, the algorithm into `protected`, and the
/// `Enc_structure` for `context` is used as associated data. Passing
/// `recipients` produces a four element `COSE_Encrypt`, otherwise the three
/// element recipient form.
pub fn encrypt_top_level(
    context: Context,
    key: &[u8],
    data: &[u8],
    external_aad: &[u8],
    mut protected: HeaderMap,
    mut unprotected: HeaderMap,
    recipients: Option<Vec<CoseEncrypt>>,
) -> Result<CoseEncrypt> {
    let iv = crypto::random_array::<AES_GCM_IV_SIZE>().map_err(|e| {
        cose_error!("Error generating encryption IV");
        e
    })?;
    unprotected.insert(COSE_LABEL_IV, Value::Bytes(iv.to_vec()));
    protected.insert(COSE_LABEL_ALG, Value::Integer(COSE_ALG_A128GCM.into()));
    protected.canonicalize()?;
    unprotected.canonicalize()?;

    let protected = protected.encode_protected()?;
    let aad = structure::enc_structure(context, &protected, external_aad)?;
    let ciphertext = encrypt_aead(key, &iv, data, &aad)?;

    Ok(CoseEncrypt {
        protected,
        unprotected,
        ciphertext,
        recipients,
        tagged: false,
    })
}

/// Encrypts `data` under a random CEK and wraps the CEK under `kek`.
pub fn encrypt_envelope(
    kek: &[u8],
    kek_id: u8,
    data: &[u8],
    external_aad: &[u8],
    protected: HeaderMap,
    unprotected: HeaderMap,
    tagged: bool,
) -> Result<CoseEncrypt> {
    let cek = Zeroizing::new(crypto::random_array::<AES_128_GCM_KEY_SIZE>().map_err(|e| {
        cose_error!("Error generating encryption key");
        e
    })?);

    let mut cose_key = HeaderMap::new();
    cose_key.insert(COSE_LABEL_KEY_KTY, Value::Integer(COSE_KEY_TYPE_SYMMETRIC.into()));
    cose_key.insert(COSE_LABEL_KEY_ALG, Value::Integer(COSE_ALG_A128GCM.into()));
    cose_key.insert(COSE_LABEL_KEY_SYMMETRIC_KEY, Value::Bytes(cek.to_vec()));
    cose_key.canonicalize()?;
    let encoded_key = Zeroizing::new(cose_key.encode()?);

    let mut key_unprotected = HeaderMap::new();
    key_unprotected.insert(COSE_LABEL_KID, Value::Bytes(vec![kek_id]));
    let recipient = encrypt_top_level(
        Context::EncRecipient,
        kek,
        &encoded_key,
        b"",
        HeaderMap::new(),
        key_unprotected,
        None,
    )
    .map_err(|e| {
        cose_error!("Error wrapping encryption key");
        e
    })?;

    let mut encrypted = encrypt_top_level(
        Context::Encrypt,
        &cek[..],
        data,
        external_aad,
        protected,
        unprotected,
        Some(vec![recipient]),
    )
    .map_err(|e| {
        cose_error!("Error encrypting firmware package");
        e
    })?;
    encrypted.tagged = tagged;
    log::debug!("Encrypted {} bytes for key id {}", data.len(), kek_id);
    Ok(encrypted)
}

/// Byte layout of one encoded `COSE_Encrypt` (or recipient) array.
struct Layout {
    protected: Range<usize>,
    unprotected: Value,
    ciphertext: Range<usize>,
    /// Offset of the recipients array, if present.
    recipients: Option<usize>,
}

/// Reads the bstr at `pos`, returning the range of its contents.
fn bstr_at(buf: &[u8], pos: usize, what: &'static str) -> Result<Range<usize>> {
    let header = cbor::read_header(&buf[pos..])?;
    if header.major != cbor::MAJOR_BYTES {
        cose_error!("Failed to retrieve {} from COSE encryption structure", what);
        return Err(Error::Structure("expected a bstr"));
    }
    let start = pos + header.len;
    let end = usize::try_from(header.arg)
        .ok()
        .and_then(|len| start.checked_add(len))
        .filter(|end| *end <= buf.len())
        .ok_or(Error::Structure("truncated bstr"))?;
    Ok(start..end)
}

/// Reads an array header at `pos`, returning its length and the offset of
/// the first element.
fn array_at(buf: &[u8], pos: usize) -> Result<(u64, usize)> {
    let header = cbor::read_header(&buf[pos..])?;
    if header.major != cbor::MAJOR_ARRAY {
        cose_error!("Encrypted data is not a CBOR array");
        return Err(Error::Structure("expected an array"));
    }
    Ok((header.arg, pos + header.len))
}

fn parse_layout(buf: &[u8], pos: usize) -> Result<Layout> {
    let (len, pos) = array_at(buf, pos)?;
    if !(3..=4).contains(&len) {
        cose_error!("Invalid COSE encryption array size, got {}", len);
        return Err(Error::Structure("invalid COSE encryption array size"));
    }
    let protected = bstr_at(buf, pos, "protected headers")?;
    let (unprotected, used) = cbor::decode_prefix(&buf[protected.end..])?;
    if unprotected.map().is_none() {
        cose_error!("Failed to retrieve unprotected headers from COSE encryption structure");
        return Err(Error::Structure("unprotected headers are not a map"));
    }
    let ciphertext = bstr_at(buf, protected.end + used, "ciphertext")?;
    let recipients = if len == 4 { Some(ciphertext.end) } else { None };
    Ok(Layout {
        protected,
        unprotected,
        ciphertext,
        recipients,
    })
}

fn require_int(map: &Value, label: i64, what: &'static str, expected: i64) -> Result<()> {
    let value = map.get_label(label).ok_or_else(|| {
        cose_error!("Missing {} field", what);
        Error::MissingHeader(what)
    })?;
    let value = value.int().ok_or_else(|| {
        cose_error!("Wrong CBOR type for {} value", what);
        Error::Structure("header value is not an integer")
    })?;
    if value != i128::from(expected) {
        cose_error!("Invalid {} value, got {}", what, value);
        return Err(Error::UnsupportedAlgorithm(value));
    }
    Ok(())
}

/// Validates one layer and decrypts its ciphertext in place, returning the
/// plaintext range.
fn decrypt_layer(
    context: Context,
    buf: &mut [u8],
    layout: &Layout,
    key: &[u8],
    external_aad: &[u8],
    decrypt: &impl DecryptFn,
) -> Result<Range<usize>> {
    let protected = HeaderMap::decode_protected(&buf[layout.protected.clone()]).map_err(|e| {
        cose_error!("Failed to parse protected headers");
        e
    })?;
    match protected.get(COSE_LABEL_ALG).map(ValueExt::int) {
        None => {
            cose_error!("Missing alg field in COSE encryption structure");
            return Err(Error::MissingHeader("alg"));
        }
        Some(Some(alg)) if alg == i128::from(COSE_ALG_A128GCM) => {}
        Some(Some(alg)) => {
            cose_error!("Invalid COSE algorithm, got {}", alg);
            return Err(Error::UnsupportedAlgorithm(alg));
        }
        Some(None) => {
            cose_error!("Wrong CBOR type for alg value in protected headers");
            return Err(Error::Structure("alg is not an integer"));
        }
    }

    let iv = match layout.unprotected.get_label(COSE_LABEL_IV) {
        Some(Value::Bytes(iv)) => iv,
        Some(_) => {
            cose_error!("Wrong CBOR type for IV value in unprotected headers");
            return Err(Error::Structure("IV is not a bstr"));
        }
        None => {
            cose_error!("Missing IV field in COSE encryption structure");
            return Err(Error::MissingHeader("iv"));
        }
    };

    let aad = structure::enc_structure(context, &buf[layout.protected.clone()], external_aad)?;
    let ciphertext = layout.ciphertext.clone();
    let len = decrypt(key, &iv[..], &mut buf[ciphertext.clone()], &aad[..])?;
    Ok(ciphertext.start..ciphertext.start + len)
}

/// Extracts the CEK from a decrypted `COSE_Key`.
fn content_key(encoded: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let cose_key = cbor::decode(encoded).map_err(|e| {
        cose_error!("Failed to parse COSE_Key structure");
        e
    })?;
    if cose_key.map().is_none() {
        cose_error!("COSE_Key structure is not a map");
        return Err(Error::Structure("COSE_Key is not a map"));
    }
    require_int(&cose_key, COSE_LABEL_KEY_KTY, "kty", COSE_KEY_TYPE_SYMMETRIC)?;
    require_int(&cose_key, COSE_LABEL_KEY_ALG, "alg", COSE_ALG_A128GCM)?;
    let key = match cose_key.get_label(COSE_LABEL_KEY_SYMMETRIC_KEY) {
        Some(Value::Bytes(key)) => key,
        Some(_) => {
            cose_error!("Wrong CBOR type for key field of COSE_Key");
            return Err(Error::Structure("key is not a bstr"));
        }
        None => {
            cose_error!("Missing key field in COSE_Key");
            return Err(Error::MissingHeader("k"));
        }
    };
    if key.len() != AES_128_GCM_KEY_SIZE {
        cose_error!("Invalid content encryption key size, got {}", key.len());
        return Err(Error::InvalidLength {
            what: "content encryption key",
            expected: AES_128_GCM_KEY_SIZE,
            actual: key.len(),
        });
    }
    let cek = Zeroizing::new(key.clone());
    // The decoded tree holds a copy of the key as well
    let mut cose_key = cose_key;
    if let Value::Map(map) = &mut cose_key {
        for value in map.values_mut() {
            if let Value::Bytes(bytes) = value {
                bytes.zeroize();
            }
        }
    }
    Ok(cek)
}

/// Decrypts an envelope produced by [`encrypt_envelope`] in place.
///
/// `buf` holds exactly one encoded `COSE_Encrypt`. With `check_tag` it must
/// carry tag 96 and no other tag. The KEK is resolved from the recipient's
/// key id through `lookup`. On success the payload is `buf[range]`; the
/// unwrapped CEK is wiped from `buf` either way.
pub fn decrypt_envelope(
    buf: &mut [u8],
    lookup: &impl KeyLookup,
    external_aad: &[u8],
    check_tag: bool,
) -> Result<Range<usize>> {
    decrypt_envelope_with(buf, lookup, external_aad, check_tag, decrypt_aead_in_place)
}

/// Like [`decrypt_envelope`], but unwraps the CEK with `key_decrypt` instead
/// of the software AES-GCM implementation, for KEKs that never leave a
/// secure element. The payload itself is always decrypted in software.
pub fn decrypt_envelope_with(
    buf: &mut [u8],
    lookup: &impl KeyLookup,
    external_aad: &[u8],
    check_tag: bool,
    key_decrypt: impl DecryptFn,
) -> Result<Range<usize>> {
    let (tags, start) = cbor::read_tags(buf)?;
    if check_tag {
        if tags.len() != 1 {
            cose_error!("Invalid COSE_Encrypt tag count, expected 1 got {}", tags.len());
            return Err(Error::Structure("invalid COSE_Encrypt tag count"));
        }
        if tags[0] != COSE_TAG_ENCRYPT {
            cose_error!("Invalid COSE_Encrypt semantic tag: {}", tags[0]);
            return Err(Error::Structure("invalid COSE_Encrypt tag"));
        }
    }

    let outer = parse_layout(buf, start)?;
    let recipients = outer.recipients.ok_or_else(|| {
        cose_error!("Invalid COSE_Encrypt array size, got 3");
        Error::Structure("COSE_Encrypt has no recipients")
    })?;
    let (count, recipient_start) = array_at(buf, recipients)?;
    if count != 1 {
        cose_error!("Invalid recipients array size, got {}", count);
        return Err(Error::Structure("expected exactly one recipient"));
    }
    let recipient = parse_layout(buf, recipient_start)?;
    if recipient.recipients.is_some() {
        cose_error!("Invalid COSE_Recipient structure array size, got 4");
        return Err(Error::Structure("nested recipients are not supported"));
    }

    let key_id = match recipient.unprotected.get_label(COSE_LABEL_KID) {
        Some(Value::Bytes(kid)) if kid.len() == 1 => kid[0],
        Some(Value::Bytes(kid)) => {
            cose_error!("Invalid key id field length, got {}", kid.len());
            return Err(Error::InvalidLength {
                what: "key id",
                expected: 1,
                actual: kid.len(),
            });
        }
        Some(_) => {
            cose_error!("Wrong CBOR type for key id in COSE_Recipient");
            return Err(Error::Structure("key id is not a bstr"));
        }
        None => {
            cose_error!("Missing key id field in COSE_Recipient");
            return Err(Error::MissingHeader("kid"));
        }
    };
    let kek = Zeroizing::new(lookup.key(key_id).ok_or_else(|| {
        cose_error!("Failed to retrieve decryption key");
        Error::UnknownKeyId(key_id)
    })?);

    let key_range = decrypt_layer(Context::EncRecipient, buf, &recipient, &kek, b"", &key_decrypt)
        .map_err(|e| {
            cose_error!("Failed to decrypt COSE_Key structure");
            e
        })?;
    let cek = content_key(&buf[key_range.clone()]);
    buf[key_range].zeroize();
    let cek = cek?;

    let payload = decrypt_layer(
        Context::Encrypt,
        buf,
        &outer,
        &cek,
        external_aad,
        &decrypt_aead_in_place,
    )
    .map_err(|e| {
        cose_error!("Failed to decrypt payload");
        e
    })?;
    log::debug!("Decrypted {} bytes with key id {}", payload.len(), key_id);
    Ok(payload)
}
