//! The firmware loader package and the operations the packaging tool runs on
//! it.
//!
//! A package is tag 65536 over `[version, headers, image, manifest]`. The
//! image is either a bstr or, after encryption, a `COSE_Encrypt` array, as
//! recorded by the `content_is_cose_encrypt` header. A signed package is a
//! detached `COSE_Sign1` followed by the package bytes.

use alloc::vec::Vec;
use core::cell::Cell;
use core::ops::Range;
use serde_cbor::Value;
use thiserror::Error;

use crate::cbor::{self, ValueExt};
use crate::cose::{
    self, HeaderMap, SilenceErrors, AES_128_GCM_KEY_SIZE, COSE_LABEL_TRUSTY, COSE_TAG_SIGN1,
    SIGNATURE_FORMAT_VERSION, TRUSTY_APP_NAME,
};

pub const PACKAGE_TAG_FIRMWARE: u64 = 65536;
pub const PACKAGE_FORMAT_VERSION: u64 = 1;
pub const HEADER_LABEL_CONTENT_IS_COSE_ENCRYPT: i64 = 1;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Cose(#[from] cose::Error),
    #[error("input is already signed")]
    AlreadySigned,
    #[error("input is not signed")]
    NotSigned,
    #[error("input is not a Trusty firmware package")]
    NotFirmwarePackage,
    #[error("invalid package format: {0}")]
    Format(&'static str),
    #[error("invalid package version, expected {} got {0}", PACKAGE_FORMAT_VERSION)]
    Version(i128),
    #[error("invalid content_is_cose_encrypt value")]
    ContentFlag,
    #[error("wrong AES-128-GCM key size: {0}")]
    KeySize(usize),
}

pub type Result<T> = core::result::Result<T, Error>;

/// The image slot of a package.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Plain(Vec<u8>),
    /// An encoded `COSE_Encrypt` array.
    Encrypted(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    pub headers: HeaderMap,
    pub content: Content,
    pub manifest: Vec<u8>,
}

impl Package {
    pub fn new(image: &[u8], manifest: &[u8]) -> Package {
        Package {
            headers: HeaderMap::new(),
            content: Content::Plain(image.to_vec()),
            manifest: manifest.to_vec(),
        }
    }

    /// Returns the `content_is_cose_encrypt` header, if present.
    pub fn content_is_cose_encrypt(&self) -> Result<Option<bool>> {
        match self.headers.get(HEADER_LABEL_CONTENT_IS_COSE_ENCRYPT) {
            None => Ok(None),
            Some(value) => value
                .boolean()
                .map(Some)
                .ok_or(Error::Format("content_is_cose_encrypt is not a bool")),
        }
    }

    /// Flips `content_is_cose_encrypt`. Setting the value it already has is
    /// an error; an absent header counts as `false`.
    fn set_content_is_cose_encrypt(&mut self, value: bool) -> Result<()> {
        match self.content_is_cose_encrypt()? {
            Some(current) if current == value => Err(Error::ContentFlag),
            None if !value => Ok(()),
            _ => {
                self.headers
                    .insert(HEADER_LABEL_CONTENT_IS_COSE_ENCRYPT, Value::Bool(value));
                Ok(())
            }
        }
    }

    /// Encodes the package with the firmware tag and canonical headers.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut headers = self.headers.clone();
        headers.canonicalize()?;
        let content = match &self.content {
            Content::Plain(image) => cbor::encode_bytes(image),
            Content::Encrypted(encrypted) => encrypted.clone(),
        };
        let array = cbor::encode_array(&[
            cbor::encode(PACKAGE_FORMAT_VERSION)?,
            headers.encode()?,
            content,
            cbor::encode_bytes(&self.manifest),
        ]);
        Ok(cbor::encode_tagged(PACKAGE_TAG_FIRMWARE, array))
    }

    /// Parses an encoded package. With `reject_signed`, a package that still
    /// carries a signature is refused.
    pub fn parse(bytes: &[u8], reject_signed: bool) -> Result<Package> {
        let (tags, mut pos) = cbor::read_tags(bytes)?;
        if reject_signed && tags.contains(&COSE_TAG_SIGN1) {
            return Err(Error::AlreadySigned);
        }
        if !tags.contains(&PACKAGE_TAG_FIRMWARE) {
            return Err(Error::NotFirmwarePackage);
        }

        let header = cbor::read_header(&bytes[pos..])?;
        if header.major != cbor::MAJOR_ARRAY {
            return Err(Error::Format("package is not an array"));
        }
        if header.arg != 4 {
            return Err(Error::Format("package array does not have 4 elements"));
        }
        pos += header.len;

        let (version, used) = cbor::decode_prefix(&bytes[pos..])?;
        match version.int() {
            Some(v) if v == i128::from(PACKAGE_FORMAT_VERSION) => {}
            Some(v) => return Err(Error::Version(v)),
            None => return Err(Error::Format("version is not an integer")),
        }
        pos += used;

        let map_header = cbor::read_header(&bytes[pos..])?;
        if map_header.major != cbor::MAJOR_MAP {
            return Err(Error::Format("headers are not a map"));
        }
        let (headers, used) = cbor::decode_prefix(&bytes[pos..])?;
        let headers =
            HeaderMap::from_value(&headers).map_err(|_| Error::Format("headers are not a map"))?;
        // Decoding keeps only the last entry for a repeated label
        if headers.len() as u64 != map_header.arg {
            return Err(Error::Format("duplicate header labels"));
        }
        pos += used;

        // Tags on the image slot are carried along but not interpreted
        let (_, tags_len) = cbor::read_tags(&bytes[pos..])?;
        let item = pos + tags_len;
        let content = match cbor::read_header(&bytes[item..])?.major {
            cbor::MAJOR_BYTES => {
                let (image, used) = cbor::decode_prefix(&bytes[item..])?;
                pos = item + used;
                match image {
                    Value::Bytes(image) => Content::Plain(image),
                    _ => return Err(Error::Format("image is not a bstr")),
                }
            }
            cbor::MAJOR_ARRAY => {
                let end = item + cbor::item_len(&bytes[item..])?;
                let encrypted = bytes[pos..end].to_vec();
                pos = end;
                Content::Encrypted(encrypted)
            }
            _ => return Err(Error::Format("image is neither a bstr nor an array")),
        };

        let (manifest, _) = cbor::decode_prefix(&bytes[pos..])?;
        let manifest = match manifest {
            Value::Bytes(manifest) => manifest,
            _ => return Err(Error::Format("manifest is not a bstr")),
        };

        Ok(Package {
            headers,
            content,
            manifest,
        })
    }
}

/// Returns a new unsigned, unencrypted package.
pub fn build(image: &[u8], manifest: &[u8]) -> Result<Vec<u8>> {
    Package::new(image, manifest).encode()
}

/// Signs `package`, returning the detached `COSE_Sign1` followed by the
/// package.
pub fn sign(package: &[u8], private_key: &[u8], key_id: u8) -> Result<Vec<u8>> {
    if cose::is_signed(package).is_some() {
        return Err(Error::AlreadySigned);
    }

    let mut protected = HeaderMap::new();
    protected.insert(
        COSE_LABEL_TRUSTY,
        Value::Array(vec![
            Value::Text(TRUSTY_APP_NAME.into()),
            Value::Integer(SIGNATURE_FORMAT_VERSION.into()),
        ]),
    );
    let sign1 = cose::sign(private_key, key_id, package, protected, HeaderMap::new(), true, true)?;

    let mut signed = sign1.encode()?;
    signed.extend_from_slice(package);
    Ok(signed)
}

/// Verifies a signed package with `public_key`, returning the range of the
/// package within `signed`.
///
/// In strict mode the key is used for whatever key id the package names.
pub fn verify(signed: &[u8], public_key: &[u8], strict: bool) -> Result<Range<usize>> {
    let signature_len = cose::is_signed(signed).ok_or(Error::NotSigned)?;
    if strict {
        let lookup = |_: u8| Some(public_key.to_vec());
        Ok(cose::verify_strict(signed, &lookup)?)
    } else {
        let (sign1, payload) = signed.split_at(signature_len);
        cose::verify(sign1, payload, public_key)?;
        Ok(signature_len..signed.len())
    }
}

fn check_key_size(kek: &[u8]) -> Result<()> {
    if kek.len() != AES_128_GCM_KEY_SIZE {
        return Err(Error::KeySize(kek.len()));
    }
    Ok(())
}

/// Encrypts the image of an unsigned package under `kek`.
pub fn encrypt(package: &[u8], kek: &[u8], key_id: u8) -> Result<Vec<u8>> {
    let mut package = Package::parse(package, true)?;
    let image = match &package.content {
        Content::Plain(image) => image,
        Content::Encrypted(_) => return Err(Error::Format("image is not a bstr")),
    };
    check_key_size(kek)?;

    let mut protected = HeaderMap::new();
    protected.insert(COSE_LABEL_TRUSTY, Value::Text(TRUSTY_APP_NAME.into()));
    let encrypted =
        cose::encrypt_envelope(kek, key_id, image, b"", protected, HeaderMap::new(), false)?;

    package.set_content_is_cose_encrypt(true)?;
    package.content = Content::Encrypted(encrypted.encode()?);
    package.encode()
}

/// Decrypts the image of an unsigned package with `kek`.
pub fn decrypt(package: &[u8], kek: &[u8]) -> Result<Vec<u8>> {
    let mut package = Package::parse(package, true)?;
    let mut buf = match &mut package.content {
        Content::Encrypted(encrypted) => core::mem::take(encrypted),
        Content::Plain(_) => return Err(Error::Format("image is not a COSE_Encrypt array")),
    };
    check_key_size(kek)?;

    let lookup = |_: u8| Some(kek.to_vec());
    let image = cose::decrypt_envelope(&mut buf, &lookup, b"", false)?;

    package.set_content_is_cose_encrypt(false)?;
    package.content = Content::Plain(buf[image].to_vec());
    package.encode()
}

/// What can be learned about a package without any keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Info {
    pub signed: bool,
    /// Only known for packages in the fixed signature layout.
    pub signature_key_id: Option<u8>,
    pub encrypted: bool,
    pub encryption_key_id: Option<u8>,
}

/// Inspects a (possibly signed, possibly encrypted) package.
///
/// Key ids are found by running the verifier and the decryptor with lookups
/// that record the requested id and return no key. Their failures are
/// expected, so error diagnostics are silenced meanwhile.
pub fn info(bytes: &[u8]) -> Result<Info> {
    let _quiet = SilenceErrors::new();
    let mut info = Info::default();

    let signature_len = cose::is_signed(bytes);
    if signature_len.is_some() {
        info.signed = true;
        info.signature_key_id = probe_key_id(|lookup| {
            let _ = cose::verify_strict(bytes, &lookup);
        });
    }

    let package = Package::parse(&bytes[signature_len.unwrap_or(0)..], false)?;
    if package.content_is_cose_encrypt()? == Some(true) {
        info.encrypted = true;
        let mut buf = match package.content {
            Content::Encrypted(encrypted) => encrypted,
            Content::Plain(_) => return Err(Error::Format("image is not a COSE_Encrypt array")),
        };
        info.encryption_key_id = probe_key_id(|lookup| {
            let _ = cose::decrypt_envelope(&mut buf, &lookup, b"", false);
        });
    }
    Ok(info)
}

/// Runs `probe` with a lookup that remembers the key id it is asked for.
fn probe_key_id(probe: impl FnOnce(&dyn Fn(u8) -> Option<Vec<u8>>)) -> Option<u8> {
    let seen = Cell::new(None);
    let record = |key_id: u8| -> Option<Vec<u8>> {
        seen.set(Some(key_id));
        None
    };
    probe(&record);
    seen.get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cose::COSE_TAG_ENCRYPT;
    use hexlit::hex;

    #[test]
    fn build_layout() {
        let package = build(b"elf", b"mf").unwrap();
        // tag 65536, [1, {}, h'656c66', h'6d66']
        assert_eq!(package, hex!("da000100008401a043656c66426d66"));
    }

    #[test]
    fn parse_round_trip() {
        let bytes = build(&[0xEE; 300], &[0x11; 64]).unwrap();
        let package = Package::parse(&bytes, true).unwrap();
        assert_eq!(package, Package::new(&[0xEE; 300], &[0x11; 64]));
        assert_eq!(package.content_is_cose_encrypt().unwrap(), None);
        assert_eq!(package.encode().unwrap(), bytes);
    }

    #[test]
    fn parse_rejects_bad_packages() {
        let good = build(b"elf", b"mf").unwrap();
        // untagged
        assert!(matches!(
            Package::parse(&good[5..], false),
            Err(Error::NotFirmwarePackage)
        ));
        // signed
        let signed = cbor::encode_tagged(COSE_TAG_SIGN1, good.clone());
        assert!(matches!(Package::parse(&signed, true), Err(Error::AlreadySigned)));
        assert!(Package::parse(&signed, false).is_ok());
        // wrong version
        let mut bad = good.clone();
        bad[6] = 0x02;
        assert!(matches!(Package::parse(&bad, false), Err(Error::Version(2))));
        // headers not a map
        let mut bad = good.clone();
        bad[7] = 0x80;
        assert!(matches!(Package::parse(&bad, false), Err(Error::Format(_))));
        // three elements
        let three = cbor::encode_tagged(
            PACKAGE_TAG_FIRMWARE,
            cbor::encode_array(&[vec![0x01], vec![0xA0], vec![0x40]]),
        );
        assert!(matches!(Package::parse(&three, false), Err(Error::Format(_))));
        assert!(Package::parse(&good[..good.len() - 1], false).is_err());
    }

    #[test]
    fn repeated_header_labels_are_rejected() {
        // tag 65536, [1, {1: false, 1: true}, h'656c66', h'6d66']
        let repeated = hex!("da000100008401a201f401f543656c66426d66");
        assert!(matches!(
            Package::parse(&repeated, false),
            Err(Error::Format("duplicate header labels"))
        ));
        let distinct = hex!("da000100008401a201f402f543656c66426d66");
        let package = Package::parse(&distinct, false).unwrap();
        assert_eq!(package.content_is_cose_encrypt().unwrap(), Some(false));
        assert_eq!(package.headers.len(), 2);
    }

    #[test]
    fn tagged_encrypted_image_is_accepted() {
        let kek = [0x24; 16];
        let encrypted = encrypt(&build(b"image", b"manifest").unwrap(), &kek, 5).unwrap();
        let mut package = Package::parse(&encrypted, true).unwrap();
        let envelope = match package.content {
            Content::Encrypted(envelope) => envelope,
            Content::Plain(_) => panic!("image was not encrypted"),
        };
        package.content = Content::Encrypted(cbor::encode_tagged(COSE_TAG_ENCRYPT, envelope));
        let tagged = package.encode().unwrap();

        let reparsed = Package::parse(&tagged, true).unwrap();
        assert_eq!(reparsed, package);
        let decrypted = Package::parse(&decrypt(&tagged, &kek).unwrap(), true).unwrap();
        assert_eq!(decrypted.content, Content::Plain(b"image".to_vec()));
    }

    #[test]
    fn content_flag_must_be_bool() {
        let mut package = Package::new(b"elf", b"mf");
        package
            .headers
            .insert(HEADER_LABEL_CONTENT_IS_COSE_ENCRYPT, Value::Integer(1));
        assert!(package.content_is_cose_encrypt().is_err());

        package
            .headers
            .insert(HEADER_LABEL_CONTENT_IS_COSE_ENCRYPT, Value::Bool(false));
        assert_eq!(package.content_is_cose_encrypt().unwrap(), Some(false));
        assert!(matches!(
            package.set_content_is_cose_encrypt(false),
            Err(Error::ContentFlag)
        ));
        package.set_content_is_cose_encrypt(true).unwrap();
        assert_eq!(package.content_is_cose_encrypt().unwrap(), Some(true));
    }

    #[test]
    fn encrypt_flips_content_flag() {
        let kek = [0x42; 16];
        let package = build(b"image", b"manifest").unwrap();
        let encrypted = encrypt(&package, &kek, 3).unwrap();

        let parsed = Package::parse(&encrypted, true).unwrap();
        assert_eq!(parsed.content_is_cose_encrypt().unwrap(), Some(true));
        assert!(matches!(parsed.content, Content::Encrypted(_)));
        assert_eq!(parsed.manifest, b"manifest".to_vec());

        // Encrypting twice is refused
        assert!(encrypt(&encrypted, &kek, 3).is_err());

        let decrypted = decrypt(&encrypted, &kek).unwrap();
        let parsed = Package::parse(&decrypted, true).unwrap();
        assert_eq!(parsed.content, Content::Plain(b"image".to_vec()));
        assert_eq!(parsed.content_is_cose_encrypt().unwrap(), Some(false));
        assert!(decrypt(&decrypted, &kek).is_err());
    }

    #[test]
    fn key_sizes_are_checked() {
        let package = build(b"image", b"manifest").unwrap();
        assert!(matches!(encrypt(&package, &[0; 15], 1), Err(Error::KeySize(15))));
        let encrypted = encrypt(&package, &[0; 16], 1).unwrap();
        assert!(matches!(decrypt(&encrypted, &[0; 32]), Err(Error::KeySize(32))));
    }
}
