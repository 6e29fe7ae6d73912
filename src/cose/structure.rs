//! The byte strings that get signed (`Sig_structure`) or authenticated as
//! AEAD associated data (`Enc_structure`).

use alloc::vec::Vec;
use serde_bytes::Bytes;

use super::Result;
use crate::cbor;

/// Context label distinguishing the different to-be-authenticated structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Context {
    Signature1,
    Encrypt,
    EncRecipient,
}

impl Context {
    pub fn as_str(&self) -> &'static str {
        match self {
            Context::Signature1 => "Signature1",
            Context::Encrypt => "Encrypt",
            Context::EncRecipient => "Enc_Recipient",
        }
    }
}

/// Builds `[context, protected, external_aad, payload]`.
///
/// The context is encoded as a text string and the other fields as byte
/// strings, whatever they contain. Without a payload the array has three
/// elements, which is the `Enc_structure` shape.
pub fn build(
    context: Context,
    protected: &[u8],
    external_aad: &[u8],
    payload: Option<&[u8]>,
) -> Result<Vec<u8>> {
    let bytes = match payload {
        Some(payload) => cbor::encode((
            context.as_str(),
            Bytes::new(protected),
            Bytes::new(external_aad),
            Bytes::new(payload),
        ))?,
        None => cbor::encode((
            context.as_str(),
            Bytes::new(protected),
            Bytes::new(external_aad),
        ))?,
    };
    Ok(bytes)
}

/// Returns the `Sig_structure` for a `COSE_Sign1` object.
///
/// External data is not supported, so `external_aad` is always empty.
pub fn sig_structure(protected: &[u8], payload: &[u8]) -> Result<Vec<u8>> {
    build(Context::Signature1, protected, b"", Some(payload))
}

/// Returns the `Enc_structure` used as associated data for AES-GCM.
pub fn enc_structure(context: Context, protected: &[u8], external_aad: &[u8]) -> Result<Vec<u8>> {
    build(context, protected, external_aad, None)
}
