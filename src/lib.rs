//! COSE (RFC 8152) signing and key-wrapped encryption for firmware loader
//! packages.
//!
//! The [`cose`] module holds the protocol logic: the to-be-signed and
//! to-be-authenticated structures, header canonicalization, ECDSA signature
//! conversion, `COSE_Sign1` signing and verification (including the fixed
//! layout "strict" verifier) and two-level AES-128-GCM envelope encryption.
//! The [`package`] module builds and transforms the firmware package that
//! these operations protect.

extern crate alloc;

mod cbor;
pub mod cose;
pub mod package;
