//! COSE signing, verification and key-wrapped encryption.

mod consts;
pub mod encrypt;
mod error;
pub mod header;
pub mod keys;
pub mod sign;
pub mod signature;
pub mod strict;
pub mod structure;
mod crypto;
#[cfg(test)]
mod test_vectors;

use core::sync::atomic::{AtomicBool, Ordering};

pub use consts::*;
pub use encrypt::{
    decrypt_aead_in_place, decrypt_envelope, decrypt_envelope_with, encrypt_aead,
    encrypt_envelope, encrypt_top_level, CoseEncrypt, DecryptFn,
};
pub use error::Error;
pub use header::HeaderMap;
pub use keys::KeyLookup;
pub use sign::{is_signed, sign, verify, CoseSign1};
pub use strict::verify_strict;
pub use structure::Context;

/// The result type for the `cose` module.
pub type Result<T> = core::result::Result<T, Error>;

static SILENCE_ERRORS: AtomicBool = AtomicBool::new(false);

/// Enables or disables failure diagnostics, returning the previous setting.
///
/// This only controls logging. Probing callers (e.g. extracting a key id
/// before the key is known) use it to keep expected failures quiet; results
/// are never affected.
pub fn set_silence_errors(value: bool) -> bool {
    SILENCE_ERRORS.swap(value, Ordering::SeqCst)
}

pub(crate) fn errors_silenced() -> bool {
    SILENCE_ERRORS.load(Ordering::SeqCst)
}

/// Silences failure diagnostics until dropped.
pub struct SilenceErrors {
    previous: bool,
}

impl SilenceErrors {
    pub fn new() -> SilenceErrors {
        SilenceErrors {
            previous: set_silence_errors(true),
        }
    }
}

impl Default for SilenceErrors {
    fn default() -> Self {
        SilenceErrors::new()
    }
}

impl Drop for SilenceErrors {
    fn drop(&mut self) {
        set_silence_errors(self.previous);
    }
}

/// Logs a failure unless diagnostics are silenced.
macro_rules! cose_error {
    ($($arg:tt)+) => {
        if !$crate::cose::errors_silenced() {
            log::error!($($arg)+);
        }
    };
}
pub(crate) use cose_error;
