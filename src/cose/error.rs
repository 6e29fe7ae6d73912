use thiserror::Error;

/// Failures of the COSE operations.
///
/// Structural, semantic and cryptographic failures are all reported through
/// this one type; none of them leave partial output behind.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed CBOR.
    #[error("CBOR error: {0}")]
    Cbor(#[from] serde_cbor::Error),
    /// Well-formed CBOR with the wrong shape.
    #[error("invalid COSE structure: {0}")]
    Structure(&'static str),
    #[error("invalid {what} length, expected {expected} got {actual}")]
    InvalidLength {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    /// An ECDSA scalar does not fit the fixed-width COSE encoding.
    #[error("invalid ECDSA {0} value size")]
    SignatureSize(&'static str),
    #[error("unsupported algorithm {0}")]
    UnsupportedAlgorithm(i128),
    #[error("missing {0} header")]
    MissingHeader(&'static str),
    #[error("embedded payload and detached content cannot both be non-empty")]
    AmbiguousPayload,
    #[error("no key for key id {0}")]
    UnknownKeyId(u8),
    /// Input does not match the fixed strict-mode layout.
    #[error("input does not match the strict signature layout")]
    TemplateMismatch,
    #[error("invalid key material")]
    InvalidKey,
    #[error("signing failed")]
    Signing,
    #[error("signature verification failed")]
    BadSignature,
    /// Encryption failure or authentication tag mismatch.
    #[error("AEAD operation failed")]
    Aead,
    #[error("failed to obtain random bytes")]
    Random,
}

impl From<aes_gcm::Error> for Error {
    fn from(_: aes_gcm::Error) -> Error {
        Error::Aead
    }
}

impl From<p256::ecdsa::Error> for Error {
    fn from(_: p256::ecdsa::Error) -> Error {
        Error::BadSignature
    }
}

impl From<rand_core::Error> for Error {
    fn from(_: rand_core::Error) -> Error {
        Error::Random
    }
}
