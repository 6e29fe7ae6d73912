//! The cryptographic primitives the COSE layer builds on: SHA-256, ECDSA
//! P-256 over a precomputed digest and the system random generator.
//!
//! Private keys are SEC1 (or PKCS#8) DER, public keys SubjectPublicKeyInfo
//! DER. Signatures cross this boundary in their DER form.

use alloc::vec::Vec;
use p256::ecdsa::{
    signature::hazmat::{PrehashSigner, PrehashVerifier},
    Signature, SigningKey, VerifyingKey,
};
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey};
use p256::SecretKey;
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};

use super::{cose_error, Error, Result};

pub const SHA256_DIGEST_SIZE: usize = 32;

pub fn sha256(data: &[u8]) -> [u8; SHA256_DIGEST_SIZE] {
    sha256_parts(&[data])
}

/// Hashes the concatenation of `parts` without materializing it.
pub fn sha256_parts(parts: &[&[u8]]) -> [u8; SHA256_DIGEST_SIZE] {
    let hasher = parts
        .iter()
        .fold(Sha256::new(), |hasher, part| hasher.chain_update(*part));
    let mut digest = [0u8; SHA256_DIGEST_SIZE];
    digest.copy_from_slice(&hasher.finalize());
    digest
}

/// Signs a SHA-256 digest, returning the DER encoded signature.
pub fn sign_digest(private_key: &[u8], digest: &[u8; SHA256_DIGEST_SIZE]) -> Result<Vec<u8>> {
    let secret = SecretKey::from_sec1_der(private_key)
        .or_else(|_| SecretKey::from_pkcs8_der(private_key))
        .map_err(|_| {
            cose_error!("Failed to parse EC private key");
            Error::InvalidKey
        })?;
    let signer = SigningKey::from(&secret);
    let signature: Signature = signer.sign_prehash(digest).map_err(|_| {
        cose_error!("Failed to sign digest");
        Error::Signing
    })?;
    Ok(signature.to_der().as_bytes().to_vec())
}

/// Checks a DER encoded signature over a SHA-256 digest.
pub fn verify_digest(
    public_key: &[u8],
    digest: &[u8; SHA256_DIGEST_SIZE],
    signature: &[u8],
) -> Result<()> {
    let verifier = VerifyingKey::from_public_key_der(public_key).map_err(|_| {
        cose_error!("Error parsing EC public key");
        Error::InvalidKey
    })?;
    let signature = Signature::from_der(signature)?;
    verifier.verify_prehash(digest, &signature).map_err(|e| {
        cose_error!("Error verifying signature");
        Error::from(e)
    })
}

/// Returns `N` bytes from the operating system's secure generator.
pub fn random_array<const N: usize>() -> Result<[u8; N]> {
    let mut out = [0u8; N];
    OsRng.try_fill_bytes(&mut out).map_err(|e| {
        cose_error!("Failed to generate {} random bytes", N);
        Error::from(e)
    })?;
    Ok(out)
}
