use alloc::vec::Vec;
use hexlit::hex;
use p256::pkcs8::EncodePublicKey;
use p256::SecretKey;
use rand_core::OsRng;
use serde_cbor::Value;

/// `{1: -7, -65537: ["TrustyApp", 1]}` in canonical order.
pub const TRUSTY_PROTECTED_HEADERS: [u8; 20] =
    hex!("a201263a00010000826954727573747941707001");

pub const SHA256_EMPTY: [u8; 32] =
    hex!("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855");

/// The value of the Trusty protected header label.
pub fn trusty_label() -> Value {
    Value::Array(vec![Value::Text("TrustyApp".into()), Value::Integer(1)])
}

/// Returns a fresh `(SEC1 private key, SPKI public key)` pair, both DER.
pub fn generate_key_pair() -> (Vec<u8>, Vec<u8>) {
    let secret = SecretKey::random(&mut OsRng);
    let private_key = secret.to_sec1_der().unwrap().to_vec();
    let public_key = secret
        .public_key()
        .to_public_key_der()
        .unwrap()
        .as_bytes()
        .to_vec();
    (private_key, public_key)
}
