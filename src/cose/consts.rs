// Header labels, from RFC 8152
pub const COSE_LABEL_ALG: i64 = 1;
pub const COSE_LABEL_KID: i64 = 4;
pub const COSE_LABEL_IV: i64 = 5;

// COSE_Key labels
pub const COSE_LABEL_KEY_KTY: i64 = 1;
pub const COSE_LABEL_KEY_ALG: i64 = 3;
pub const COSE_LABEL_KEY_SYMMETRIC_KEY: i64 = -1;
pub const COSE_KEY_TYPE_SYMMETRIC: i64 = 4;

pub const COSE_TAG_SIGN1: u64 = 18;
pub const COSE_TAG_ENCRYPT: u64 = 96;

// From the "COSE Algorithms" registry
pub const COSE_ALG_A128GCM: i64 = 1;
pub const COSE_ALG_ECDSA_256: i64 = -7;

/// Trusty-specific protected header label.
pub const COSE_LABEL_TRUSTY: i64 = -65537;
pub const TRUSTY_APP_NAME: &str = "TrustyApp";
pub const SIGNATURE_FORMAT_VERSION: u64 = 1;

pub const ECDSA_VALUE_SIZE: usize = 32;
pub const ECDSA_SIGNATURE_SIZE: usize = 2 * ECDSA_VALUE_SIZE;

pub const AES_GCM_IV_SIZE: usize = 12;
pub const AES_GCM_TAG_SIZE: usize = 16;
pub const AES_128_GCM_KEY_SIZE: usize = 16;
