//! Conversion between DER-encoded ECDSA signatures (`SEQUENCE { r INTEGER,
//! s INTEGER }`, as produced and consumed by the signing primitive) and the
//! fixed-size COSE form `r || s` with each scalar zero-padded to 32 bytes.

use alloc::vec::Vec;

use super::{cose_error, Error, Result, ECDSA_SIGNATURE_SIZE, ECDSA_VALUE_SIZE};

const DER_SEQUENCE: u8 = 0x30;
const DER_INTEGER: u8 = 0x02;

/// Converts a DER signature into the 64 byte COSE representation.
///
/// Fails if either integer needs more than 32 bytes.
pub fn der_to_cose(der: &[u8]) -> Result<[u8; ECDSA_SIGNATURE_SIZE]> {
    let (sequence, rest) = read_element(der, DER_SEQUENCE)?;
    if !rest.is_empty() {
        cose_error!("Trailing data after DER signature");
        return Err(Error::Structure("trailing data after DER signature"));
    }
    let (r, sequence) = read_element(sequence, DER_INTEGER)?;
    let (s, sequence) = read_element(sequence, DER_INTEGER)?;
    if !sequence.is_empty() {
        cose_error!("Unexpected element in DER signature");
        return Err(Error::Structure("unexpected element in DER signature"));
    }

    let mut signature = [0u8; ECDSA_SIGNATURE_SIZE];
    place_scalar(r, &mut signature[..ECDSA_VALUE_SIZE], "r")?;
    place_scalar(s, &mut signature[ECDSA_VALUE_SIZE..], "s")?;
    Ok(signature)
}

/// Converts a 64 byte COSE signature back into DER.
pub fn cose_to_der(signature: &[u8]) -> Result<Vec<u8>> {
    if signature.len() != ECDSA_SIGNATURE_SIZE {
        cose_error!(
            "COSE signature length is {}, expected {}",
            signature.len(),
            ECDSA_SIGNATURE_SIZE
        );
        return Err(Error::InvalidLength {
            what: "signature",
            expected: ECDSA_SIGNATURE_SIZE,
            actual: signature.len(),
        });
    }
    let (r, s) = signature.split_at(ECDSA_VALUE_SIZE);

    let mut body = Vec::with_capacity(2 * (ECDSA_VALUE_SIZE + 3));
    write_integer(&mut body, r);
    write_integer(&mut body, s);

    // At most 2 * 35 bytes, so the short length form always applies
    let mut der = Vec::with_capacity(body.len() + 2);
    der.push(DER_SEQUENCE);
    der.push(body.len() as u8);
    der.extend(body);
    Ok(der)
}

/// Splits off one DER element with the expected tag, returning its contents
/// and the remaining input.
fn read_element(input: &[u8], tag: u8) -> Result<(&[u8], &[u8])> {
    let malformed = Error::Structure("malformed DER signature");
    if input.first() != Some(&tag) {
        cose_error!("Error decoding DER signature");
        return Err(malformed);
    }
    let (len, header) = match input.get(1) {
        Some(&b) if b < 0x80 => (usize::from(b), 2),
        Some(0x81) => match input.get(2) {
            Some(&b) if b >= 0x80 => (usize::from(b), 3),
            _ => return Err(malformed),
        },
        _ => {
            cose_error!("Error decoding DER signature length");
            return Err(malformed);
        }
    };
    let contents = input.get(header..header + len).ok_or(malformed)?;
    Ok((contents, &input[header + len..]))
}

fn place_scalar(integer: &[u8], out: &mut [u8], name: &'static str) -> Result<()> {
    match integer.first() {
        None => return Err(Error::Structure("empty DER integer")),
        Some(b) if b & 0x80 != 0 => return Err(Error::Structure("negative DER integer")),
        _ => {}
    }
    let magnitude = strip_leading_zeros(integer);
    if magnitude.len() > out.len() {
        cose_error!("Invalid ECDSA {} value size ({})", name, magnitude.len());
        return Err(Error::SignatureSize(name));
    }
    let start = out.len() - magnitude.len();
    out[start..].copy_from_slice(magnitude);
    Ok(())
}

fn write_integer(out: &mut Vec<u8>, scalar: &[u8]) {
    let magnitude = strip_leading_zeros(scalar);
    let pad = magnitude.first().map_or(true, |b| b & 0x80 != 0);
    out.push(DER_INTEGER);
    out.push((magnitude.len() + usize::from(pad)) as u8);
    if pad {
        out.push(0);
    }
    out.extend(magnitude);
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let zeros = bytes.iter().take_while(|b| **b == 0).count();
    &bytes[zeros..]
}
