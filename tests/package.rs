use firmware_cose::cose::{self, KeyLookup};
use firmware_cose::package::{self, Content, Package};
use p256::pkcs8::EncodePublicKey;
use p256::SecretKey;
use rand_core::OsRng;

const KEK: [u8; 16] = [
    0x0F, 0x1E, 0x2D, 0x3C, 0x4B, 0x5A, 0x69, 0x78, 0x87, 0x96, 0xA5, 0xB4, 0xC3, 0xD2, 0xE1, 0xF0,
];

fn key_pair() -> (Vec<u8>, Vec<u8>) {
    let secret = SecretKey::random(&mut OsRng);
    let public_key = secret.public_key().to_public_key_der().unwrap();
    (
        secret.to_sec1_der().unwrap().to_vec(),
        public_key.as_bytes().to_vec(),
    )
}

fn image() -> Vec<u8> {
    (0..4096u32).map(|i| (i * 7 + 3) as u8).collect()
}

#[test]
fn sign_verify_encrypt_decrypt() {
    let image = image();
    let manifest = vec![0x4D; 64];
    let (private_key, public_key) = key_pair();
    let (_, other_public_key) = key_pair();

    let built = package::build(&image, &manifest).unwrap();
    let signed = package::sign(&built, &private_key, 1).unwrap();

    let range = package::verify(&signed, &public_key, false).unwrap();
    assert_eq!(&signed[range.clone()], &built[..]);
    assert_eq!(package::verify(&signed, &public_key, true).unwrap(), range);
    assert!(package::verify(&signed, &other_public_key, false).is_err());
    assert!(package::verify(&signed, &other_public_key, true).is_err());
    assert!(package::sign(&signed, &private_key, 1).is_err());
    assert!(package::verify(&built, &public_key, false).is_err());

    let encrypted = package::encrypt(&built, &KEK, 7).unwrap();
    let parsed = Package::parse(&encrypted, true).unwrap();
    let mut envelope = match parsed.content {
        Content::Encrypted(envelope) => envelope,
        Content::Plain(_) => panic!("image was not encrypted"),
    };
    let lookup = |key_id: u8| if key_id == 7 { Some(KEK.to_vec()) } else { None };
    assert_eq!(lookup.key(7).unwrap().len(), 16);
    let plain = cose::decrypt_envelope(&mut envelope, &lookup, b"", false).unwrap();
    assert_eq!(&envelope[plain], &image[..]);

    let decrypted = package::decrypt(&encrypted, &KEK).unwrap();
    let parsed = Package::parse(&decrypted, true).unwrap();
    assert_eq!(parsed.content, Content::Plain(image));
    assert_eq!(parsed.manifest, manifest);
    assert!(package::decrypt(&encrypted, &[0u8; 16]).is_err());
}

#[test]
fn encrypted_packages_can_be_signed() {
    let (private_key, public_key) = key_pair();
    let built = package::build(&image(), b"manifest").unwrap();
    let encrypted = package::encrypt(&built, &KEK, 9).unwrap();
    let signed = package::sign(&encrypted, &private_key, 4).unwrap();
    let range = package::verify(&signed, &public_key, true).unwrap();
    assert_eq!(package::decrypt(&signed[range], &KEK).unwrap().len(), built.len() + 2);
    // A signed package has to be unwrapped before decrypting
    assert!(matches!(
        package::decrypt(&signed, &KEK),
        Err(package::Error::AlreadySigned)
    ));
}

#[test]
fn info_reports_key_ids() {
    let (private_key, _) = key_pair();
    let built = package::build(&image(), b"manifest").unwrap();

    let info = package::info(&built).unwrap();
    assert_eq!(info, package::Info::default());

    let encrypted = package::encrypt(&built, &KEK, 7).unwrap();
    let signed = package::sign(&encrypted, &private_key, 42).unwrap();
    let info = package::info(&signed).unwrap();
    assert!(info.signed);
    assert_eq!(info.signature_key_id, Some(42));
    assert!(info.encrypted);
    assert_eq!(info.encryption_key_id, Some(7));

    // Probing does not leave diagnostics silenced
    assert!(!cose::set_silence_errors(false));

    assert!(package::info(b"not a package").is_err());
}
