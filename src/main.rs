//! package-firmware: build, sign, verify, encrypt and decrypt firmware loader
//! packages.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::fs;
use std::path::Path;

use firmware_cose::package;

#[derive(Parser, Debug)]
#[command(name = "package-firmware")]
#[command(version)]
#[command(about = "Build, sign and encrypt Trusty firmware loader packages")]
#[command(long_about = r#"
Positional arguments depend on the mode:
  --mode build   <output> <ELF> <manifest>
  --mode sign    <output> <input> <key> <key id>
  --mode verify  <input> <key>
  --mode encrypt <output> <input> <key> <key id>
  --mode decrypt <output> <input> <key>
  --mode info    <input>

Signing keys are DER encoded EC private keys, verification keys DER encoded
public keys and encryption keys raw 16 byte AES-128 keys.
"#)]
struct Args {
    /// Operation to perform
    #[arg(short, long, value_enum)]
    mode: Mode,

    /// Verify the signature in strict mode
    #[arg(short, long)]
    strict: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Files and key ids, as required by the mode
    args: Vec<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Mode {
    Build,
    Sign,
    Verify,
    Encrypt,
    Decrypt,
    Info,
}

fn read(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    fs::read(path).with_context(|| format!("Failed to read file '{}'", path.display()))
}

fn write(path: impl AsRef<Path>, data: &[u8]) -> Result<()> {
    let path = path.as_ref();
    fs::write(path, data).with_context(|| format!("Failed to write to file '{}'", path.display()))
}

fn parse_key_id(key_id: &str) -> Result<u8> {
    let value: i64 = key_id
        .parse()
        .with_context(|| format!("Invalid key id: {}", key_id))?;
    u8::try_from(value).with_context(|| format!("Key id out of range: {}", value))
}

fn print_info(input: &str) -> Result<()> {
    let info = package::info(&read(input)?)?;
    println!("Signed: {}", if info.signed { "YES" } else { "NO" });
    if let Some(key_id) = info.signature_key_id {
        println!("Signature key id: {}", key_id);
    }
    println!("Encrypted: {}", if info.encrypted { "YES" } else { "NO" });
    if let Some(key_id) = info.encryption_key_id {
        println!("Encryption key id: {}", key_id);
    }
    Ok(())
}

fn run(args: &Args) -> Result<()> {
    match (args.mode, args.args.as_slice()) {
        (Mode::Build, [output, elf, manifest]) => {
            let package = package::build(&read(elf)?, &read(manifest)?)?;
            write(output, &package)
        }
        (Mode::Sign, [output, input, key, key_id]) => {
            let key_id = parse_key_id(key_id)?;
            let signed = package::sign(&read(input)?, &read(key)?, key_id)
                .context("Failed to sign package")?;
            write(output, &signed)
        }
        (Mode::Verify, [input, key]) => {
            package::verify(&read(input)?, &read(key)?, args.strict)
                .context("Signature verification failed")?;
            eprintln!("Signature verification passed");
            Ok(())
        }
        (Mode::Encrypt, [output, input, key, key_id]) => {
            let key_id = parse_key_id(key_id)?;
            let encrypted = package::encrypt(&read(input)?, &read(key)?, key_id)
                .context("Failed to encrypt ELF file")?;
            write(output, &encrypted)
        }
        (Mode::Decrypt, [output, input, key]) => {
            let decrypted = package::decrypt(&read(input)?, &read(key)?)
                .context("Failed to decrypt ELF file")?;
            write(output, &decrypted)
        }
        (Mode::Info, [input]) => print_info(input),
        (mode, args) => bail!(
            "Wrong number of arguments for mode {:?}: {} (see --help)",
            mode,
            args.len()
        ),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    run(&args)
}
