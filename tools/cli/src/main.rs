//! notecrypt CLI - Command line front end for the notecrypt engine.
//!
//! Hashes passwords, exports keys, encrypts short values to JSON ciphers
//! and encrypts whole files through the chunked stream engine.

mod framed;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use zeroize::Zeroizing;

use notecrypt_crypto::{
    Cipher, Crypto, CryptoConfig, Encoding, KdfParams, Plaintext, SerializedKey,
};

#[derive(Parser)]
#[command(name = "notecrypt")]
#[command(about = "notecrypt - Password-based note and attachment encryption")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// KDF strength: "interactive", "moderate", or "sensitive".
    #[arg(short, long, global = true, default_value = "moderate")]
    strength: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the password hash for a salt.
    Hash {
        /// Salt to hash with.
        #[arg(long)]
        salt: String,
    },

    /// Derive a key from a password and print it as JSON.
    ExportKey {
        /// Salt (random if omitted).
        #[arg(long)]
        salt: Option<String>,

        /// Write the key to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Encrypt a value and print the cipher as JSON.
    Encrypt {
        /// Key file produced by export-key (password prompt if omitted).
        #[arg(short, long)]
        key: Option<PathBuf>,

        /// Value to encrypt (read from stdin if omitted).
        #[arg(short, long)]
        text: Option<String>,

        /// Encoding of the input value: "text", "base64", or "hex".
        #[arg(long, default_value = "text")]
        input_format: String,

        /// Encoding of the ciphertext: "base64", "hex", or "bytes".
        #[arg(short, long, default_value = "base64")]
        format: String,
    },

    /// Decrypt a JSON cipher and print the value.
    Decrypt {
        /// Key file produced by export-key (password prompt if omitted).
        #[arg(short, long)]
        key: Option<PathBuf>,

        /// Cipher JSON file.
        #[arg(short, long)]
        cipher: PathBuf,

        /// Encoding of the printed value: "text", "base64", or "hex".
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Encrypt a file through the stream engine.
    EncryptFile {
        /// Key file produced by export-key (password prompt if omitted).
        #[arg(short, long)]
        key: Option<PathBuf>,

        /// Plaintext file.
        #[arg(short, long)]
        input: PathBuf,

        /// Encrypted output file.
        #[arg(short, long)]
        output: PathBuf,

        /// Where to write the stream metadata (default: <output>.meta.json).
        #[arg(short, long)]
        meta: Option<PathBuf>,

        /// Label binding the stream to its owner; required again to decrypt.
        #[arg(long)]
        stream_id: Option<String>,

        /// Plaintext bytes per chunk.
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Decrypt a file produced by encrypt-file.
    DecryptFile {
        /// Key file produced by export-key (password prompt if omitted).
        #[arg(short, long)]
        key: Option<PathBuf>,

        /// Encrypted file.
        #[arg(short, long)]
        input: PathBuf,

        /// Plaintext output file.
        #[arg(short, long)]
        output: PathBuf,

        /// Stream metadata file (default: <input>.meta.json).
        #[arg(short, long)]
        meta: Option<PathBuf>,
    },
}

/// Sidecar written next to an encrypted file.
#[derive(Debug, Serialize, Deserialize)]
struct StreamMeta {
    iv: String,
    salt: Option<String>,
    kdf: KdfParams,
    stream_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let kdf = parse_strength(&cli.strength)?;
    let config = CryptoConfig::default().with_kdf(kdf);

    match cli.command {
        Commands::Hash { salt } => cmd_hash(config, &salt).await,

        Commands::ExportKey { salt, output } => {
            cmd_export_key(config, salt.as_deref(), output.as_deref()).await
        }

        Commands::Encrypt {
            key,
            text,
            input_format,
            format,
        } => cmd_encrypt(config, key.as_deref(), text, &input_format, &format).await,

        Commands::Decrypt {
            key,
            cipher,
            format,
        } => cmd_decrypt(config, key.as_deref(), &cipher, &format).await,

        Commands::EncryptFile {
            key,
            input,
            output,
            meta,
            stream_id,
            chunk_size,
        } => {
            let config = match chunk_size {
                Some(size) => config.with_chunk_size(size),
                None => config,
            };
            let meta = meta.unwrap_or_else(|| meta_path(&output));
            cmd_encrypt_file(config, key.as_deref(), &input, &output, &meta, stream_id).await
        }

        Commands::DecryptFile {
            key,
            input,
            output,
            meta,
        } => {
            let meta = meta.unwrap_or_else(|| meta_path(&input));
            cmd_decrypt_file(config, key.as_deref(), &input, &output, &meta).await
        }
    }
}

fn parse_strength(strength: &str) -> Result<KdfParams> {
    match strength {
        "interactive" => Ok(KdfParams::interactive()),
        "moderate" => Ok(KdfParams::moderate()),
        "sensitive" => Ok(KdfParams::sensitive()),
        _ => anyhow::bail!("Invalid strength. Use: interactive, moderate, or sensitive"),
    }
}

fn parse_encoding(value: &str) -> Result<Encoding> {
    value
        .parse::<Encoding>()
        .with_context(|| format!("Invalid encoding: {}", value))
}

fn meta_path(file: &Path) -> PathBuf {
    let mut name = file.as_os_str().to_owned();
    name.push(".meta.json");
    PathBuf::from(name)
}

/// Drop the single line terminator a shell appends to piped input.
fn strip_line_ending(mut input: String) -> String {
    if input.ends_with('\n') {
        input.pop();
        if input.ends_with('\r') {
            input.pop();
        }
    }
    input
}

/// Prompt for password securely.
fn prompt_password(prompt: &str) -> Result<Zeroizing<String>> {
    let password = rpassword::prompt_password(prompt).context("Failed to read password")?;
    if password.is_empty() {
        anyhow::bail!("Password cannot be empty");
    }
    Ok(Zeroizing::new(password))
}

fn build_engine(config: CryptoConfig) -> Result<Crypto> {
    Crypto::new(config).context("Invalid engine configuration")
}

async fn read_key_file(path: &Path) -> Result<SerializedKey> {
    let json = tokio::fs::read_to_string(path)
        .await
        .context("Failed to read key file")?;
    SerializedKey::from_json(&json).context("Invalid key file")
}

/// Key for encryption: the key file, or a password derived once with a
/// fresh salt so the salt can be recorded alongside the output.
async fn encryption_key(crypto: &Crypto, key_file: Option<&Path>) -> Result<SerializedKey> {
    match key_file {
        Some(path) => read_key_file(path).await,
        None => {
            let password = prompt_password("Enter password: ")?;
            crypto
                .export_key(&password, None)
                .await
                .context("Failed to derive key")
        }
    }
}

/// Key for decryption: the key file, or a password record derived on use.
async fn decryption_key(
    key_file: Option<&Path>,
    salt: Option<&str>,
    kdf: KdfParams,
) -> Result<SerializedKey> {
    match key_file {
        Some(path) => read_key_file(path).await,
        None => {
            let password = prompt_password("Enter password: ")?;
            Ok(SerializedKey::from_password(&password, salt, kdf))
        }
    }
}

/// Print a password hash.
async fn cmd_hash(config: CryptoConfig, salt: &str) -> Result<()> {
    let crypto = build_engine(config)?;
    let password = prompt_password("Enter password: ")?;

    let digest = crypto
        .hash(&password, salt)
        .await
        .context("Failed to hash password")?;
    println!("{}", digest);

    Ok(())
}

/// Derive and export a key.
async fn cmd_export_key(
    config: CryptoConfig,
    salt: Option<&str>,
    output: Option<&Path>,
) -> Result<()> {
    let crypto = build_engine(config)?;
    let password = prompt_password("Enter password: ")?;
    let confirm = prompt_password("Confirm password: ")?;

    if password != confirm {
        anyhow::bail!("Passwords do not match");
    }

    let key = crypto
        .export_key(&password, salt)
        .await
        .context("Failed to derive key")?;
    let json = key.to_json()?;

    match output {
        Some(path) => {
            tokio::fs::write(path, &json)
                .await
                .context("Failed to write key file")?;
            info!("Key written to {}", path.display());
        }
        None => println!("{}", json),
    }

    Ok(())
}

/// Encrypt a value to a JSON cipher.
async fn cmd_encrypt(
    config: CryptoConfig,
    key_file: Option<&Path>,
    text: Option<String>,
    input_format: &str,
    format: &str,
) -> Result<()> {
    let crypto = build_engine(config)?;
    let format = parse_encoding(format)?;

    let value = match text {
        Some(text) => text,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            strip_line_ending(buf)
        }
    };

    let plaintext = match parse_encoding(input_format)? {
        Encoding::Text => Plaintext::Text(value),
        Encoding::Base64 => Plaintext::Base64(value),
        Encoding::Hex => Plaintext::Hex(value),
        Encoding::Bytes => Plaintext::Bytes(value.into_bytes()),
    };

    let key = encryption_key(&crypto, key_file).await?;
    let cipher = crypto
        .encrypt(&key, &plaintext, Some(format))
        .await
        .context("Failed to encrypt")?;

    println!("{}", cipher.to_json()?);
    Ok(())
}

/// Decrypt a JSON cipher.
async fn cmd_decrypt(
    config: CryptoConfig,
    key_file: Option<&Path>,
    cipher_file: &Path,
    format: &str,
) -> Result<()> {
    let format = parse_encoding(format)?;
    if !format.is_textual() {
        anyhow::bail!("Output format must be text, base64, or hex");
    }

    let json = tokio::fs::read_to_string(cipher_file)
        .await
        .context("Failed to read cipher file")?;
    let cipher = Cipher::from_json(&json).context("Invalid cipher file")?;

    let kdf = config.kdf;
    let crypto = build_engine(config)?;
    let key = decryption_key(key_file, None, kdf).await?;

    let plaintext = crypto
        .decrypt(&key, &cipher, Some(format))
        .await
        .context("Failed to decrypt")?;

    match plaintext {
        Plaintext::Text(s) | Plaintext::Base64(s) | Plaintext::Hex(s) => println!("{}", s),
        Plaintext::Bytes(_) => anyhow::bail!("Decrypted value is not printable"),
    }
    Ok(())
}

/// Encrypt a file.
async fn cmd_encrypt_file(
    config: CryptoConfig,
    key_file: Option<&Path>,
    input: &Path,
    output: &Path,
    meta_file: &Path,
    stream_id: Option<String>,
) -> Result<()> {
    info!("Encrypting {} to {}", input.display(), output.display());

    let crypto = build_engine(config)?;
    let key = encryption_key(&crypto, key_file).await?;

    let iv = framed::seal_file(&crypto, &key, input, output, stream_id.as_deref())
        .await
        .context("Failed to encrypt file")?;

    let meta = StreamMeta {
        iv,
        salt: key.salt.clone(),
        kdf: key.kdf,
        stream_id,
    };
    tokio::fs::write(meta_file, serde_json::to_string_pretty(&meta)?)
        .await
        .context("Failed to write metadata")?;

    println!("File encrypted: {}", output.display());
    println!("  Metadata: {}", meta_file.display());

    Ok(())
}

/// Decrypt a file.
async fn cmd_decrypt_file(
    config: CryptoConfig,
    key_file: Option<&Path>,
    input: &Path,
    output: &Path,
    meta_file: &Path,
) -> Result<()> {
    info!("Decrypting {} to {}", input.display(), output.display());

    let json = tokio::fs::read_to_string(meta_file)
        .await
        .context("Failed to read metadata")?;
    let meta: StreamMeta = serde_json::from_str(&json).context("Invalid metadata")?;

    let crypto = build_engine(config)?;
    let key = decryption_key(key_file, meta.salt.as_deref(), meta.kdf).await?;

    framed::open_file(
        &crypto,
        &key,
        &meta.iv,
        input,
        output,
        meta.stream_id.as_deref(),
    )
    .await
    .context("Failed to decrypt file")?;

    println!("File decrypted: {}", output.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_strength() {
        assert_eq!(parse_strength("sensitive").unwrap(), KdfParams::sensitive());
        assert!(parse_strength("weak").is_err());
    }

    #[test]
    fn test_strip_line_ending_removes_one_terminator() {
        assert_eq!(strip_line_ending("note\n".to_string()), "note");
        assert_eq!(strip_line_ending("note\r\n".to_string()), "note");
        assert_eq!(strip_line_ending("note\n\n".to_string()), "note\n");
        assert_eq!(strip_line_ending("note".to_string()), "note");
        assert_eq!(strip_line_ending(String::new()), "");
    }

    #[test]
    fn test_meta_path_appends_suffix() {
        assert_eq!(
            meta_path(Path::new("/tmp/note.enc")),
            PathBuf::from("/tmp/note.enc.meta.json")
        );
    }

    #[test]
    fn test_stream_meta_json() {
        let meta = StreamMeta {
            iv: "AQAAEAA".to_string(),
            salt: Some("s1".to_string()),
            kdf: KdfParams::moderate(),
            stream_id: None,
        };
        let restored: StreamMeta =
            serde_json::from_str(&serde_json::to_string(&meta).unwrap()).unwrap();
        assert_eq!(restored.salt.as_deref(), Some("s1"));
        assert_eq!(restored.kdf, meta.kdf);
    }

    #[test]
    fn test_cli_parses_encrypt_file() {
        let cli = Cli::try_parse_from([
            "notecrypt",
            "encrypt-file",
            "-i",
            "a.txt",
            "-o",
            "a.enc",
            "--stream-id",
            "note-1",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::EncryptFile { stream_id: Some(ref id), .. } if id == "note-1"
        ));
    }
}
