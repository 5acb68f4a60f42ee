//! Single-shot encryption of bounded values.
//!
//! Wraps the AEAD primitive in a self-describing envelope ([`Cipher`])
//! that records the algorithm, nonce, salt and output encoding, so the
//! value can be stored as JSON and decrypted later with only the key.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::trace;
use zeroize::Zeroizing;

use crate::aead;
use crate::keys::EncryptionKey;
use notecrypt_common::{Encoding, Error, Result};

/// Algorithm identifier recorded in every cipher; also bound as associated data.
pub const ALGORITHM: &str = "xcha20poly1305-argon2id13-v1";

/// Binary or text payload, depending on the chosen encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Encoded {
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Base64 or hex string.
    Text(String),
}

/// Plaintext together with its declared encoding.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", content = "data", rename_all = "lowercase")]
pub enum Plaintext {
    /// UTF-8 text.
    Text(String),
    /// Base64-encoded bytes.
    Base64(String),
    /// Hex-encoded bytes.
    Hex(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

impl Plaintext {
    /// Encoding this plaintext is declared in.
    pub fn encoding(&self) -> Encoding {
        match self {
            Plaintext::Text(_) => Encoding::Text,
            Plaintext::Base64(_) => Encoding::Base64,
            Plaintext::Hex(_) => Encoding::Hex,
            Plaintext::Bytes(_) => Encoding::Bytes,
        }
    }

    /// Decode to the raw bytes that get encrypted.
    pub fn to_bytes(&self) -> Result<Zeroizing<Vec<u8>>> {
        let bytes = match self {
            Plaintext::Text(text) => text.as_bytes().to_vec(),
            Plaintext::Base64(text) => Encoding::Base64.decode(text)?,
            Plaintext::Hex(text) => Encoding::Hex.decode(text)?,
            Plaintext::Bytes(bytes) => bytes.clone(),
        };
        Ok(Zeroizing::new(bytes))
    }

    /// Wrap decrypted bytes in the requested encoding.
    pub fn from_bytes(bytes: Vec<u8>, encoding: Encoding) -> Result<Self> {
        Ok(match encoding {
            Encoding::Bytes => Plaintext::Bytes(bytes),
            Encoding::Text => Plaintext::Text(
                String::from_utf8(bytes)
                    .map_err(|_| Error::Format("Plaintext is not valid UTF-8".to_string()))?,
            ),
            Encoding::Base64 => Plaintext::Base64(Encoding::Base64.encode(&bytes)?),
            Encoding::Hex => Plaintext::Hex(Encoding::Hex.encode(&bytes)?),
        })
    }

    /// Text content, if this is a text plaintext.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Plaintext::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl From<&str> for Plaintext {
    fn from(text: &str) -> Self {
        Plaintext::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Plaintext {
    fn from(bytes: Vec<u8>) -> Self {
        Plaintext::Bytes(bytes)
    }
}

impl fmt::Debug for Plaintext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = match self {
            Plaintext::Text(s) | Plaintext::Base64(s) | Plaintext::Hex(s) => s.len(),
            Plaintext::Bytes(b) => b.len(),
        };
        write!(f, "Plaintext({}, [REDACTED; {} bytes])", self.encoding(), len)
    }
}

/// Sealed value produced by [`encrypt`].
///
/// Meaningless without its key: decrypting under any other key fails with
/// `Error::Authentication`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cipher {
    /// Algorithm identifier, see [`ALGORITHM`].
    pub alg: String,
    /// Encoding of `data`.
    pub format: Encoding,
    /// Base64 nonce.
    pub iv: String,
    /// Salt of the key that sealed this value.
    pub salt: String,
    /// Plaintext length in bytes.
    pub length: usize,
    /// Ciphertext followed by the tag.
    pub data: Encoded,
}

impl Cipher {
    /// Raw `ciphertext || tag` bytes.
    pub fn ciphertext(&self) -> Result<Vec<u8>> {
        match (&self.data, self.format) {
            (Encoded::Bytes(bytes), Encoding::Bytes) => Ok(bytes.clone()),
            (Encoded::Text(text), Encoding::Base64 | Encoding::Hex) => self.format.decode(text),
            _ => Err(Error::Format(format!(
                "Cipher data does not match declared format {}",
                self.format
            ))),
        }
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Format(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Format(e.to_string()))
    }
}

/// Encrypt a plaintext value.
///
/// # Preconditions
/// - `format` is `Bytes`, `Base64` or `Hex`
///
/// # Postconditions
/// - A fresh random nonce is used for every call
/// - Empty plaintext yields a tag-only ciphertext
///
/// # Errors
/// - `Format` for `Encoding::Text` or an undecodable plaintext
pub fn encrypt(key: &EncryptionKey, plaintext: &Plaintext, format: Encoding) -> Result<Cipher> {
    if format == Encoding::Text {
        return Err(Error::Format(
            "Ciphertext cannot be encoded as text".to_string(),
        ));
    }

    let bytes = plaintext.to_bytes()?;
    let sealed = aead::seal(key.as_bytes(), &bytes, ALGORITHM.as_bytes())?;

    let data = match format {
        Encoding::Bytes => Encoded::Bytes(sealed.ciphertext),
        textual => Encoded::Text(textual.encode(&sealed.ciphertext)?),
    };
    trace!(length = bytes.len(), %format, "Sealed value");

    Ok(Cipher {
        alg: ALGORITHM.to_string(),
        format,
        iv: STANDARD.encode(sealed.nonce),
        salt: key.salt().to_string(),
        length: bytes.len(),
        data,
    })
}

/// Decrypt a cipher into a plaintext of the requested encoding.
///
/// # Errors
/// - `Format` for an unknown algorithm, undecodable iv or data, or a
///   length that disagrees with the authenticated plaintext
/// - `Authentication` if the tag does not verify; nothing is returned
pub fn decrypt(key: &EncryptionKey, cipher: &Cipher, format: Encoding) -> Result<Plaintext> {
    if cipher.alg != ALGORITHM {
        return Err(Error::Format(format!("Unsupported algorithm: {}", cipher.alg)));
    }

    let nonce = STANDARD
        .decode(&cipher.iv)
        .map_err(|e| Error::Format(format!("Invalid iv encoding: {}", e)))?;
    let ciphertext = cipher.ciphertext()?;

    let plaintext = Zeroizing::new(aead::open(
        key.as_bytes(),
        &nonce,
        &ciphertext,
        ALGORITHM.as_bytes(),
    )?);

    if plaintext.len() != cipher.length {
        return Err(Error::Format(format!(
            "Plaintext length mismatch: expected {}, got {}",
            cipher.length,
            plaintext.len()
        )));
    }

    Plaintext::from_bytes(plaintext.to_vec(), format)
}
