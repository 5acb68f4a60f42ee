//! Common types used throughout notecrypt.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroize;

use crate::{Error, Result};

/// Representation of binary data at the API boundary.
///
/// Ciphers may be produced as raw bytes, base64 or hex. Plaintexts may
/// additionally be returned as UTF-8 text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Raw bytes, no textual encoding.
    #[serde(alias = "uint8array")]
    Bytes,
    /// Standard base64 with padding.
    #[default]
    Base64,
    /// Lowercase hexadecimal.
    Hex,
    /// UTF-8 text.
    Text,
}

impl Encoding {
    /// Name used in serialized records and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Bytes => "bytes",
            Encoding::Base64 => "base64",
            Encoding::Hex => "hex",
            Encoding::Text => "text",
        }
    }

    /// Whether values in this encoding are carried as a string.
    pub fn is_textual(&self) -> bool {
        !matches!(self, Encoding::Bytes)
    }

    /// Encode bytes into this (textual) encoding.
    ///
    /// # Errors
    /// - `Encoding::Bytes` has no string form
    /// - `Encoding::Text` requires valid UTF-8
    pub fn encode(&self, bytes: &[u8]) -> Result<String> {
        match self {
            Encoding::Base64 => Ok(STANDARD.encode(bytes)),
            Encoding::Hex => Ok(hex::encode(bytes)),
            Encoding::Text => String::from_utf8(bytes.to_vec())
                .map_err(|_| Error::Format("Data is not valid UTF-8".to_string())),
            Encoding::Bytes => Err(Error::Format(
                "Raw bytes have no textual encoding".to_string(),
            )),
        }
    }

    /// Decode a string in this encoding back to bytes.
    pub fn decode(&self, text: &str) -> Result<Vec<u8>> {
        match self {
            Encoding::Base64 => STANDARD
                .decode(text)
                .map_err(|e| Error::Format(format!("Invalid base64: {}", e))),
            Encoding::Hex => {
                hex::decode(text).map_err(|e| Error::Format(format!("Invalid hex: {}", e)))
            }
            Encoding::Text => Ok(text.as_bytes().to_vec()),
            Encoding::Bytes => Err(Error::Format(
                "Raw bytes have no textual encoding".to_string(),
            )),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Encoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bytes" | "uint8array" => Ok(Encoding::Bytes),
            "base64" => Ok(Encoding::Base64),
            "hex" => Ok(Encoding::Hex),
            "text" | "utf8" | "utf-8" => Ok(Encoding::Text),
            other => Err(Error::Format(format!("Unknown output format: {}", other))),
        }
    }
}

/// Sensitive data wrapper that zeroizes on drop.
#[derive(Clone, Default, Zeroize)]
#[zeroize(drop)]
pub struct SensitiveBytes(Vec<u8>);

impl SensitiveBytes {
    /// Create new sensitive bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    /// Create an empty buffer with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }

    /// Get a reference to the inner bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Append bytes.
    pub fn extend_from_slice(&mut self, data: &[u8]) {
        self.0.extend_from_slice(data);
    }

    /// Erase the contents, keeping the allocation for reuse.
    pub fn clear(&mut self) {
        self.0.zeroize();
    }

    /// Get the length.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SensitiveBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SensitiveBytes([REDACTED; {} bytes])", self.0.len())
    }
}
