//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::kdf::KdfParams;
use crate::stream::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};
use notecrypt_common::{Error, Result};

/// Parameters a [`Crypto`](crate::Crypto) engine is built with.
///
/// Every value chosen here is also recorded in what the engine produces
/// (serialized keys carry their KDF parameters, stream headers carry their
/// chunk size), so changing the configuration never breaks decryption of
/// existing data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoConfig {
    /// Parameters for `derive_key` / `export_key`.
    pub kdf: KdfParams,
    /// Parameters for `hash`.
    pub hash: KdfParams,
    /// Plaintext bytes per stream chunk.
    pub chunk_size: usize,
}

impl CryptoConfig {
    /// Set KDF parameters.
    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    /// Set password hashing parameters.
    pub fn with_hash(mut self, hash: KdfParams) -> Self {
        self.hash = hash;
        self
    }

    /// Set stream chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Check every parameter.
    ///
    /// # Errors
    /// - `KeyDerivation` for invalid KDF or hash parameters
    /// - `Format` for a chunk size outside [1, MAX_CHUNK_SIZE]
    pub fn validate(&self) -> Result<()> {
        self.kdf.validate()?;
        self.hash.validate()?;
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::Format(format!(
                "Chunk size {} is out of range [1, {}]",
                self.chunk_size, MAX_CHUNK_SIZE
            )));
        }
        Ok(())
    }

    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Format(e.to_string()))
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Format(e.to_string()))
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            kdf: KdfParams::moderate(),
            hash: KdfParams::hashing(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        CryptoConfig::default().validate().unwrap();
    }

    #[test]
    fn test_invalid_chunk_size() {
        let config = CryptoConfig::default().with_chunk_size(0);
        assert!(matches!(config.validate(), Err(Error::Format(_))));

        let config = CryptoConfig::default().with_chunk_size(MAX_CHUNK_SIZE + 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_kdf() {
        let config = CryptoConfig::default().with_kdf(KdfParams::custom(0, 0, 0));
        assert!(matches!(config.validate(), Err(Error::KeyDerivation(_))));
    }

    #[test]
    fn test_config_serialization() {
        let config = CryptoConfig::default()
            .with_kdf(KdfParams::interactive())
            .with_chunk_size(4096);

        let restored = CryptoConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(restored, config);
    }
}
