//! Unified entry point over key derivation, value encryption and streams.

use tracing::debug;
use zeroize::Zeroizing;

use crate::cipher::{self, Cipher, Plaintext};
use crate::config::CryptoConfig;
use crate::kdf;
use crate::keys::{EncryptionKey, SerializedKey};
use crate::stream::{self, StreamHeader};
use crate::streamable::Streamable;
use notecrypt_common::{Encoding, Error, Result};

/// Encryption engine.
///
/// Holds only its configuration; every call is independent, so one engine
/// can be shared by reference across tasks. Argon2 work runs on the
/// blocking thread pool so callers on an async runtime are not stalled.
#[derive(Debug, Clone, Default)]
pub struct Crypto {
    config: CryptoConfig,
}

impl Crypto {
    /// Create an engine.
    ///
    /// # Errors
    /// - Returns error if the configuration is invalid
    pub fn new(config: CryptoConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Engine configuration.
    pub fn config(&self) -> &CryptoConfig {
        &self.config
    }

    /// One-way digest of `password` and `salt` for authentication checks.
    pub async fn hash(&self, password: &str, salt: &str) -> Result<String> {
        let password = Zeroizing::new(password.to_string());
        let salt = salt.to_string();
        let params = self.config.hash;

        run_blocking(move || kdf::hash(password.as_bytes(), &salt, &params)).await
    }

    /// Derive a key from a password; a random salt is generated when `salt` is `None`.
    pub async fn derive_key(&self, password: &str, salt: Option<&str>) -> Result<EncryptionKey> {
        let password = Zeroizing::new(password.to_string());
        let salt = salt.map(str::to_string);
        let params = self.config.kdf;

        debug!(salt_supplied = salt.is_some(), "Deriving key");
        run_blocking(move || kdf::derive_key(password.as_bytes(), salt.as_deref(), &params)).await
    }

    /// Derive a key and return it in storable form, without the password.
    pub async fn export_key(&self, password: &str, salt: Option<&str>) -> Result<SerializedKey> {
        self.derive_key(password, salt).await.map(|key| key.export())
    }

    /// Encrypt a value. `format` defaults to base64.
    ///
    /// # Errors
    /// - `Format` if `format` is `Encoding::Text` or the key record is malformed
    /// - `KeyDerivation` if a password key cannot be derived
    pub async fn encrypt(
        &self,
        key: &SerializedKey,
        plaintext: &Plaintext,
        format: Option<Encoding>,
    ) -> Result<Cipher> {
        let format = format.unwrap_or_default();
        if format == Encoding::Text {
            return Err(Error::Format(
                "Ciphertext cannot be encoded as text".to_string(),
            ));
        }

        let key = self.resolve_key(key, None).await?;
        cipher::encrypt(&key, plaintext, format)
    }

    /// Decrypt a value. `format` defaults to UTF-8 text.
    ///
    /// Password keys without their own salt are derived with the salt
    /// recorded in `cipher`.
    ///
    /// # Errors
    /// - `Authentication` if the cipher does not verify under this key
    /// - `Format` if the cipher or key record is malformed
    pub async fn decrypt(
        &self,
        key: &SerializedKey,
        cipher: &Cipher,
        format: Option<Encoding>,
    ) -> Result<Plaintext> {
        let key = self.resolve_key(key, Some(&cipher.salt)).await?;
        cipher::decrypt(&key, cipher, format.unwrap_or(Encoding::Text))
    }

    /// Encrypt a stream.
    ///
    /// Returns the stream header (iv) the caller must persist to decrypt.
    /// `stream_id`, if given, must be supplied again on decryption.
    ///
    /// # Errors
    /// - `KeyDerivation` for a password key without a salt, before any I/O
    pub async fn encrypt_stream(
        &self,
        key: &SerializedKey,
        stream: &mut dyn Streamable,
        stream_id: Option<&str>,
    ) -> Result<String> {
        require_stream_salt(key)?;
        let key = self.resolve_key(key, None).await?;
        let header = stream::encrypt_stream(&key, stream, stream_id, self.config.chunk_size).await?;
        Ok(header.to_string())
    }

    /// Decrypt a stream produced by [`Crypto::encrypt_stream`].
    ///
    /// # Errors
    /// - `Format` if `iv` is not a valid stream header
    /// - `KeyDerivation` for a password key without a salt, before any I/O
    /// - `Truncation` / `Authentication` / `StreamIo` as for
    ///   [`stream::decrypt_stream`]
    pub async fn decrypt_stream(
        &self,
        key: &SerializedKey,
        iv: &str,
        stream: &mut dyn Streamable,
        stream_id: Option<&str>,
    ) -> Result<()> {
        let header: StreamHeader = iv.parse()?;
        require_stream_salt(key)?;
        let key = self.resolve_key(key, None).await?;
        stream::decrypt_stream(&key, header, stream, stream_id).await
    }

    async fn resolve_key(&self, key: &SerializedKey, salt_hint: Option<&str>) -> Result<EncryptionKey> {
        if !key.needs_derivation() {
            return key.resolve(salt_hint);
        }

        let key = key.clone();
        let salt_hint = salt_hint.map(str::to_string);
        run_blocking(move || key.resolve(salt_hint.as_deref())).await
    }
}

/// Streams carry no salt of their own, so a password key must bring one.
fn require_stream_salt(key: &SerializedKey) -> Result<()> {
    if key.needs_derivation() && key.salt.is_none() {
        return Err(Error::KeyDerivation(
            "Password key for a stream needs an explicit salt".to_string(),
        ));
    }
    Ok(())
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Crypto(format!("Blocking task failed: {}", e)))?
}
