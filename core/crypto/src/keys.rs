//! Key types with secure memory handling.
//!
//! All key types automatically zeroize their memory on drop to prevent
//! sensitive data from persisting in memory.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::kdf::{derive_key, KdfParams};
use notecrypt_common::{Error, Result};

/// Length of encryption keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Version of the serialized key record.
pub const KEY_FORMAT_VERSION: u8 = 1;

/// Symmetric key derived from a user password.
///
/// Lives only for the duration of an encryption or decryption session and
/// is never serialized directly; use [`EncryptionKey::export`] to obtain a
/// storable record.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    key: [u8; KEY_LENGTH],
    #[zeroize(skip)]
    salt: String,
    #[zeroize(skip)]
    params: KdfParams,
}

impl EncryptionKey {
    /// Create a key from raw bytes and the derivation recipe that produced them.
    pub fn new(key: [u8; KEY_LENGTH], salt: impl Into<String>, params: KdfParams) -> Self {
        Self {
            key,
            salt: salt.into(),
            params,
        }
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Salt the key was derived with.
    pub fn salt(&self) -> &str {
        &self.salt
    }

    /// KDF parameters the key was derived with.
    pub fn params(&self) -> &KdfParams {
        &self.params
    }

    /// Serialize this key, including the raw key bytes, for persistence.
    pub fn export(&self) -> SerializedKey {
        SerializedKey {
            version: KEY_FORMAT_VERSION,
            salt: Some(self.salt.clone()),
            kdf: self.params,
            key: Some(STANDARD.encode(self.key)),
            password: None,
        }
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("key", &"[REDACTED]")
            .field("salt", &self.salt)
            .field("params", &self.params)
            .finish()
    }
}

/// Storage-safe representation of a key.
///
/// Carries either the derived key itself or a password that is re-derived
/// with the recorded salt and parameters. The password is held in memory
/// only: it is skipped by serialization and never written anywhere.
#[derive(Clone, Serialize, Deserialize)]
pub struct SerializedKey {
    /// Record format version.
    pub version: u8,
    /// Salt the key was (or will be) derived with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    /// KDF parameters for re-derivation.
    pub kdf: KdfParams,
    /// Base64 raw key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip)]
    password: Option<Zeroizing<String>>,
}

impl SerializedKey {
    /// Build a password-based key that is derived on use.
    ///
    /// When `salt` is `None` the salt is taken from the cipher being
    /// decrypted, or freshly generated when encrypting.
    pub fn from_password(password: &str, salt: Option<&str>, kdf: KdfParams) -> Self {
        Self {
            version: KEY_FORMAT_VERSION,
            salt: salt.map(str::to_string),
            kdf,
            key: None,
            password: Some(Zeroizing::new(password.to_string())),
        }
    }

    /// Whether this record holds the raw key rather than a password.
    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    /// Whether resolving this record runs the password KDF.
    pub fn needs_derivation(&self) -> bool {
        self.key.is_none() && self.password.is_some()
    }

    /// Turn this record into usable key material.
    ///
    /// `salt_hint` is consulted only for password records without a salt of
    /// their own (typically the salt stored in a `Cipher`).
    ///
    /// # Errors
    /// - Unknown record version
    /// - Raw key that does not decode to KEY_LENGTH bytes
    /// - Neither key nor password present
    /// - Key derivation failure
    ///
    /// # Security
    /// Password records run Argon2id; call this off latency-sensitive paths.
    pub fn resolve(&self, salt_hint: Option<&str>) -> Result<EncryptionKey> {
        if self.version != KEY_FORMAT_VERSION {
            return Err(Error::Format(format!(
                "Unsupported key version: {}",
                self.version
            )));
        }

        if let Some(encoded) = &self.key {
            let decoded = Zeroizing::new(
                STANDARD
                    .decode(encoded)
                    .map_err(|e| Error::Format(format!("Invalid key encoding: {}", e)))?,
            );
            if decoded.len() != KEY_LENGTH {
                return Err(Error::Format(format!(
                    "Invalid key length: expected {}, got {}",
                    KEY_LENGTH,
                    decoded.len()
                )));
            }
            let mut key = [0u8; KEY_LENGTH];
            key.copy_from_slice(&decoded);
            return Ok(EncryptionKey::new(
                key,
                self.salt.clone().unwrap_or_default(),
                self.kdf,
            ));
        }

        match &self.password {
            Some(password) => {
                let salt = self.salt.as_deref().or(salt_hint);
                derive_key(password.as_bytes(), salt, &self.kdf)
            }
            None => Err(Error::Format(
                "Serialized key has neither key nor password".to_string(),
            )),
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

impl fmt::Debug for SerializedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializedKey")
            .field("version", &self.version)
            .field("salt", &self.salt)
            .field("kdf", &self.kdf)
            .field("key", &self.key.as_ref().map(|_| "[REDACTED]"))
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl From<&EncryptionKey> for SerializedKey {
    fn from(key: &EncryptionKey) -> Self {
        key.export()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> KdfParams {
        KdfParams::custom(1024, 1, 1)
    }

    #[test]
    fn test_export_resolve_roundtrip() {
        let key = EncryptionKey::new([7u8; KEY_LENGTH], "salt", fast());
        let exported = key.export();

        let restored = exported.resolve(None).unwrap();
        assert_eq!(restored.as_bytes(), key.as_bytes());
        assert_eq!(restored.salt(), "salt");
    }

    #[test]
    fn test_export_json_never_contains_password() {
        let record = SerializedKey::from_password("hunter2", Some("salt"), fast());
        let json = record.to_json().unwrap();

        assert!(!json.contains("hunter2"));
        assert!(!json.contains("password"));
    }

    #[test]
    fn test_json_roundtrip_keeps_key() {
        let key = EncryptionKey::new([9u8; KEY_LENGTH], "s", fast());
        let json = key.export().to_json().unwrap();
        let restored = SerializedKey::from_json(&json).unwrap().resolve(None).unwrap();

        assert_eq!(restored.as_bytes(), &[9u8; KEY_LENGTH]);
    }

    #[test]
    fn test_password_record_uses_salt_hint() {
        let record = SerializedKey::from_password("pw", None, fast());
        let a = record.resolve(Some("salt-a")).unwrap();
        let b = record.resolve(Some("salt-a")).unwrap();
        let c = record.resolve(Some("salt-b")).unwrap();

        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), c.as_bytes());
        assert_eq!(a.salt(), "salt-a");
    }

    #[test]
    fn test_wrong_key_length_fails() {
        let mut record = EncryptionKey::new([1u8; KEY_LENGTH], "s", fast()).export();
        record.key = Some(STANDARD.encode([1u8; 16]));

        assert!(matches!(record.resolve(None), Err(Error::Format(_))));
    }

    #[test]
    fn test_unknown_version_fails() {
        let mut record = EncryptionKey::new([1u8; KEY_LENGTH], "s", fast()).export();
        record.version = 99;

        assert!(matches!(record.resolve(None), Err(Error::Format(_))));
    }

    #[test]
    fn test_empty_record_fails() {
        let json = r#"{"version":1,"kdf":{"version":1,"memory_cost":1024,"time_cost":1,"parallelism":1}}"#;
        let record = SerializedKey::from_json(json).unwrap();

        assert!(matches!(record.resolve(None), Err(Error::Format(_))));
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = EncryptionKey::new([0xAB; KEY_LENGTH], "s", fast());
        let debug = format!("{:?} {:?}", key, key.export());

        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains(&STANDARD.encode([0xAB; KEY_LENGTH])));
    }
}
