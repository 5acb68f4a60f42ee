//! Key derivation using Argon2id.
//!
//! Argon2id is a memory-hard password hashing function that provides
//! resistance to both GPU and time-memory trade-off attacks.
//!
//! Keys and password hashes use separate salt domains and separate cost
//! parameters, so a stored hash can never be replayed as a key.

use argon2::{Algorithm, Argon2, Params, Version};
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::keys::{EncryptionKey, SerializedKey, KEY_LENGTH};
use notecrypt_common::{Error, Result};

/// Current version of the KDF parameter set.
pub const KDF_VERSION: u32 = 1;

/// Length of randomly generated salts, before encoding.
pub const GENERATED_SALT_LENGTH: usize = 16;

/// Longest accepted salt string in bytes.
pub const MAX_SALT_LENGTH: usize = 256;

const KEY_DOMAIN: &[u8] = b"notecrypt/key/v1";
const HASH_DOMAIN: &[u8] = b"notecrypt/hash/v1";

/// Parameters for Argon2id key derivation.
///
/// Recorded alongside every serialized key so that changing the defaults
/// never breaks re-derivation of existing keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Parameter set version.
    pub version: u32,
    /// Memory cost in KiB (e.g., 65536 = 64 MiB).
    pub memory_cost: u32,
    /// Number of iterations.
    pub time_cost: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl KdfParams {
    /// Create parameters with explicit costs.
    pub fn custom(memory_cost: u32, time_cost: u32, parallelism: u32) -> Self {
        Self {
            version: KDF_VERSION,
            memory_cost,
            time_cost,
            parallelism,
        }
    }

    /// Create parameters suitable for interactive use.
    ///
    /// Targets approximately 0.5-1 second of derivation time on a desktop.
    pub fn interactive() -> Self {
        Self::custom(65536, 3, 4) // 64 MiB
    }

    /// Create parameters suitable for sensitive data.
    ///
    /// Higher security parameters that may take several seconds.
    pub fn sensitive() -> Self {
        Self::custom(262144, 4, 4) // 256 MiB
    }

    /// Create moderate parameters for mobile devices.
    pub fn moderate() -> Self {
        Self::custom(32768, 3, 2) // 32 MiB
    }

    /// Parameters used by [`hash`].
    pub fn hashing() -> Self {
        Self::custom(16384, 2, 1) // 16 MiB
    }

    /// Check that Argon2id accepts these parameters.
    ///
    /// # Errors
    /// - Unknown parameter set version
    /// - Costs outside Argon2's accepted ranges
    pub fn validate(&self) -> Result<()> {
        self.argon2().map(|_| ())
    }

    fn argon2(&self) -> Result<Argon2<'static>> {
        if self.version != KDF_VERSION {
            return Err(Error::KeyDerivation(format!(
                "Unsupported KDF version: {}",
                self.version
            )));
        }

        let params = Params::new(
            self.memory_cost,
            self.time_cost,
            self.parallelism,
            Some(KEY_LENGTH),
        )
        .map_err(|e| Error::KeyDerivation(format!("Invalid KDF parameters: {}", e)))?;

        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::moderate()
    }
}

/// Generate a random salt string.
pub fn generate_salt() -> String {
    let mut salt = [0u8; GENERATED_SALT_LENGTH];
    rand::thread_rng().fill_bytes(&mut salt);
    URL_SAFE_NO_PAD.encode(salt)
}

/// Check that a caller-supplied salt is usable.
///
/// Salts are opaque strings; they only need to be non-empty and bounded.
pub fn validate_salt(salt: &str) -> Result<()> {
    if salt.is_empty() {
        return Err(Error::KeyDerivation("Salt cannot be empty".to_string()));
    }
    if salt.len() > MAX_SALT_LENGTH {
        return Err(Error::KeyDerivation(format!(
            "Salt too long: {} bytes (maximum {})",
            salt.len(),
            MAX_SALT_LENGTH
        )));
    }
    Ok(())
}

/// Map a salt string into the fixed-size Argon2 salt for one domain.
fn domain_salt(domain: &[u8], salt: &str) -> [u8; 32] {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update([domain.len() as u8]);
    hasher.update(domain);
    hasher.update(salt.as_bytes());

    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

fn run_argon2(
    password: &[u8],
    domain: &[u8],
    salt: &str,
    params: &KdfParams,
) -> Result<Zeroizing<[u8; KEY_LENGTH]>> {
    if password.is_empty() {
        return Err(Error::KeyDerivation("Password cannot be empty".to_string()));
    }
    validate_salt(salt)?;

    let argon2 = params.argon2()?;
    let mut out = Zeroizing::new([0u8; KEY_LENGTH]);
    argon2
        .hash_password_into(password, &domain_salt(domain, salt), &mut out[..])
        .map_err(|e| Error::KeyDerivation(format!("Key derivation failed: {}", e)))?;

    Ok(out)
}

/// Derive an encryption key from a password using Argon2id.
///
/// # Preconditions
/// - `password` must not be empty
/// - `salt`, when given, must be a non-empty string of at most MAX_SALT_LENGTH bytes
///
/// # Postconditions
/// - The derived key is deterministic given the same password, salt and params
/// - When `salt` is `None` a fresh random salt is generated and recorded in the key
///
/// # Errors
/// - `KeyDerivation` if the password is empty, the salt malformed, or the
///   parameters invalid
///
/// # Security
/// - Password is not stored or logged
/// - Intermediate buffers are zeroized
pub fn derive_key(password: &[u8], salt: Option<&str>, params: &KdfParams) -> Result<EncryptionKey> {
    let salt = match salt {
        Some(salt) => salt.to_string(),
        None => generate_salt(),
    };

    let derived = run_argon2(password, KEY_DOMAIN, &salt, params)?;
    Ok(EncryptionKey::new(*derived, salt, *params))
}

/// Derive a key and return it in storable form.
///
/// The record contains the salt, the KDF parameters and the raw key; the
/// password itself is never embedded.
pub fn export_key(password: &[u8], salt: Option<&str>, params: &KdfParams) -> Result<SerializedKey> {
    derive_key(password, salt, params).map(|key| key.export())
}

/// One-way digest of a password for authentication checks.
///
/// Uses a salt domain distinct from [`derive_key`], so the result is never
/// equal to a derived key even when password, salt and parameters coincide.
pub fn hash(password: &[u8], salt: &str, params: &KdfParams) -> Result<String> {
    let digest = run_argon2(password, HASH_DOMAIN, salt, params)?;
    Ok(STANDARD.encode(&digest[..]))
}

/// Verify a password against a digest produced by [`hash`].
///
/// This performs constant-time comparison to prevent timing attacks.
pub fn verify_hash(password: &[u8], salt: &str, params: &KdfParams, expected: &str) -> Result<bool> {
    let computed = hash(password, salt, params)?;
    Ok(computed.as_bytes().ct_eq(expected.as_bytes()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> KdfParams {
        KdfParams::custom(1024, 1, 1)
    }

    #[test]
    fn test_derive_key_deterministic() {
        let key1 = derive_key(b"test-password-123", Some("salt"), &fast()).unwrap();
        let key2 = derive_key(b"test-password-123", Some("salt"), &fast()).unwrap();

        assert_eq!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_different_salt() {
        let key1 = derive_key(b"test-password-123", Some("s1"), &fast()).unwrap();
        let key2 = derive_key(b"test-password-123", Some("s2"), &fast()).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_different_password() {
        let key1 = derive_key(b"password1", Some("salt"), &fast()).unwrap();
        let key2 = derive_key(b"password2", Some("salt"), &fast()).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_generates_salt() {
        let key1 = derive_key(b"password", None, &fast()).unwrap();
        let key2 = derive_key(b"password", None, &fast()).unwrap();

        assert_ne!(key1.salt(), key2.salt());
        assert_ne!(key1.as_bytes(), key2.as_bytes());

        // The generated salt reproduces the key
        let again = derive_key(b"password", Some(key1.salt()), &fast()).unwrap();
        assert_eq!(again.as_bytes(), key1.as_bytes());
    }

    #[test]
    fn test_derive_key_empty_password_fails() {
        assert!(matches!(
            derive_key(b"", Some("salt"), &fast()),
            Err(Error::KeyDerivation(_))
        ));
    }

    #[test]
    fn test_malformed_salt_fails() {
        assert!(matches!(
            derive_key(b"pw", Some(""), &fast()),
            Err(Error::KeyDerivation(_))
        ));
        let long = "x".repeat(MAX_SALT_LENGTH + 1);
        assert!(matches!(
            derive_key(b"pw", Some(&long), &fast()),
            Err(Error::KeyDerivation(_))
        ));
    }

    #[test]
    fn test_invalid_params_fail() {
        let params = KdfParams::custom(1, 0, 0);
        assert!(params.validate().is_err());
        assert!(derive_key(b"pw", Some("salt"), &params).is_err());

        let mut future = fast();
        future.version = KDF_VERSION + 1;
        assert!(matches!(future.validate(), Err(Error::KeyDerivation(_))));
    }

    #[test]
    fn test_presets_are_valid() {
        for params in [
            KdfParams::interactive(),
            KdfParams::moderate(),
            KdfParams::sensitive(),
            KdfParams::hashing(),
        ] {
            params.validate().unwrap();
        }
    }

    #[test]
    fn test_hash_is_domain_separated_from_key() {
        let key = derive_key(b"password", Some("salt"), &fast()).unwrap();
        let digest = hash(b"password", "salt", &fast()).unwrap();

        assert_ne!(STANDARD.encode(key.as_bytes()), digest);
    }

    #[test]
    fn test_hash_deterministic() {
        let h1 = hash(b"password", "salt", &fast()).unwrap();
        let h2 = hash(b"password", "salt", &fast()).unwrap();
        let h3 = hash(b"password", "other", &fast()).unwrap();

        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
    }

    #[test]
    fn test_verify_hash() {
        let digest = hash(b"secure-password", "salt", &fast()).unwrap();

        assert!(verify_hash(b"secure-password", "salt", &fast(), &digest).unwrap());
        assert!(!verify_hash(b"wrong-password", "salt", &fast(), &digest).unwrap());
    }

    #[test]
    fn test_export_key_matches_derive() {
        let exported = export_key(b"password", Some("salt"), &fast()).unwrap();
        let derived = derive_key(b"password", Some("salt"), &fast()).unwrap();

        assert_eq!(exported.salt.as_deref(), Some("salt"));
        assert_eq!(exported.kdf, fast());
        assert_eq!(exported.resolve(None).unwrap().as_bytes(), derived.as_bytes());
    }
}
