//! Authenticated encryption using XChaCha20-Poly1305.
//!
//! XChaCha20-Poly1305 provides both confidentiality and authenticity,
//! with a 24-byte nonce that is safe for random generation.
//!
//! Nonces are never accepted from callers for encryption: the public
//! sealing functions always draw a fresh nonce from the OS RNG. Only the
//! stream module seals under derived nonces, through a crate-private entry
//! point.

use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, AeadCore, KeyInit, OsRng, Payload},
    XChaCha20Poly1305,
};

use crate::keys::KEY_LENGTH;
use notecrypt_common::{Error, Result};

/// Nonce size for XChaCha20-Poly1305 (24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Output of [`seal`]: the generated nonce and `ciphertext || tag`.
#[derive(Debug, Clone)]
pub struct Sealed {
    /// Nonce generated for this message.
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext followed by the Poly1305 tag.
    pub ciphertext: Vec<u8>,
}

fn cipher_for(key: &[u8]) -> Result<XChaCha20Poly1305> {
    if key.len() != KEY_LENGTH {
        return Err(Error::Format(format!(
            "Invalid key length: expected {}, got {}",
            KEY_LENGTH,
            key.len()
        )));
    }
    Ok(XChaCha20Poly1305::new(GenericArray::from_slice(key)))
}

/// Encrypt plaintext with associated data under a fresh random nonce.
///
/// # Postconditions
/// - The nonce is randomly generated
/// - `ciphertext.len() == plaintext.len() + TAG_SIZE`
///
/// # Errors
/// - Returns error if key length is incorrect
/// - Returns error if encryption fails
pub fn seal(key: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<Sealed> {
    let cipher = cipher_for(key)?;
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    nonce_bytes.copy_from_slice(&nonce);

    Ok(Sealed {
        nonce: nonce_bytes,
        ciphertext,
    })
}

/// Decrypt `ciphertext || tag` with the nonce and associated data it was sealed with.
///
/// # Errors
/// - `Format` if the key or nonce length is wrong or the input is shorter than a tag
/// - `Authentication` if the tag does not verify; no plaintext is released
pub fn open(key: &[u8], nonce: &[u8], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;

    if nonce.len() != NONCE_SIZE {
        return Err(Error::Format(format!(
            "Invalid nonce length: expected {}, got {}",
            NONCE_SIZE,
            nonce.len()
        )));
    }
    if ciphertext.len() < TAG_SIZE {
        return Err(Error::Format("Ciphertext too short".to_string()));
    }

    cipher
        .decrypt(
            GenericArray::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| Error::Authentication)
}

/// Seal under a nonce derived by the caller.
///
/// Reserved for the stream module, whose per-chunk nonces are unique by
/// construction.
pub(crate) fn seal_with_nonce(
    key: &[u8],
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;

    cipher
        .encrypt(GenericArray::from_slice(nonce), Payload { msg: plaintext, aad })
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let key = [42u8; KEY_LENGTH];
        let plaintext = b"Hello, World!";

        let sealed = seal(&key, plaintext, b"aad").unwrap();
        let decrypted = open(&key, &sealed.nonce, &sealed.ciphertext, b"aad").unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_ciphertext_size() {
        let key = [42u8; KEY_LENGTH];
        let plaintext = b"Test message";

        let sealed = seal(&key, plaintext, &[]).unwrap();

        assert_eq!(sealed.ciphertext.len(), plaintext.len() + TAG_SIZE);
    }

    #[test]
    fn test_different_nonce_each_time() {
        let key = [42u8; KEY_LENGTH];
        let plaintext = b"Same plaintext";

        let s1 = seal(&key, plaintext, &[]).unwrap();
        let s2 = seal(&key, plaintext, &[]).unwrap();

        assert_ne!(s1.nonce, s2.nonce);
        assert_ne!(s1.ciphertext, s2.ciphertext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = seal(&[1u8; KEY_LENGTH], b"Secret data", &[]).unwrap();
        let result = open(&[2u8; KEY_LENGTH], &sealed.nonce, &sealed.ciphertext, &[]);

        assert!(matches!(result, Err(Error::Authentication)));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = [42u8; KEY_LENGTH];

        let mut sealed = seal(&key, b"Important data", &[]).unwrap();
        sealed.ciphertext[5] ^= 0xFF;

        assert!(matches!(
            open(&key, &sealed.nonce, &sealed.ciphertext, &[]),
            Err(Error::Authentication)
        ));
    }

    #[test]
    fn test_aad_mismatch_fails() {
        let key = [42u8; KEY_LENGTH];
        let sealed = seal(&key, b"payload", b"context-a").unwrap();

        assert!(open(&key, &sealed.nonce, &sealed.ciphertext, b"context-a").is_ok());
        assert!(matches!(
            open(&key, &sealed.nonce, &sealed.ciphertext, b"context-b"),
            Err(Error::Authentication)
        ));
    }

    #[test]
    fn test_invalid_key_length() {
        assert!(matches!(seal(&[0u8; 16], b"data", &[]), Err(Error::Format(_))));
    }

    #[test]
    fn test_short_input_is_format_error() {
        let key = [42u8; KEY_LENGTH];
        assert!(matches!(
            open(&key, &[0u8; NONCE_SIZE], &[0u8; 10], &[]),
            Err(Error::Format(_))
        ));
        assert!(matches!(
            open(&key, &[0u8; 12], &[0u8; 32], &[]),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_seal_with_nonce_is_deterministic() {
        let key = [42u8; KEY_LENGTH];
        let nonce = [1u8; NONCE_SIZE];

        let ct1 = seal_with_nonce(&key, &nonce, b"Deterministic", b"aad").unwrap();
        let ct2 = seal_with_nonce(&key, &nonce, b"Deterministic", b"aad").unwrap();
        assert_eq!(ct1, ct2);

        let decrypted = open(&key, &nonce, &ct1, b"aad").unwrap();
        assert_eq!(decrypted, b"Deterministic");
    }

    #[test]
    fn test_empty_plaintext() {
        let key = [42u8; KEY_LENGTH];

        let sealed = seal(&key, b"", &[]).unwrap();
        assert_eq!(sealed.ciphertext.len(), TAG_SIZE);
        assert_eq!(open(&key, &sealed.nonce, &sealed.ciphertext, &[]).unwrap(), b"");
    }

    #[test]
    fn test_large_plaintext() {
        let key = [42u8; KEY_LENGTH];
        let plaintext = vec![0xABu8; 1_000_000]; // 1 MB

        let sealed = seal(&key, &plaintext, &[]).unwrap();
        let decrypted = open(&key, &sealed.nonce, &sealed.ciphertext, &[]).unwrap();

        assert_eq!(decrypted, plaintext);
    }
}
