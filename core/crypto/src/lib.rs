//! Symmetric encryption engine for notecrypt.
//!
//! This module provides:
//! - Password key derivation and hashing using Argon2id
//! - Authenticated encryption of bounded values using XChaCha20-Poly1305
//! - Chunked streaming encryption with per-chunk authentication
//! - A single [`Crypto`] engine tying the three together
//!
//! # Security Guarantees
//! - Nonces are always generated by the engine, never supplied by callers
//! - A stream decrypts successfully only if no chunk was dropped, reordered
//!   or altered, and its terminal chunk is present
//! - All key material is zeroized on drop
//! - No plaintext, password or key material is ever logged

pub mod aead;
pub mod cipher;
pub mod config;
pub mod facade;
pub mod kdf;
pub mod keys;
pub mod stream;
pub mod streamable;

pub use cipher::{Cipher, Encoded, Plaintext, ALGORITHM};
pub use config::CryptoConfig;
pub use facade::Crypto;
pub use kdf::{derive_key, export_key, hash, verify_hash, KdfParams};
pub use keys::{EncryptionKey, SerializedKey, KEY_LENGTH};
pub use stream::{
    decrypt_stream, encrypt_stream, Chunk, DecryptingStream, EncryptingStream, SessionState,
    StreamHeader, DEFAULT_CHUNK_SIZE,
};
pub use streamable::{MemoryStream, Streamable};

pub use notecrypt_common::{Encoding, Error, Result};
