//! Common error types for notecrypt.

use thiserror::Error;

/// Top-level error type for notecrypt operations.
///
/// Authentication failures carry no detail: the caller learns that the
/// tag did not verify, never which part of the input was wrong.
#[derive(Debug, Error)]
pub enum Error {
    /// Password or salt rejected, or the KDF itself failed.
    #[error("Key derivation error: {0}")]
    KeyDerivation(String),

    /// Tag verification failed (tampering, wrong key, or corruption).
    #[error("Authentication failed")]
    Authentication,

    /// Malformed key, cipher, header or encoding.
    #[error("Invalid format: {0}")]
    Format(String),

    /// The stream collaborator rejected a read or write.
    #[error("Stream I/O error: {0}")]
    StreamIo(#[from] std::io::Error),

    /// The stream ended without its terminal chunk, or chunks arrived out of sequence.
    #[error("Stream truncated: {0}")]
    Truncation(String),

    /// An operation was attempted on a session that has already been torn down.
    #[error("Stream session is closed")]
    SessionClosed,

    /// Cryptographic primitive failed for a reason other than authentication.
    #[error("Cryptographic error: {0}")]
    Crypto(String),
}

impl Error {
    /// Whether this error signals tampering or a wrong key, as opposed to
    /// malformed input or I/O trouble.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Error::Authentication | Error::Truncation(_))
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
