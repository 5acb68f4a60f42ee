//! Streaming encryption for data of unbounded length.
//!
//! Data is cut into fixed-size chunks, each sealed independently with
//! XChaCha20-Poly1305. Every stream starts from a fresh random seed that is
//! returned to the caller as the stream header; the header is needed again
//! to decrypt.
//!
//! # Nonces
//! ```text
//! prefix  = BLAKE2b-128(domain || header || stream_id)
//! nonce_i = prefix (16 bytes) || i (u64 big-endian)
//! ```
//! The prefix is unique per stream because the header carries a random
//! seed, and the counter is unique per chunk, so no nonce repeats under a
//! key even when callers reuse a stream id.
//!
//! # Associated data
//! ```text
//! aad_i = header || i (u64 big-endian) || last (u8) || stream_id
//! ```
//! Binding the index and the terminal flag makes reordering, dropping and
//! truncation detectable: a stream decrypts successfully only if every
//! chunk arrives in order and exactly one terminal chunk closes it.
//!
//! # Session states
//! ```text
//! Idle -> Sealing/Unsealing -> Finalizing -> Closed
//! ```
//! Any failure moves the session straight to `Closed`, which zeroizes the
//! session key. A closed session rejects further work with
//! `Error::SessionClosed`.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use blake2::digest::consts::U16;
use blake2::{Blake2b, Digest};
use rand::RngCore;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, trace, warn};
use zeroize::{Zeroize, Zeroizing};

use crate::aead::{open, seal_with_nonce, NONCE_SIZE};
use crate::keys::{EncryptionKey, KEY_LENGTH};
use crate::streamable::Streamable;
use notecrypt_common::{Error, Result, SensitiveBytes};

/// Default plaintext chunk size (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Largest accepted chunk size (16 MiB).
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Stream format version.
pub const STREAM_VERSION: u8 = 1;

/// Size of the random per-stream seed.
pub const SEED_SIZE: usize = 16;

/// Header size: version (1) + chunk_size (4) + seed (16).
pub const HEADER_SIZE: usize = 1 + 4 + SEED_SIZE;

const NONCE_PREFIX_SIZE: usize = NONCE_SIZE - 8;
const NONCE_DOMAIN: &[u8] = b"notecrypt/stream/v1";

/// One unit of a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Zero-based position in the stream.
    pub index: u64,
    /// Payload: plaintext or `ciphertext || tag`.
    pub data: Vec<u8>,
    /// Whether this is the terminal chunk.
    pub last: bool,
}

impl Chunk {
    /// Create a chunk.
    pub fn new(index: u64, data: Vec<u8>, last: bool) -> Self {
        Self { index, data, last }
    }
}

/// Parameters fixed at stream creation and needed for decryption.
///
/// Encoded as unpadded base64url of `version || chunk_size (u32 BE) || seed`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    version: u8,
    chunk_size: u32,
    seed: [u8; SEED_SIZE],
}

impl StreamHeader {
    /// Create a header with a fresh random seed.
    ///
    /// # Errors
    /// - `Format` if `chunk_size` is zero or above MAX_CHUNK_SIZE
    pub fn generate(chunk_size: usize) -> Result<Self> {
        validate_chunk_size(chunk_size)?;

        let mut seed = [0u8; SEED_SIZE];
        rand::thread_rng().fill_bytes(&mut seed);

        Ok(Self {
            version: STREAM_VERSION,
            chunk_size: chunk_size as u32,
            seed,
        })
    }

    /// Plaintext bytes per non-terminal chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size as usize
    }

    /// Stream format version.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Binary form.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0] = self.version;
        out[1..5].copy_from_slice(&self.chunk_size.to_be_bytes());
        out[5..].copy_from_slice(&self.seed);
        out
    }

    /// Parse the binary form.
    ///
    /// # Errors
    /// - `Format` on wrong length, unknown version or invalid chunk size
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != HEADER_SIZE {
            return Err(Error::Format(format!(
                "Invalid stream header length: expected {}, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }
        if bytes[0] != STREAM_VERSION {
            return Err(Error::Format(format!(
                "Unsupported stream version: {}",
                bytes[0]
            )));
        }

        let mut size = [0u8; 4];
        size.copy_from_slice(&bytes[1..5]);
        let chunk_size = u32::from_be_bytes(size);
        validate_chunk_size(chunk_size as usize)?;

        let mut seed = [0u8; SEED_SIZE];
        seed.copy_from_slice(&bytes[5..]);

        Ok(Self {
            version: bytes[0],
            chunk_size,
            seed,
        })
    }
}

impl fmt::Display for StreamHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&URL_SAFE_NO_PAD.encode(self.to_bytes()))
    }
}

impl fmt::Debug for StreamHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHeader")
            .field("version", &self.version)
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

impl FromStr for StreamHeader {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|e| Error::Format(format!("Invalid stream header encoding: {}", e)))?;
        Self::from_bytes(&bytes)
    }
}

fn validate_chunk_size(chunk_size: usize) -> Result<()> {
    if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
        return Err(Error::Format(format!(
            "Chunk size {} is out of range [1, {}]",
            chunk_size, MAX_CHUNK_SIZE
        )));
    }
    Ok(())
}

/// Lifecycle of a stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No chunk processed yet.
    Idle,
    /// Encrypting non-terminal chunks.
    Sealing,
    /// Decrypting non-terminal chunks.
    Unsealing,
    /// Terminal chunk processed; only `finish` is accepted.
    Finalizing,
    /// Torn down, key erased.
    Closed,
}

/// State shared by both directions.
struct Session {
    key: Zeroizing<[u8; KEY_LENGTH]>,
    header: StreamHeader,
    header_bytes: [u8; HEADER_SIZE],
    stream_id: Vec<u8>,
    nonce_prefix: [u8; NONCE_PREFIX_SIZE],
    next_index: u64,
    state: SessionState,
}

impl Session {
    fn new(key: &EncryptionKey, header: StreamHeader, stream_id: Option<&str>) -> Self {
        let header_bytes = header.to_bytes();
        let stream_id = stream_id.map(|id| id.as_bytes().to_vec()).unwrap_or_default();

        let mut hasher = Blake2b::<U16>::new();
        hasher.update([NONCE_DOMAIN.len() as u8]);
        hasher.update(NONCE_DOMAIN);
        hasher.update(header_bytes);
        hasher.update(&stream_id);
        let mut nonce_prefix = [0u8; NONCE_PREFIX_SIZE];
        nonce_prefix.copy_from_slice(&hasher.finalize());

        Self {
            key: Zeroizing::new(*key.as_bytes()),
            header,
            header_bytes,
            stream_id,
            nonce_prefix,
            next_index: 0,
            state: SessionState::Idle,
        }
    }

    fn nonce(&self, index: u64) -> [u8; NONCE_SIZE] {
        let mut nonce = [0u8; NONCE_SIZE];
        nonce[..NONCE_PREFIX_SIZE].copy_from_slice(&self.nonce_prefix);
        nonce[NONCE_PREFIX_SIZE..].copy_from_slice(&index.to_be_bytes());
        nonce
    }

    fn aad(&self, index: u64, last: bool) -> Vec<u8> {
        let mut aad = Vec::with_capacity(HEADER_SIZE + 9 + self.stream_id.len());
        aad.extend_from_slice(&self.header_bytes);
        aad.extend_from_slice(&index.to_be_bytes());
        aad.push(last as u8);
        aad.extend_from_slice(&self.stream_id);
        aad
    }

    /// Reject work in states that no longer accept chunks.
    fn check_accepting(&mut self) -> Result<()> {
        match self.state {
            SessionState::Closed => Err(Error::SessionClosed),
            SessionState::Finalizing => Err(self.fail(Error::Truncation(
                "chunk after terminal chunk".to_string(),
            ))),
            _ => Ok(()),
        }
    }

    /// Advance past the chunk just processed.
    fn advance(&mut self, last: bool, running: SessionState) -> Result<()> {
        self.state = if last {
            SessionState::Finalizing
        } else {
            running
        };
        self.next_index = match self.next_index.checked_add(1) {
            Some(next) => next,
            None => return Err(self.fail(Error::Crypto("Stream too long".to_string()))),
        };
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        match self.state {
            SessionState::Closed => Err(Error::SessionClosed),
            SessionState::Finalizing => {
                self.close();
                Ok(())
            }
            _ => Err(self.fail(Error::Truncation(format!(
                "stream ended after {} chunks without a terminal chunk",
                self.next_index
            )))),
        }
    }

    fn close(&mut self) {
        self.key.zeroize();
        self.state = SessionState::Closed;
    }

    fn fail(&mut self, err: Error) -> Error {
        if self.state != SessionState::Closed {
            warn!(index = self.next_index, error = %err, "Stream session aborted");
        }
        self.close();
        err
    }
}

/// Encrypting side of a stream session.
///
/// Seals chunks strictly in order; exactly one chunk must be sealed with
/// `last = true`, after which [`EncryptingStream::finish`] closes the session.
pub struct EncryptingStream {
    session: Session,
}

impl EncryptingStream {
    /// Start a session under a freshly generated header.
    ///
    /// # Errors
    /// - `Format` if `chunk_size` is out of range
    pub fn new(key: &EncryptionKey, chunk_size: usize, stream_id: Option<&str>) -> Result<Self> {
        let header = StreamHeader::generate(chunk_size)?;
        Ok(Self {
            session: Session::new(key, header, stream_id),
        })
    }

    /// Header to persist for decryption.
    pub fn header(&self) -> &StreamHeader {
        &self.session.header
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.session.state
    }

    /// Index the next sealed chunk will carry.
    pub fn next_index(&self) -> u64 {
        self.session.next_index
    }

    /// Seal the next chunk.
    ///
    /// # Errors
    /// - `Format` if `data` exceeds the chunk size, or a non-terminal chunk is short
    /// - `Truncation` if the terminal chunk was already sealed
    /// - `SessionClosed` after the session was torn down
    pub fn seal(&mut self, data: &[u8], last: bool) -> Result<Chunk> {
        self.session.check_accepting()?;

        let chunk_size = self.session.header.chunk_size();
        if data.len() > chunk_size || (!last && data.len() != chunk_size) {
            return Err(self.session.fail(Error::Format(format!(
                "Chunk of {} bytes does not fit chunk size {}",
                data.len(),
                chunk_size
            ))));
        }

        let index = self.session.next_index;
        let nonce = self.session.nonce(index);
        let aad = self.session.aad(index, last);
        let sealed = match seal_with_nonce(&self.session.key[..], &nonce, data, &aad) {
            Ok(sealed) => sealed,
            Err(e) => return Err(self.session.fail(e)),
        };

        self.session.advance(last, SessionState::Sealing)?;
        trace!(index, last, "Sealed chunk");
        Ok(Chunk::new(index, sealed, last))
    }

    /// Close the session after the terminal chunk.
    ///
    /// # Errors
    /// - `Truncation` if no terminal chunk was sealed
    pub fn finish(&mut self) -> Result<()> {
        self.session.finish()
    }

    /// Tear the session down, erasing the key.
    pub fn close(&mut self) {
        self.session.close();
    }

    fn abort(&mut self, err: Error) -> Error {
        self.session.fail(err)
    }
}

/// Decrypting side of a stream session.
pub struct DecryptingStream {
    session: Session,
}

impl DecryptingStream {
    /// Start a session for a stream sealed under `header`.
    ///
    /// `stream_id` must equal the one given at encryption.
    pub fn new(key: &EncryptionKey, header: StreamHeader, stream_id: Option<&str>) -> Self {
        Self {
            session: Session::new(key, header, stream_id),
        }
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.session.state
    }

    /// Index the next chunk must carry.
    pub fn next_index(&self) -> u64 {
        self.session.next_index
    }

    /// Verify and decrypt the next chunk.
    ///
    /// # Errors
    /// - `Truncation` if the chunk index is not the expected next index, or
    ///   a chunk follows the terminal chunk
    /// - `Authentication` if the tag does not verify
    /// - `Format` if the plaintext length violates the chunk size
    /// - `SessionClosed` after the session was torn down
    pub fn open(&mut self, chunk: &Chunk) -> Result<Chunk> {
        self.session.check_accepting()?;

        let expected = self.session.next_index;
        if chunk.index != expected {
            return Err(self.session.fail(Error::Truncation(format!(
                "expected chunk {}, got chunk {}",
                expected, chunk.index
            ))));
        }

        let nonce = self.session.nonce(expected);
        let aad = self.session.aad(expected, chunk.last);
        let plaintext = match open(&self.session.key[..], &nonce, &chunk.data, &aad) {
            Ok(plaintext) => plaintext,
            Err(e) => return Err(self.session.fail(e)),
        };

        let chunk_size = self.session.header.chunk_size();
        if plaintext.len() > chunk_size || (!chunk.last && plaintext.len() != chunk_size) {
            return Err(self.session.fail(Error::Format(format!(
                "Chunk {} holds {} bytes, chunk size is {}",
                expected,
                plaintext.len(),
                chunk_size
            ))));
        }

        self.session.advance(chunk.last, SessionState::Unsealing)?;
        trace!(index = expected, last = chunk.last, "Opened chunk");
        Ok(Chunk::new(expected, plaintext, chunk.last))
    }

    /// Close the session at the end of input.
    ///
    /// # Errors
    /// - `Truncation` if the terminal chunk never arrived
    pub fn finish(&mut self) -> Result<()> {
        self.session.finish()
    }

    /// Tear the session down, erasing the key.
    pub fn close(&mut self) {
        self.session.close();
    }

    fn abort(&mut self, err: Error) -> Error {
        self.session.fail(err)
    }
}

/// Encrypt everything `stream` yields, writing sealed chunks back to it.
///
/// Input chunks may be of any size; they are re-cut into `chunk_size`
/// frames. Input ends at the end-marker or at a chunk flagged `last`. The
/// final frame, possibly empty, is sealed as the terminal chunk, then the
/// end-marker is written.
///
/// Returns the header needed for decryption.
///
/// # Errors
/// - `StreamIo` if the stream rejects a read or write
/// - `Truncation` if input chunk indices are not sequential from zero
/// - `Format` if `chunk_size` is out of range
pub async fn encrypt_stream<S>(
    key: &EncryptionKey,
    stream: &mut S,
    stream_id: Option<&str>,
    chunk_size: usize,
) -> Result<StreamHeader>
where
    S: Streamable + ?Sized,
{
    let mut session = EncryptingStream::new(key, chunk_size, stream_id)?;
    let mut buffer = SensitiveBytes::with_capacity(chunk_size);
    let mut expected_input = 0u64;
    let mut total_bytes = 0u64;

    debug!(chunk_size, "Starting stream encryption");

    loop {
        let next = stream
            .read()
            .await
            .map_err(|e| session.abort(e.into()))?;
        let Some(input) = next else { break };
        let Chunk { index, data, last } = input;
        let data = Zeroizing::new(data);

        if index != expected_input {
            return Err(session.abort(Error::Truncation(format!(
                "expected input chunk {}, got chunk {}",
                expected_input, index
            ))));
        }
        expected_input += 1;
        total_bytes += data.len() as u64;

        // Hold one frame back: it may turn out to be the terminal one.
        let mut rest = &data[..];
        while !rest.is_empty() {
            if buffer.len() == chunk_size {
                let sealed = session.seal(buffer.as_bytes(), false)?;
                buffer.clear();
                stream
                    .write(Some(sealed))
                    .await
                    .map_err(|e| session.abort(e.into()))?;
            }
            let take = rest.len().min(chunk_size - buffer.len());
            buffer.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
        }

        if last {
            break;
        }
    }

    let sealed = session.seal(buffer.as_bytes(), true)?;
    buffer.clear();
    stream
        .write(Some(sealed))
        .await
        .map_err(|e| session.abort(e.into()))?;

    let header = *session.header();
    let chunks = session.next_index();
    session.finish()?;
    stream.write(None).await?;

    debug!(chunks, total_bytes, "Stream encryption complete");
    Ok(header)
}

/// Decrypt the sealed chunks `stream` yields, writing plaintext chunks back.
///
/// Each plaintext chunk is written as soon as it verifies. The end-marker is
/// written only once the terminal chunk has been verified and the input
/// ended right after it; on any failure the session is torn down and no
/// end-marker is written.
///
/// # Errors
/// - `Truncation` if the input ends before the terminal chunk, or chunks
///   arrive out of order or after the terminal chunk
/// - `Authentication` if any chunk fails verification
/// - `StreamIo` if the stream rejects a read or write
pub async fn decrypt_stream<S>(
    key: &EncryptionKey,
    header: StreamHeader,
    stream: &mut S,
    stream_id: Option<&str>,
) -> Result<()>
where
    S: Streamable + ?Sized,
{
    let mut session = DecryptingStream::new(key, header, stream_id);
    let mut total_bytes = 0u64;

    debug!(chunk_size = header.chunk_size(), "Starting stream decryption");

    loop {
        let next = stream
            .read()
            .await
            .map_err(|e| session.abort(e.into()))?;
        let Some(sealed) = next else { break };

        let plain = session.open(&sealed)?;
        total_bytes += plain.data.len() as u64;
        stream
            .write(Some(plain))
            .await
            .map_err(|e| session.abort(e.into()))?;
    }

    let chunks = session.next_index();
    session.finish()?;
    stream.write(None).await?;

    debug!(chunks, total_bytes, "Stream decryption complete");
    Ok(())
}
