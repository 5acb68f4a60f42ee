//! File-backed chunk streams.
//!
//! Sealed chunks are stored one after another as
//! `index (u64 BE) || last (u8) || len (u32 BE) || data`.

use async_trait::async_trait;
use std::io;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

use notecrypt_crypto::aead::TAG_SIZE;
use notecrypt_crypto::stream::MAX_CHUNK_SIZE;
use notecrypt_crypto::{Chunk, Crypto, SerializedKey, Streamable};

/// Largest frame payload accepted when reading.
const MAX_FRAME_LEN: usize = MAX_CHUNK_SIZE + TAG_SIZE;

/// How one side of a [`FrameStream`] lays out its bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    /// Plain bytes, no framing.
    Raw,
    /// Length-prefixed chunk frames.
    Framed,
}

/// A [`Streamable`] reading from one byte source and writing to another.
pub struct FrameStream<R, W> {
    reader: R,
    writer: W,
    input: Layout,
    output: Layout,
    read_size: usize,
    next_index: u64,
    finished: bool,
}

impl<R, W> FrameStream<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Raw bytes in (read `read_size` at a time), frames out.
    pub fn sealing(reader: R, writer: W, read_size: usize) -> Self {
        Self::with_layout(reader, writer, Layout::Raw, Layout::Framed, read_size)
    }

    /// Frames in, raw bytes out.
    pub fn opening(reader: R, writer: W) -> Self {
        Self::with_layout(reader, writer, Layout::Framed, Layout::Raw, 0)
    }

    fn with_layout(reader: R, writer: W, input: Layout, output: Layout, read_size: usize) -> Self {
        Self {
            reader,
            writer,
            input,
            output,
            read_size: read_size.max(1),
            next_index: 0,
            finished: false,
        }
    }

    /// Whether the end-marker has been written.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Consume the stream, returning the writer.
    pub fn into_writer(self) -> W {
        self.writer
    }

    async fn read_raw(&mut self) -> io::Result<Option<Chunk>> {
        let mut data = vec![0u8; self.read_size];
        let mut filled = 0;
        while filled < data.len() {
            let n = self.reader.read(&mut data[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            return Ok(None);
        }
        data.truncate(filled);

        let chunk = Chunk::new(self.next_index, data, false);
        self.next_index += 1;
        Ok(Some(chunk))
    }

    async fn read_frame(&mut self) -> io::Result<Option<Chunk>> {
        let mut index = [0u8; 8];
        if self.reader.read(&mut index[..1]).await? == 0 {
            return Ok(None);
        }
        self.reader.read_exact(&mut index[1..]).await?;

        let last = match self.reader.read_u8().await? {
            0 => false,
            1 => true,
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("invalid last flag {}", other),
                ))
            }
        };

        let len = self.reader.read_u32().await? as usize;
        if len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {} bytes exceeds limit", len),
            ));
        }

        let mut data = vec![0u8; len];
        self.reader.read_exact(&mut data).await?;
        Ok(Some(Chunk::new(u64::from_be_bytes(index), data, last)))
    }

    async fn write_frame(&mut self, chunk: &Chunk) -> io::Result<()> {
        let len = u32::try_from(chunk.data.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "chunk too large"))?;
        self.writer.write_u64(chunk.index).await?;
        self.writer.write_u8(chunk.last as u8).await?;
        self.writer.write_u32(len).await?;
        self.writer.write_all(&chunk.data).await
    }
}

#[async_trait]
impl<R, W> Streamable for FrameStream<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn read(&mut self) -> io::Result<Option<Chunk>> {
        match self.input {
            Layout::Raw => self.read_raw().await,
            Layout::Framed => self.read_frame().await,
        }
    }

    async fn write(&mut self, chunk: Option<Chunk>) -> io::Result<()> {
        if self.finished {
            return Err(io::Error::other("write after end of stream"));
        }
        match chunk {
            Some(chunk) => match self.output {
                Layout::Raw => self.writer.write_all(&chunk.data).await,
                Layout::Framed => self.write_frame(&chunk).await,
            },
            None => {
                self.finished = true;
                self.writer.flush().await
            }
        }
    }
}

/// Encrypt `input` into a frame file at `output`, returning the stream iv.
pub async fn seal_file(
    crypto: &Crypto,
    key: &SerializedKey,
    input: &Path,
    output: &Path,
    stream_id: Option<&str>,
) -> anyhow::Result<String> {
    let reader = BufReader::new(File::open(input).await?);
    let writer = BufWriter::new(File::create(output).await?);
    let mut stream = FrameStream::sealing(reader, writer, crypto.config().chunk_size);

    let result = crypto.encrypt_stream(key, &mut stream, stream_id).await;
    finish_output(result, output).await
}

/// Decrypt the frame file at `input` into `output`.
///
/// `output` is removed again if decryption fails, so a partial plaintext is
/// never left behind.
pub async fn open_file(
    crypto: &Crypto,
    key: &SerializedKey,
    iv: &str,
    input: &Path,
    output: &Path,
    stream_id: Option<&str>,
) -> anyhow::Result<()> {
    let reader = BufReader::new(File::open(input).await?);
    let writer = BufWriter::new(File::create(output).await?);
    let mut stream = FrameStream::opening(reader, writer);

    let result = crypto.decrypt_stream(key, iv, &mut stream, stream_id).await;
    finish_output(result, output).await
}

async fn finish_output<T>(result: notecrypt_crypto::Result<T>, output: &Path) -> anyhow::Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(e) => {
            // Best effort; the stream error is what matters.
            let _ = tokio::fs::remove_file(output).await;
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notecrypt_crypto::{CryptoConfig, Error, KdfParams};
    use tempfile::TempDir;

    fn engine() -> Crypto {
        let fast = KdfParams::custom(1024, 1, 1);
        Crypto::new(
            CryptoConfig::default()
                .with_kdf(fast)
                .with_hash(fast)
                .with_chunk_size(64),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_frame_layout() {
        let mut stream = FrameStream::sealing(&b""[..], Vec::new(), 16);
        stream
            .write(Some(Chunk::new(3, vec![0xAA, 0xBB], true)))
            .await
            .unwrap();
        stream.write(None).await.unwrap();

        let bytes = stream.into_writer();
        assert_eq!(
            bytes,
            vec![0, 0, 0, 0, 0, 0, 0, 3, 1, 0, 0, 0, 2, 0xAA, 0xBB]
        );

        let mut reader = FrameStream::opening(&bytes[..], Vec::new());
        let chunk = reader.read().await.unwrap().unwrap();
        assert_eq!(chunk, Chunk::new(3, vec![0xAA, 0xBB], true));
        assert!(reader.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_raw_reads_are_indexed() {
        let data = [7u8; 40];
        let mut stream = FrameStream::sealing(&data[..], Vec::new(), 16);

        let mut sizes = Vec::new();
        while let Some(chunk) = stream.read().await.unwrap() {
            assert_eq!(chunk.index, sizes.len() as u64);
            sizes.push(chunk.data.len());
        }
        assert_eq!(sizes, vec![16, 16, 8]);
    }

    #[tokio::test]
    async fn test_bad_frames_rejected() {
        let bad_flag = [0u8, 0, 0, 0, 0, 0, 0, 0, 9, 0, 0, 0, 0];
        let mut stream = FrameStream::opening(&bad_flag[..], Vec::new());
        assert!(stream.read().await.is_err());

        let short = [0u8, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 5, 1, 2];
        let mut stream = FrameStream::opening(&short[..], Vec::new());
        assert!(stream.read().await.is_err());
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let plain = dir.path().join("note.txt");
        let sealed = dir.path().join("note.enc");
        let restored = dir.path().join("note.out");

        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        tokio::fs::write(&plain, &data).await.unwrap();

        let crypto = engine();
        let key = crypto.export_key("pw", Some("salt")).await.unwrap();

        let iv = seal_file(&crypto, &key, &plain, &sealed, Some("note"))
            .await
            .unwrap();
        open_file(&crypto, &key, &iv, &sealed, &restored, Some("note"))
            .await
            .unwrap();

        assert_eq!(tokio::fs::read(&restored).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_empty_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let plain = dir.path().join("empty");
        let sealed = dir.path().join("empty.enc");
        let restored = dir.path().join("empty.out");
        tokio::fs::write(&plain, b"").await.unwrap();

        let crypto = engine();
        let key = crypto.export_key("pw", Some("salt")).await.unwrap();

        let iv = seal_file(&crypto, &key, &plain, &sealed, None).await.unwrap();
        assert!(!tokio::fs::read(&sealed).await.unwrap().is_empty());

        open_file(&crypto, &key, &iv, &sealed, &restored, None)
            .await
            .unwrap();
        assert!(tokio::fs::read(&restored).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_truncated_file_removes_output() {
        let dir = TempDir::new().unwrap();
        let plain = dir.path().join("note.txt");
        let sealed = dir.path().join("note.enc");
        let restored = dir.path().join("note.out");
        tokio::fs::write(&plain, vec![1u8; 500]).await.unwrap();

        let crypto = engine();
        let key = crypto.export_key("pw", Some("salt")).await.unwrap();
        let iv = seal_file(&crypto, &key, &plain, &sealed, None).await.unwrap();

        // Drop the terminal frame: 13 byte prefix, 52 byte remainder and the tag
        let mut bytes = tokio::fs::read(&sealed).await.unwrap();
        let terminal = 13 + (500 % 64) + TAG_SIZE;
        bytes.truncate(bytes.len() - terminal);
        tokio::fs::write(&sealed, &bytes).await.unwrap();

        let err = open_file(&crypto, &key, &iv, &sealed, &restored, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::Truncation(_))
        ));
        assert!(!restored.exists());
    }
}
