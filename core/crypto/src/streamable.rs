//! Pull/push abstraction the stream engine reads from and writes to.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;

use crate::stream::Chunk;

/// Source and sink of chunks for one stream operation.
///
/// `read` yields the next chunk or `None` at the end of input. `write`
/// accepts a chunk, or `None` once the operation has completed
/// successfully. An operation that fails never writes the `None` end-marker,
/// so its absence tells the sink the output is incomplete.
///
/// Implementations own timeouts and retries; errors are propagated to the
/// caller of the stream operation unchanged.
#[async_trait]
pub trait Streamable: Send {
    /// Pull the next chunk, or `None` at the end of input.
    async fn read(&mut self) -> io::Result<Option<Chunk>>;

    /// Push a chunk, or `None` to mark successful completion.
    async fn write(&mut self, chunk: Option<Chunk>) -> io::Result<()>;
}

/// In-memory stream: a queue of input chunks and a collected output.
#[derive(Debug, Default)]
pub struct MemoryStream {
    input: VecDeque<Chunk>,
    output: Vec<Chunk>,
    finished: bool,
}

impl MemoryStream {
    /// Create a stream that yields `chunks` in order.
    pub fn new(chunks: Vec<Chunk>) -> Self {
        Self {
            input: chunks.into(),
            output: Vec::new(),
            finished: false,
        }
    }

    /// Split `data` into chunks of at most `chunk_size` bytes.
    ///
    /// Empty data yields no chunks at all.
    pub fn from_bytes(data: &[u8], chunk_size: usize) -> Self {
        let pieces: Vec<&[u8]> = data.chunks(chunk_size.max(1)).collect();
        let count = pieces.len();
        let chunks = pieces
            .into_iter()
            .enumerate()
            .map(|(i, piece)| Chunk::new(i as u64, piece.to_vec(), i + 1 == count))
            .collect();
        Self::new(chunks)
    }

    /// Chunks written so far.
    pub fn output(&self) -> &[Chunk] {
        &self.output
    }

    /// Consume the stream, returning the written chunks.
    pub fn into_output(self) -> Vec<Chunk> {
        self.output
    }

    /// Concatenated payload of the written chunks.
    pub fn output_bytes(&self) -> Vec<u8> {
        self.output.iter().flat_map(|c| c.data.iter().copied()).collect()
    }

    /// Whether the end-marker has been written.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

#[async_trait]
impl Streamable for MemoryStream {
    async fn read(&mut self) -> io::Result<Option<Chunk>> {
        Ok(self.input.pop_front())
    }

    async fn write(&mut self, chunk: Option<Chunk>) -> io::Result<()> {
        if self.finished {
            return Err(io::Error::other("write after end of stream"));
        }
        match chunk {
            Some(chunk) => self.output.push(chunk),
            None => self.finished = true,
        }
        Ok(())
    }
}
