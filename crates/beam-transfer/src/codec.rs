//! Chunk codec: split a payload into bounded frames and put them back
//! together.
//!
//! ```text
//! [ source .............................. ]
//!   split(C)  -> [C][C][C][<=C]          lazy, in order, no overlap
//!   reassemble -> [ source ]             length must equal totalSize
//! ```

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Reassembled length disagrees with the declared total size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("reassembled {actual} bytes but metadata declared {expected}")]
pub struct SizeMismatch {
    pub expected: u64,
    pub actual: u64,
}

/// Split an in-memory buffer into chunks of at most `max_chunk_size` bytes.
///
/// Chunks are zero-copy views into `source`. A `max_chunk_size` of 0 is
/// treated as 1.
pub fn split(source: &Bytes, max_chunk_size: usize) -> Split {
    Split {
        source: source.clone(),
        chunk_size: max_chunk_size.max(1),
        offset: 0,
    }
}

/// Iterator returned by [`split`].
#[derive(Debug, Clone)]
pub struct Split {
    source: Bytes,
    chunk_size: usize,
    offset: usize,
}

impl Iterator for Split {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        if self.offset >= self.source.len() {
            return None;
        }
        let end = (self.offset + self.chunk_size).min(self.source.len());
        let chunk = self.source.slice(self.offset..end);
        self.offset = end;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.source.len() - self.offset;
        let n = left.div_ceil(self.chunk_size);
        (n, Some(n))
    }
}

impl ExactSizeIterator for Split {}

/// Concatenate chunks in arrival order and check the result against the
/// declared size.
pub fn reassemble<I>(chunks: I, total_size: u64) -> Result<Bytes, SizeMismatch>
where
    I: IntoIterator<Item = Bytes>,
{
    let mut reassembler = Reassembler::new(total_size);
    for chunk in chunks {
        reassembler.push(chunk);
    }
    reassembler.finish()
}

/// Incremental receive side of the codec: buffers chunks and keeps the
/// received-byte count.
#[derive(Debug, Default)]
pub struct Reassembler {
    expected: u64,
    received: u64,
    chunks: Vec<Bytes>,
}

impl Reassembler {
    pub fn new(expected: u64) -> Self {
        Self {
            expected,
            received: 0,
            chunks: Vec::new(),
        }
    }

    /// Buffer one chunk. Returns the running byte count.
    pub fn push(&mut self, chunk: Bytes) -> u64 {
        self.received += chunk.len() as u64;
        if !chunk.is_empty() {
            self.chunks.push(chunk);
        }
        self.received
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn expected(&self) -> u64 {
        self.expected
    }

    /// True once at least the declared number of bytes has arrived.
    pub fn is_done(&self) -> bool {
        self.received >= self.expected
    }

    /// Join the buffered chunks into one contiguous buffer.
    pub fn finish(self) -> Result<Bytes, SizeMismatch> {
        if self.received != self.expected {
            return Err(SizeMismatch {
                expected: self.expected,
                actual: self.received,
            });
        }
        if self.chunks.len() == 1 {
            return Ok(self.chunks.into_iter().next().unwrap_or_default());
        }

        let mut out = BytesMut::with_capacity(self.received as usize);
        for chunk in &self.chunks {
            out.extend_from_slice(chunk);
        }
        Ok(out.freeze())
    }
}

/// Lazy chunk source over an async reader.
///
/// Reads exactly one chunk per call, so at most one frame is held in
/// memory between reads. Stops after `limit` bytes even if the reader has
/// more.
pub struct ChunkReader<R> {
    reader: R,
    chunk_size: usize,
    remaining: u64,
}

impl<R: AsyncRead + Unpin> ChunkReader<R> {
    pub fn new(reader: R, chunk_size: usize, limit: u64) -> Self {
        Self {
            reader,
            chunk_size: chunk_size.max(1),
            remaining: limit,
        }
    }

    /// Next chunk, or `None` at the limit or end of input. Only the last
    /// chunk may be shorter than the chunk size.
    pub async fn next_chunk(&mut self) -> std::io::Result<Option<Bytes>> {
        if self.remaining == 0 {
            return Ok(None);
        }

        let want = self.remaining.min(self.chunk_size as u64) as usize;
        let mut buf = BytesMut::zeroed(want);
        let mut filled = 0;
        while filled < want {
            let n = self.reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            self.remaining = 0;
            return Ok(None);
        }
        if filled < want {
            // Source ended early; nothing more will come.
            self.remaining = 0;
        } else {
            self.remaining -= filled as u64;
        }

        buf.truncate(filled);
        Ok(Some(buf.freeze()))
    }
}
