//! Fixed-size chunk readers backed by pooled buffers.
//!
//! [`ChunkReader`] and [`AsyncChunkReader`] read a stream in chunks of one
//! configured size. Every chunk is read into a buffer checked out from a
//! [`BufferPool`], and the buffer goes back to the pool when the [`Chunk`] is
//! dropped, so a reader that drops each chunk before asking for the next one
//! allocates a single buffer for the whole stream.

use std::io::{Error, ErrorKind, Read, Result};
use std::ops::Deref;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

use crate::guard::PooledBuffer;
use crate::pool::BufferPool;

/// One chunk of a stream.
///
/// Derefs to the bytes actually read. Only the last chunk of a stream can be
/// shorter than the chunk size; the tail of its buffer past
/// [`filled`](Self::filled) holds stale bytes from earlier users.
#[derive(Debug)]
pub struct Chunk {
    buffer: PooledBuffer,
    filled: usize,
}

impl Chunk {
    /// Returns the number of bytes read into this chunk.
    #[inline]
    #[must_use]
    pub const fn filled(&self) -> usize {
        self.filled
    }

    /// Returns `true` if the chunk filled its whole buffer.
    #[inline]
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.filled == self.buffer.size()
    }

    /// Returns the underlying pooled buffer, including the unfilled tail.
    #[must_use]
    pub fn into_buffer(self) -> PooledBuffer {
        self.buffer
    }
}

impl Deref for Chunk {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.buffer[..self.filled]
    }
}

impl AsRef<[u8]> for Chunk {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self
    }
}

fn check_chunk_size(chunk_size: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(Error::new(ErrorKind::InvalidInput, "chunk size must be > 0"));
    }
    Ok(())
}

/// Reads into `buf` until it is full or the reader reaches EOF.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

async fn fill_async<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Iterator over fixed-size chunks of a blocking reader.
///
/// # Example
///
/// ```rust
/// use std::io::Cursor;
/// use shared_bufpool::{BufferPool, ChunkReader};
///
/// # fn main() -> std::io::Result<()> {
/// let pool = BufferPool::new();
/// let reader = ChunkReader::new(&pool, Cursor::new(b"abcdefghij".to_vec()), 4)?;
///
/// let chunks = reader
///     .map(|chunk| chunk.map(|c| c.to_vec()))
///     .collect::<std::io::Result<Vec<_>>>()?;
/// assert_eq!(chunks, [b"abcd".to_vec(), b"efgh".to_vec(), b"ij".to_vec()]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ChunkReader<R> {
    pool: BufferPool,
    reader: R,
    chunk_size: usize,
    done: bool,
}

impl<R: Read> ChunkReader<R> {
    /// Creates a reader producing chunks of `chunk_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `chunk_size` is 0.
    pub fn new(pool: &BufferPool, reader: R, chunk_size: usize) -> Result<Self> {
        check_chunk_size(chunk_size)?;
        Ok(Self {
            pool: pool.clone(),
            reader,
            chunk_size,
            done: false,
        })
    }

    /// Returns the configured chunk size.
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Returns the wrapped reader.
    pub fn into_inner(self) -> R {
        self.reader
    }

    fn read_chunk(&mut self) -> Result<Option<Chunk>> {
        let mut buffer = self.pool.checkout_scoped(self.chunk_size)?;
        let filled = fill(&mut self.reader, &mut buffer)?;
        trace!(chunk_size = self.chunk_size, filled, "read chunk");

        if filled < self.chunk_size {
            self.done = true;
        }
        Ok((filled > 0).then_some(Chunk { buffer, filled }))
    }
}

impl<R: Read> Iterator for ChunkReader<R> {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_chunk() {
            Ok(chunk) => chunk.map(Ok),
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<R: Read> std::iter::FusedIterator for ChunkReader<R> {}

/// Reads fixed-size chunks of a tokio [`AsyncRead`].
///
/// # Example
///
/// ```rust
/// use shared_bufpool::{AsyncChunkReader, BufferPool};
///
/// # async fn example() -> std::io::Result<()> {
/// let pool = BufferPool::new();
/// let mut reader = AsyncChunkReader::new(&pool, &b"abcdef"[..], 4)?;
///
/// while let Some(chunk) = reader.next_chunk().await? {
///     assert!(chunk.len() <= 4);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct AsyncChunkReader<R> {
    pool: BufferPool,
    reader: R,
    chunk_size: usize,
    done: bool,
}

impl<R: AsyncRead + Unpin> AsyncChunkReader<R> {
    /// Creates a reader producing chunks of `chunk_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `chunk_size` is 0.
    pub fn new(pool: &BufferPool, reader: R, chunk_size: usize) -> Result<Self> {
        check_chunk_size(chunk_size)?;
        Ok(Self {
            pool: pool.clone(),
            reader,
            chunk_size,
            done: false,
        })
    }

    /// Returns the configured chunk size.
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Returns the wrapped reader.
    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Reads the next chunk, or `None` once the stream is exhausted.
    ///
    /// # Errors
    ///
    /// Returns the reader's error, or the pool's if checkout fails. After an
    /// error every further call returns `Ok(None)`.
    pub async fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        if self.done {
            return Ok(None);
        }

        // The buffer is checked out before the read starts; if this future is
        // dropped mid-read, the guard returns it to the pool.
        let result = async {
            let mut buffer = self.pool.checkout_scoped(self.chunk_size)?;
            let filled = fill_async(&mut self.reader, &mut buffer).await?;
            Ok::<_, Error>((buffer, filled))
        }
        .await;

        match result {
            Ok((buffer, filled)) => {
                trace!(chunk_size = self.chunk_size, filled, "read chunk");
                if filled < self.chunk_size {
                    self.done = true;
                }
                Ok((filled > 0).then_some(Chunk { buffer, filled }))
            }
            Err(e) => {
                self.done = true;
                Err(e)
            }
        }
    }
}
