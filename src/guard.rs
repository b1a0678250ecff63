//! Scoped checkout that releases its buffer on drop.

use std::ops::{Deref, DerefMut};

use crate::buffer::Buffer;
use crate::pool::BufferPool;

/// A checked-out [`Buffer`] that goes back to its pool when dropped.
///
/// The guard remembers the size it was checked out with, so the buffer is
/// always filed under the right class and can only be released once.
///
/// # Example
///
/// ```rust
/// use shared_bufpool::BufferPool;
///
/// # fn main() -> std::io::Result<()> {
/// let pool = BufferPool::new();
/// {
///     let mut buffer = pool.checkout_scoped(4096)?;
///     buffer[..5].copy_from_slice(b"hello");
/// }
/// assert_eq!(pool.free_count(4096), 1);
/// # Ok(())
/// # }
/// ```
pub struct PooledBuffer {
    pool: BufferPool,
    size: usize,
    buffer: Option<Buffer>,
}

impl PooledBuffer {
    pub(crate) const fn new(pool: BufferPool, size: usize, buffer: Buffer) -> Self {
        Self {
            pool,
            size,
            buffer: Some(buffer),
        }
    }

    /// Returns the size class this buffer will be released under.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Detaches the buffer from the guard. It will not be returned to the
    /// pool unless passed to [`BufferPool::release`] explicitly.
    #[must_use]
    pub fn into_inner(mut self) -> Buffer {
        // Only Drop takes the buffer out, so it is always present here.
        match self.buffer.take() {
            Some(buffer) => buffer,
            None => unreachable!("pooled buffer already taken"),
        }
    }

    fn buffer(&self) -> &Buffer {
        match &self.buffer {
            Some(buffer) => buffer,
            None => unreachable!("pooled buffer already taken"),
        }
    }

    fn buffer_mut(&mut self) -> &mut Buffer {
        match &mut self.buffer {
            Some(buffer) => buffer,
            None => unreachable!("pooled buffer already taken"),
        }
    }
}

impl Deref for PooledBuffer {
    type Target = Buffer;

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.buffer()
    }
}

impl DerefMut for PooledBuffer {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.buffer_mut()
    }
}

impl AsRef<[u8]> for PooledBuffer {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self.buffer().as_slice()
    }
}

impl AsMut<[u8]> for PooledBuffer {
    #[inline]
    fn as_mut(&mut self) -> &mut [u8] {
        self.buffer_mut().as_mut_slice()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.release(self.size, buffer);
        }
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("pool", &self.pool.name())
            .field("size", &self.size)
            .field("buffer", &self.buffer)
            .finish()
    }
}
