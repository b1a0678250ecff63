//! Owned, exact-length buffer handle.
//!
//! A [`Buffer`] is what [`BufferPool::checkout`](crate::BufferPool::checkout)
//! hands out. It is a movable, single-owner handle: passing it back to
//! [`BufferPool::release`](crate::BufferPool::release) moves it into the pool,
//! and dropping it anywhere else frees its storage through the allocator that
//! created it.

use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::Arc;

use crate::allocator::Allocator;

/// A contiguous block of memory whose length is exactly its size class.
///
/// Contents are not zeroed between reuses. A fresh buffer holds whatever the
/// allocator returned, and a reused one holds whatever its previous owner
/// wrote.
///
/// # Example
///
/// ```rust
/// use shared_bufpool::BufferPool;
///
/// # fn main() -> std::io::Result<()> {
/// let pool = BufferPool::new();
/// let mut buffer = pool.checkout(1024)?;
///
/// // Write to the buffer
/// buffer[0] = 42;
/// buffer[1] = 43;
///
/// // Read from the buffer
/// assert_eq!(buffer[0], 42);
/// assert_eq!(buffer.len(), 1024);
///
/// pool.release(1024, buffer);
/// # Ok(())
/// # }
/// ```
pub struct Buffer {
    /// Pointer to the allocated memory.
    ptr: NonNull<u8>,

    /// Size of the allocated memory.
    len: usize,

    /// Allocator that owns the storage.
    allocator: Arc<dyn Allocator>,
}

// SAFETY: Buffer uniquely owns its memory region; moving it to another
// thread moves that ownership with it.
unsafe impl Send for Buffer {}

// SAFETY: shared references only hand out `&[u8]`; mutation needs `&mut Buffer`.
unsafe impl Sync for Buffer {}

impl Buffer {
    /// Creates a new buffer.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    /// - `ptr` was returned by `allocator.allocate(len)`
    /// - The memory is not owned by anything else
    pub(crate) const unsafe fn new(
        ptr: NonNull<u8>,
        len: usize,
        allocator: Arc<dyn Allocator>,
    ) -> Self {
        Self {
            ptr,
            len,
            allocator,
        }
    }

    /// Returns the length of the buffer in bytes.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the buffer is empty.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns a raw pointer to the buffer's memory.
    #[inline]
    #[must_use]
    pub const fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Returns a mutable raw pointer to the buffer's memory.
    #[inline]
    #[must_use]
    pub const fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Returns the buffer as a byte slice.
    #[inline]
    #[must_use]
    pub const fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for len bytes
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Returns the buffer as a mutable byte slice.
    #[inline]
    #[must_use]
    pub const fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: ptr is valid for len bytes and we have exclusive access
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Returns a bounded pointer + length view for handing the storage to
    /// code that expects a raw memory region.
    ///
    /// The view borrows the buffer mutably, so it cannot outlive the caller's
    /// ownership and the buffer cannot be released while the view exists.
    #[inline]
    #[must_use]
    pub const fn raw_view(&mut self) -> RawView<'_> {
        RawView {
            ptr: self.ptr,
            len: self.len,
            _buffer: PhantomData,
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        // SAFETY: ptr came from this allocator with exactly len bytes, and
        // a Buffer is dropped at most once.
        unsafe {
            self.allocator.deallocate(self.ptr.as_ptr(), self.len);
        }
    }
}

impl Deref for Buffer {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl DerefMut for Buffer {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.as_mut_slice()
    }
}

impl AsRef<[u8]> for Buffer {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsMut<[u8]> for Buffer {
    #[inline]
    fn as_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

/// Start address and exact length of a [`Buffer`]'s storage.
///
/// Writes through [`as_mut_ptr`](Self::as_mut_ptr) must stay within
/// [`len`](Self::len) bytes.
#[derive(Debug)]
pub struct RawView<'a> {
    ptr: NonNull<u8>,
    len: usize,
    _buffer: PhantomData<&'a mut [u8]>,
}

impl RawView<'_> {
    /// Returns the start address.
    #[inline]
    #[must_use]
    pub const fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Returns the start address for writing.
    #[inline]
    #[must_use]
    pub const fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Returns the number of addressable bytes.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the view covers no bytes.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the `(pointer, length)` pair.
    #[inline]
    #[must_use]
    pub const fn parts(&mut self) -> (*mut u8, usize) {
        (self.ptr.as_ptr(), self.len)
    }
}
