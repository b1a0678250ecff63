//! Memory allocator trait and default implementation.
//!
//! This module provides the [`Allocator`] trait that backs every buffer the pool
//! hands out, and [`DefaultAllocator`] which uses the standard library's global
//! allocator with a configurable alignment.

use std::alloc::{Layout, alloc, dealloc};
use std::io::{Error, ErrorKind, Result};

/// Default alignment for buffers created by [`DefaultAllocator`] (one cache line).
pub const DEFAULT_ALIGNMENT: usize = 64;

/// Trait for buffer storage backends.
///
/// The pool calls [`allocate`](Allocator::allocate) only when a checkout finds
/// the free list for its size empty. Storage is handed back through
/// [`deallocate`](Allocator::deallocate) when a [`Buffer`](crate::Buffer) is
/// dropped outside the pool, or when the pool itself is dropped.
///
/// # Safety
///
/// Implementations must ensure:
/// - `allocate` returns a valid pointer to at least `size` writable bytes
/// - `deallocate` is only called with pointers previously returned by `allocate`
/// - The allocated memory remains valid until `deallocate` is called
///
/// # Example
///
/// ```rust
/// use shared_bufpool::Allocator;
/// use std::io::Result;
///
/// struct MyAllocator;
///
/// impl Allocator for MyAllocator {
///     fn allocate(&self, size: usize) -> Result<*mut u8> {
///         // Custom allocation logic
///         # unimplemented!()
///     }
///
///     unsafe fn deallocate(&self, ptr: *mut u8, size: usize) {
///         // Custom deallocation logic
///         # unimplemented!()
///     }
/// }
/// ```
pub trait Allocator: Send + Sync {
    /// Allocates `size` bytes. The contents are unspecified.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a zero size and `OutOfMemory` for any
    /// non-zero size that cannot be provided.
    fn allocate(&self, size: usize) -> Result<*mut u8>;

    /// Deallocates memory previously allocated by this allocator.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    /// - `ptr` was returned by a previous call to `allocate` on this allocator
    /// - `size` matches the size passed to the original `allocate` call
    /// - The memory has not already been deallocated
    unsafe fn deallocate(&self, ptr: *mut u8, size: usize);
}

/// Default allocator using the standard library's global allocator.
///
/// Every allocation is aligned to [`alignment`](Self::alignment) bytes, which
/// makes pooled buffers usable with APIs that care about alignment (SIMD
/// loads, `O_DIRECT` reads with a page-sized alignment).
#[derive(Debug, Clone, Copy)]
pub struct DefaultAllocator {
    alignment: usize,
}

impl Default for DefaultAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultAllocator {
    /// Creates a new default allocator with [`DEFAULT_ALIGNMENT`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            alignment: DEFAULT_ALIGNMENT,
        }
    }

    /// Creates an allocator with a custom alignment.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `alignment` is not a power of two.
    pub fn with_alignment(alignment: usize) -> Result<Self> {
        if !alignment.is_power_of_two() {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!("alignment must be a power of two, got {alignment}"),
            ));
        }
        Ok(Self { alignment })
    }

    /// Returns the alignment applied to every allocation.
    #[must_use]
    pub const fn alignment(&self) -> usize {
        self.alignment
    }
}

impl Allocator for DefaultAllocator {
    fn allocate(&self, size: usize) -> Result<*mut u8> {
        if size == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "size must be > 0"));
        }

        // Alignment is validated on construction, so a layout error here
        // means the size cannot be satisfied.
        let layout = Layout::from_size_align(size, self.alignment).map_err(|_| {
            Error::new(
                ErrorKind::OutOfMemory,
                format!("cannot allocate {size} bytes"),
            )
        })?;

        // SAFETY: layout is valid (non-zero size, power-of-two alignment)
        let ptr = unsafe { alloc(layout) };

        if ptr.is_null() {
            Err(Error::new(
                ErrorKind::OutOfMemory,
                format!("failed to allocate {size} bytes"),
            ))
        } else {
            Ok(ptr)
        }
    }

    unsafe fn deallocate(&self, ptr: *mut u8, size: usize) {
        if size == 0 || ptr.is_null() {
            return;
        }

        if let Ok(layout) = Layout::from_size_align(size, self.alignment) {
            // SAFETY: ptr was allocated with this layout by allocate()
            unsafe { dealloc(ptr, layout) };
        }
    }
}
