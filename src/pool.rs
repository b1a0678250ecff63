//! Buffer pool keyed by exact buffer size.
//!
//! This module provides the [`BufferPool`] and [`BufferPoolBuilder`] types. The
//! pool keeps one FIFO free list per size class behind a single lock; checkout
//! pops the oldest idle buffer of the requested size or allocates a fresh one,
//! and release pushes a buffer onto the back of its size's list.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::io::{Error, ErrorKind, Result};
use std::ptr::NonNull;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::allocator::{Allocator, DefaultAllocator};
use crate::buffer::Buffer;
use crate::guard::PooledBuffer;

/// Name given to pools built without an explicit one.
const DEFAULT_POOL_NAME: &str = "bufpool";

/// Process-wide pool behind [`global`].
static GLOBAL_POOL: OnceLock<BufferPool> = OnceLock::new();

/// Returns the process-wide buffer pool, creating it on first use.
///
/// Code that can be handed a [`BufferPool`] explicitly should prefer that;
/// this accessor exists for call sites with no natural owner to thread a
/// handle through.
pub fn global() -> &'static BufferPool {
    GLOBAL_POOL.get_or_init(|| BufferPoolBuilder::new().name("global").build())
}

/// Builder for creating a [`BufferPool`] with custom configuration.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use shared_bufpool::{BufferPoolBuilder, DefaultAllocator};
///
/// # fn main() -> std::io::Result<()> {
/// let pool = BufferPoolBuilder::new()
///     .name("chunk-reader")
///     .allocator(Arc::new(DefaultAllocator::with_alignment(4096)?))
///     .build();
///
/// let buffer = pool.checkout(8192)?;
/// assert_eq!(buffer.as_ptr() as usize % 4096, 0);
/// # Ok(())
/// # }
/// ```
pub struct BufferPoolBuilder {
    name: String,
    allocator: Arc<dyn Allocator>,
}

impl Default for BufferPoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferPoolBuilder {
    /// Creates a new builder with default settings.
    ///
    /// Default settings:
    /// - Name: `"bufpool"`
    /// - Allocator: [`DefaultAllocator`]
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: DEFAULT_POOL_NAME.to_owned(),
            allocator: Arc::new(DefaultAllocator::new()),
        }
    }

    /// Sets the name the pool reports in its log events.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the allocator used to create buffers.
    ///
    /// Buffers remember the allocator that created them, so a buffer dropped
    /// outside the pool is always freed by the right backend.
    #[must_use]
    pub fn allocator(mut self, allocator: Arc<dyn Allocator>) -> Self {
        self.allocator = allocator;
        self
    }

    /// Builds the buffer pool with the configured settings.
    #[must_use]
    pub fn build(self) -> BufferPool {
        debug!(pool = %self.name, "creating buffer pool");

        BufferPool {
            inner: Arc::new(Mutex::new(PoolInner::default())),
            allocator: self.allocator,
            name: Arc::from(self.name),
        }
    }
}

/// A pool of reusable buffers, one FIFO free list per exact size.
///
/// Sizes are never rounded: 1023 and 1024 are separate classes that never
/// share buffers. Buffers are allocated lazily and, once released, stay in
/// the pool until a checkout of the same size takes them again or the last
/// pool handle is dropped.
///
/// # Thread Safety
///
/// Every checkout and release runs its lookup and list update under one
/// [`parking_lot::Mutex`] covering the whole map, so two threads can never pop
/// the same entry. The pool is cheap to clone; clones share state.
///
/// # Example
///
/// ```rust
/// use shared_bufpool::BufferPool;
///
/// # fn main() -> std::io::Result<()> {
/// let pool = BufferPool::new();
///
/// let b1 = pool.checkout(1024)?;
/// let addr = b1.as_ptr();
/// pool.release(1024, b1);
///
/// // The released buffer is handed out again.
/// let b2 = pool.checkout(1024)?;
/// assert_eq!(b2.as_ptr(), addr);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<Mutex<PoolInner>>,
    allocator: Arc<dyn Allocator>,
    name: Arc<str>,
}

impl BufferPool {
    /// Creates a new buffer pool with default settings.
    ///
    /// This is equivalent to `BufferPoolBuilder::new().build()`.
    #[must_use]
    pub fn new() -> Self {
        BufferPoolBuilder::new().build()
    }

    /// Checks out a buffer of exactly `size` bytes.
    ///
    /// The oldest released buffer of this size is reused if there is one;
    /// otherwise a new buffer is allocated. Contents are not zeroed.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `size` is 0 (`InvalidInput`)
    /// - The allocator fails (`OutOfMemory`). The pool is left unchanged.
    pub fn checkout(&self, size: usize) -> Result<Buffer> {
        if size == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "size must be > 0"));
        }

        let mut inner = self.inner.lock();
        inner.checkout(size, &self.allocator, &self.name)
    }

    /// Returns a buffer to the back of the free list for `size`.
    ///
    /// `size` must be the size the buffer was checked out with. This is not
    /// checked: a mismatched size files the buffer under the wrong class, and
    /// later checkouts of that class receive a buffer of the wrong length.
    /// [`checkout_scoped`](Self::checkout_scoped) remembers the size for you.
    pub fn release(&self, size: usize, buffer: Buffer) {
        let mut inner = self.inner.lock();
        inner.release(size, buffer, &self.name);
    }

    /// Checks out a buffer that returns itself to the pool when dropped.
    ///
    /// # Errors
    ///
    /// Same as [`checkout`](Self::checkout).
    pub fn checkout_scoped(&self, size: usize) -> Result<PooledBuffer> {
        let buffer = self.checkout(size)?;
        Ok(PooledBuffer::new(self.clone(), size, buffer))
    }

    /// Returns the number of idle buffers of `size`.
    #[must_use]
    pub fn free_count(&self, size: usize) -> usize {
        self.inner
            .lock()
            .free_lists
            .get(&size)
            .map_or(0, VecDeque::len)
    }

    /// Returns `(size, idle buffers)` for every size class seen so far,
    /// ascending by size.
    #[must_use]
    pub fn free_counts(&self) -> Vec<(usize, usize)> {
        let inner = self.inner.lock();
        let mut counts: Vec<_> = inner
            .free_lists
            .iter()
            .map(|(&size, list)| (size, list.len()))
            .collect();
        counts.sort_unstable_by_key(|&(size, _)| size);
        counts
    }

    /// Returns a snapshot of the pool counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.inner.lock().stats
    }

    /// Returns the name the pool was built with.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("name", &self.name)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Pool counters, captured atomically with respect to checkout and release.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers created by the allocator (free list misses).
    pub allocations: u64,
    /// Checkouts served from a free list.
    pub reuses: u64,
    /// Buffers handed back through `release`.
    pub releases: u64,
    /// Checkouts that failed because the allocator did.
    pub failures: u64,
    /// Buffers currently idle across all free lists.
    pub pooled_buffers: usize,
    /// Bytes currently idle across all free lists.
    pub pooled_bytes: usize,
}

impl PoolStats {
    /// Buffers allocated by this pool that are not idle in it: live
    /// checkouts plus buffers their owners dropped instead of releasing.
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        self.allocations.saturating_sub(self.pooled_buffers as u64)
    }

    /// Fraction of checkouts served from a free list (0.0 to 1.0).
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.reuses + self.allocations;
        if total == 0 {
            0.0
        } else {
            self.reuses as f64 / total as f64
        }
    }
}

/// Internal pool state protected by the mutex.
#[derive(Default)]
struct PoolInner {
    /// Idle buffers per size class, oldest first.
    free_lists: HashMap<usize, VecDeque<Buffer>>,

    /// Counters reported by `BufferPool::stats`.
    stats: PoolStats,
}

impl PoolInner {
    fn checkout(
        &mut self,
        size: usize,
        allocator: &Arc<dyn Allocator>,
        pool: &str,
    ) -> Result<Buffer> {
        if let Some(list) = self.free_lists.get_mut(&size) {
            if let Some(buffer) = list.pop_front() {
                self.stats.reuses += 1;
                self.stats.pooled_buffers -= 1;
                self.stats.pooled_bytes -= size;
                trace!(pool, size, idle = list.len(), "reused buffer");
                return Ok(buffer);
            }
        }

        let ptr = allocator.allocate(size).and_then(|ptr| {
            NonNull::new(ptr)
                .ok_or_else(|| Error::new(ErrorKind::OutOfMemory, "allocator returned null"))
        });
        let ptr = match ptr {
            Ok(ptr) => ptr,
            Err(e) => {
                self.stats.failures += 1;
                warn!(pool, size, error = %e, "buffer allocation failed");
                return Err(e);
            }
        };

        self.stats.allocations += 1;
        self.free_list(size, pool);
        trace!(pool, size, "allocated buffer");

        // SAFETY: ptr was just returned by allocator.allocate(size) and is
        // owned by nothing else
        Ok(unsafe { Buffer::new(ptr, size, Arc::clone(allocator)) })
    }

    /// Returns the free list for `size`, registering the class on first use.
    fn free_list(&mut self, size: usize, pool: &str) -> &mut VecDeque<Buffer> {
        match self.free_lists.entry(size) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                debug!(pool, size, "new size class");
                entry.insert(VecDeque::new())
            }
        }
    }

    fn release(&mut self, size: usize, buffer: Buffer, pool: &str) {
        let list = self.free_list(size, pool);
        list.push_back(buffer);
        let idle = list.len();

        self.stats.releases += 1;
        self.stats.pooled_buffers += 1;
        self.stats.pooled_bytes += size;
        trace!(pool, size, idle, "released buffer");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Allocator that tracks live allocations and can be told to fail.
    #[derive(Default)]
    struct CountingAllocator {
        live: AtomicUsize,
        remaining: AtomicUsize,
        limited: bool,
    }

    impl CountingAllocator {
        fn failing_after(n: usize) -> Self {
            Self {
                live: AtomicUsize::new(0),
                remaining: AtomicUsize::new(n),
                limited: true,
            }
        }

        fn live(&self) -> usize {
            self.live.load(Ordering::SeqCst)
        }
    }

    impl Allocator for CountingAllocator {
        fn allocate(&self, size: usize) -> Result<*mut u8> {
            if self.limited
                && self
                    .remaining
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_err()
            {
                return Err(Error::new(ErrorKind::OutOfMemory, "allocation budget spent"));
            }
            let ptr = DefaultAllocator::new().allocate(size)?;
            self.live.fetch_add(1, Ordering::SeqCst);
            Ok(ptr)
        }

        unsafe fn deallocate(&self, ptr: *mut u8, size: usize) {
            self.live.fetch_sub(1, Ordering::SeqCst);
            unsafe { DefaultAllocator::new().deallocate(ptr, size) };
        }
    }

    #[test]
    fn test_pool_builder_defaults() {
        let pool = BufferPoolBuilder::new().build();
        assert_eq!(pool.name(), DEFAULT_POOL_NAME);
        assert_eq!(pool.stats(), PoolStats::default());
        assert!(pool.free_counts().is_empty());
    }

    #[test]
    fn test_checkout_exact_length() {
        let pool = BufferPool::new();
        for size in [1, 3, 1023, 1024, 4096, 1 << 20] {
            let buffer = pool.checkout(size).unwrap();
            assert_eq!(buffer.len(), size);
        }
    }

    #[test]
    fn test_zero_size() {
        let pool = BufferPool::new();
        let err = pool.checkout(0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(pool.stats(), PoolStats::default());
    }

    #[test]
    fn test_release_then_checkout_reuses() {
        let pool = BufferPool::new();

        let b1 = pool.checkout(4096).unwrap();
        let addr = b1.as_ptr();
        pool.release(4096, b1);

        let b2 = pool.checkout(4096).unwrap();
        assert_eq!(b2.as_ptr(), addr);

        let stats = pool.stats();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.reuses, 1);
        assert_eq!(stats.releases, 1);
    }

    #[test]
    fn test_fifo_order() {
        let pool = BufferPool::new();

        let b1 = pool.checkout(256).unwrap();
        let b2 = pool.checkout(256).unwrap();
        let (a1, a2) = (b1.as_ptr(), b2.as_ptr());
        assert_ne!(a1, a2);

        pool.release(256, b1);
        pool.release(256, b2);

        assert_eq!(pool.checkout(256).unwrap().as_ptr(), a1);
        assert_eq!(pool.checkout(256).unwrap().as_ptr(), a2);
    }

    #[test]
    fn test_size_isolation() {
        let pool = BufferPool::new();

        let b = pool.checkout(1024).unwrap();
        let addr = b.as_ptr();
        pool.release(1024, b);

        // Neighbouring sizes never see the 1024 buffer
        let other = pool.checkout(1023).unwrap();
        assert_ne!(other.as_ptr(), addr);
        assert_eq!(other.len(), 1023);
        let other = pool.checkout(1025).unwrap();
        assert_ne!(other.as_ptr(), addr);

        assert_eq!(pool.free_count(1024), 1);
        assert_eq!(pool.free_count(1023), 0);
    }

    #[test]
    fn test_example_scenario() {
        let pool = BufferPool::new();

        let b1 = pool.checkout(1024).unwrap();
        assert_eq!(b1.len(), 1024);
        let a1 = b1.as_ptr();
        pool.release(1024, b1);

        let b1 = pool.checkout(1024).unwrap();
        assert_eq!(b1.as_ptr(), a1);

        // Free list is empty while b1 is out
        let b2 = pool.checkout(1024).unwrap();
        let a2 = b2.as_ptr();
        assert_ne!(a2, a1);

        pool.release(1024, b2);
        pool.release(1024, b1);
        assert_eq!(pool.free_count(1024), 2);

        assert_eq!(pool.checkout(1024).unwrap().as_ptr(), a2);
        assert_eq!(pool.checkout(1024).unwrap().as_ptr(), a1);
        assert_eq!(pool.stats().allocations, 2);
    }

    #[test]
    fn test_reused_buffer_keeps_contents() {
        let pool = BufferPool::new();

        let mut b = pool.checkout(32).unwrap();
        b.fill(0xEE);
        pool.release(32, b);

        let b = pool.checkout(32).unwrap();
        assert!(b.iter().all(|&x| x == 0xEE));
    }

    #[test]
    fn test_allocation_failure() {
        let allocator = Arc::new(CountingAllocator::failing_after(1));
        let pool = BufferPoolBuilder::new().allocator(allocator.clone()).build();

        let b1 = pool.checkout(512).unwrap();

        let err = pool.checkout(512).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfMemory);

        let stats = pool.stats();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.failures, 1);

        // A released buffer still satisfies checkouts without allocating
        pool.release(512, b1);
        let b = pool.checkout(512).unwrap();
        assert_eq!(b.len(), 512);
        assert_eq!(allocator.live(), 1);
    }

    #[test]
    fn test_unsatisfiable_size_is_out_of_memory() {
        let pool = BufferPool::new();

        for size in [usize::MAX, isize::MAX as usize] {
            let err = pool.checkout(size).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::OutOfMemory);
        }

        let stats = pool.stats();
        assert_eq!(stats.failures, 2);
        assert_eq!(stats.allocations, 0);
        assert_eq!(stats.pooled_buffers, 0);

        // Failed sizes never become size classes
        assert!(pool.free_counts().is_empty());
        assert_eq!(pool.free_count(usize::MAX), 0);
    }

    #[test]
    fn test_failed_checkout_registers_no_class() {
        let allocator = Arc::new(CountingAllocator::failing_after(0));
        let pool = BufferPoolBuilder::new().allocator(allocator).build();

        for _ in 0..3 {
            assert!(pool.checkout(256).is_err());
        }
        assert!(pool.free_counts().is_empty());
        assert_eq!(pool.stats().failures, 3);
    }

    #[test]
    fn test_dropped_buffers_are_freed() {
        let allocator = Arc::new(CountingAllocator::default());
        let pool = BufferPoolBuilder::new().allocator(allocator.clone()).build();

        let kept = pool.checkout(128).unwrap();
        let lost = pool.checkout(128).unwrap();
        assert_eq!(allocator.live(), 2);

        // Never released: freed on drop, unknown to the pool
        drop(lost);
        assert_eq!(allocator.live(), 1);

        pool.release(128, kept);
        assert_eq!(allocator.live(), 1);
        assert_eq!(pool.stats().outstanding(), 1);

        drop(pool);
        assert_eq!(allocator.live(), 0);
    }

    #[test]
    fn test_free_counts_sorted() {
        let pool = BufferPool::new();

        for size in [4096, 16, 512] {
            let b = pool.checkout(size).unwrap();
            pool.release(size, b);
        }
        let b = pool.checkout(16).unwrap();
        pool.release(16, b);
        let extra = pool.checkout(16).unwrap();
        let second = pool.checkout(16).unwrap();
        pool.release(16, extra);
        pool.release(16, second);

        assert_eq!(pool.free_counts(), vec![(16, 2), (512, 1), (4096, 1)]);

        let stats = pool.stats();
        assert_eq!(stats.pooled_buffers, 4);
        assert_eq!(stats.pooled_bytes, 16 * 2 + 512 + 4096);
    }

    #[test]
    fn test_stats_hit_rate() {
        let stats = PoolStats {
            allocations: 25,
            reuses: 75,
            ..PoolStats::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < 0.001);
        assert!(PoolStats::default().hit_rate().abs() < f64::EPSILON);
    }

    #[test]
    fn test_clone_pool() {
        let pool = BufferPool::new();
        let pool_clone = pool.clone();

        let b = pool.checkout(64).unwrap();
        let addr = b.as_ptr();
        pool.release(64, b);

        // Clone shares the same free lists
        assert_eq!(pool_clone.free_count(64), 1);
        assert_eq!(pool_clone.checkout(64).unwrap().as_ptr(), addr);
    }

    #[test]
    fn test_multiple_pools() {
        let pool1 = BufferPool::new();
        let pool2 = BufferPool::new();

        let b = pool1.checkout(64).unwrap();
        let addr = b.as_ptr();
        pool1.release(64, b);

        assert_ne!(pool2.checkout(64).unwrap().as_ptr(), addr);
        assert_eq!(pool1.free_count(64), 1);
    }

    #[test]
    fn test_global_pool() {
        let pool = global();
        assert!(std::ptr::eq(pool, global()));
        assert_eq!(pool.name(), "global");

        // Use an odd size so other tests sharing the global pool don't interfere
        let b = pool.checkout(7919).unwrap();
        assert_eq!(b.len(), 7919);
        pool.release(7919, b);
        assert!(pool.free_count(7919) >= 1);
    }

    #[test]
    fn test_concurrent_checkout_release() {
        const THREADS: usize = 8;
        const ROUNDS: usize = 500;
        const SIZES: [usize; 3] = [64, 1024, 4096];

        let pool = BufferPool::new();
        let live = Arc::new(Mutex::new(HashSet::new()));

        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let pool = pool.clone();
                let live = Arc::clone(&live);
                std::thread::spawn(move || {
                    for round in 0..ROUNDS {
                        let size = SIZES[(t + round) % SIZES.len()];
                        let mut held = Vec::new();

                        for _ in 0..=(round % 3) {
                            let mut buffer = pool.checkout(size).unwrap();
                            assert_eq!(buffer.len(), size);
                            assert!(
                                live.lock().insert(buffer.as_ptr() as usize),
                                "buffer handed out twice"
                            );
                            buffer.fill(t as u8);
                            held.push(buffer);
                        }

                        for buffer in held {
                            assert!(buffer.iter().all(|&b| b == t as u8));
                            live.lock().remove(&(buffer.as_ptr() as usize));
                            pool.release(size, buffer);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(live.lock().is_empty());

        let stats = pool.stats();
        let idle: usize = pool.free_counts().iter().map(|&(_, n)| n).sum();
        assert_eq!(idle as u64, stats.allocations);
        assert_eq!(stats.outstanding(), 0);
        assert_eq!(stats.reuses + stats.allocations, stats.releases);
        assert!(pool.free_counts().iter().all(|&(size, _)| SIZES.contains(&size)));
    }
}
