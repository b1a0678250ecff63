//! # shared-bufpool
//!
//! A pool of reusable fixed-size byte buffers for code paths that repeatedly
//! need scratch memory of one particular size, such as reading fixed-length
//! chunks from data files.
//!
//! ## Features
//!
//! - **Exact size classes**: buffers are keyed by their exact length; 1023 and
//!   1024 byte requests never share buffers
//! - **FIFO reuse**: within a size class the oldest released buffer is served first
//! - **Owned handles**: a [`Buffer`] has one owner at a time and is moved back
//!   into the pool on release
//! - **Scoped checkouts**: [`PooledBuffer`] releases itself on drop under the
//!   size it was checked out with
//! - **Custom Allocators**: pluggable [`Allocator`] trait for the storage backend
//! - **Chunk readers**: [`ChunkReader`] and [`AsyncChunkReader`] read streams in
//!   fixed-size chunks straight into pooled buffers
//!
//! Buffers are never zeroed on reuse and the pool never evicts idle buffers.
//!
//! ## Example
//!
//! ```rust
//! use shared_bufpool::BufferPool;
//!
//! # fn main() -> std::io::Result<()> {
//! let pool = BufferPool::new();
//!
//! let buffer = pool.checkout(1024)?;
//! assert_eq!(buffer.len(), 1024);
//! let addr = buffer.as_ptr();
//!
//! // Hand it back; the next checkout of the same size reuses it
//! pool.release(1024, buffer);
//! assert_eq!(pool.checkout(1024)?.as_ptr(), addr);
//! # Ok(())
//! # }
//! ```
//!
//! ## Scoped Example
//!
//! ```rust
//! # fn main() -> std::io::Result<()> {
//! let pool = shared_bufpool::global();
//!
//! let mut scratch = pool.checkout_scoped(4096)?;
//! scratch.fill(0);
//! // Returned to the global pool here
//! drop(scratch);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(unsafe_op_in_unsafe_fn)]

mod allocator;
mod buffer;
mod chunk;
mod guard;
mod pool;

pub use allocator::{Allocator, DEFAULT_ALIGNMENT, DefaultAllocator};
pub use buffer::{Buffer, RawView};
pub use chunk::{AsyncChunkReader, Chunk, ChunkReader};
pub use guard::PooledBuffer;
pub use pool::{BufferPool, BufferPoolBuilder, PoolStats, global};
