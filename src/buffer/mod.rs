//! Buffer pool: reference-counted page cache.
//!
//! [`ResourceCache`] is the generic engine; the buffer pool plugs a page
//! loader into it.

pub mod cache;
mod pool;

pub use cache::{CacheLoader, ResourceCache};
pub use pool::{BufferPool, BufferPoolImpl, PageLoader};
