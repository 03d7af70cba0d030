mod buffer;
mod cache;

pub use buffer::{CachedArray, CachedBuffer};
pub use cache::MemoryCache;
