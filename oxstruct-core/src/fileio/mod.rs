//! File identity, content caching, and encoding detection.

pub mod cache;
pub mod encoding;
pub mod handle;
pub mod identity;

pub use cache::{CacheEntry, FileCache, DEFAULT_CACHE_BYTES};
pub use encoding::DetectedText;
pub use handle::FileHandle;
pub use identity::{FileIdentity, HashAlgorithm};
