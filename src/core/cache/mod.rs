pub mod repository;
pub mod snapshot;

pub use repository::{CacheRepository, FileCacheRepository, MemoryCacheRepository};
pub use snapshot::{CacheSnapshot, PatchesCacheSnapshot, SourceBucket, VersionsCacheSnapshot};
