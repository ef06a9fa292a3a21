//! On-disk cache: record types and the durable store.

pub mod record;
pub mod store;

pub use record::{
    CacheRecord, CacheState, FetchStatus, FileMetadata, SourceType, UrlMetadata, SCHEMA_VERSION,
};
pub use store::CacheStore;
