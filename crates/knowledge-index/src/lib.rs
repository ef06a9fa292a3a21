//! Persistent, incrementally-refreshed knowledge index.
//!
//! Sources (files under a directory, URLs from a links file) are
//! discovered each cycle, reconciled against a durable JSON cache,
//! refreshed through their owning provider, summarized by an external
//! [`Summarizer`], and rendered into a plain-text index artifact. Every
//! persist is atomic and every cycle runs under a single writer lock, so
//! downstream readers always see a complete, consistent artifact.

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod index;
pub mod indexer;
pub mod provider;
pub mod summarize;
pub mod util;

pub use cache::{
    CacheRecord, CacheState, CacheStore, FetchStatus, FileMetadata, SourceType, UrlMetadata,
    SCHEMA_VERSION,
};
pub use config::IndexSettings;
pub use error::{IndexError, IndexResult};
pub use fetch::{ContentExtractor, WebFetcher};
pub use index::{load_index_text, parse_index, IndexEntry, IndexWriter};
pub use indexer::{KnowledgeIndexer, RuntimeRefresher};
pub use provider::{FileSourceProvider, SourceProvider, UrlLinksProvider};
pub use summarize::{compose_system_prompt, SummaryResponse, Summarizer};
