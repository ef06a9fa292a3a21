//! The capability set every source family implements.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::cache::record::{CacheRecord, CacheState, SourceType};

pub mod files;
pub mod links;

pub use files::FileSourceProvider;
pub use links::UrlLinksProvider;

/// A family of text sources, polymorphic over four operations. The
/// orchestrator owns providers; providers never call back into it.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Short name used in log output.
    fn name(&self) -> &'static str;

    /// Enumerate currently available sources. Cheap and idempotent;
    /// called every cycle.
    async fn discover(&self, now: DateTime<Utc>) -> BTreeMap<String, SourceType>;

    /// Build the initial record for a never-before-seen source id.
    /// `None` means "skip this cycle, retry later" and is not fatal.
    async fn init_record(&self, source_id: &str, now: DateTime<Utc>) -> Option<CacheRecord>;

    /// Examine owned records, mutate them in place, and report whether
    /// anything changed (the caller persists when true).
    async fn refresh(&self, cache: &mut CacheState, now: DateTime<Utc>) -> bool;

    /// The text to summarize for a source. `None` (or empty) aborts that
    /// record's summary for the current cycle.
    async fn load_text(&self, source_id: &str) -> Option<String>;
}
