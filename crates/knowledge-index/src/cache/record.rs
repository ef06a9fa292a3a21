use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::util::time::format_rfc3339;

/// Hard equality check on load; any schema change bumps this and forces a
/// rebuild. There is no migration path.
pub const SCHEMA_VERSION: u32 = 1;

/// Which provider family owns a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    File,
    Url,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceType::File => write!(f, "file"),
            SourceType::Url => write!(f, "url"),
        }
    }
}

/// Outcome of the most recent refresh attempt for a URL record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Success,
    NotModified,
    Timeout,
    Error,
}

// Struct fields are declared in key order so the serialized form matches
// the sorted-key cache files produced by earlier deployments byte for byte.

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub mtime_ns: u64,
    pub rel_path: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlMetadata {
    #[serde(default)]
    pub etag: Option<String>,
    pub fetch_status: FetchStatus,
    pub last_fetched_at: String,
    #[serde(default)]
    pub last_modified: Option<String>,
    pub next_check_at: String,
    pub url: String,
}

/// Persisted per-source state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileMetadata>,
    pub last_indexed_at: String,
    pub source_type: SourceType,
    #[serde(default)]
    pub summary_pending: bool,
    pub summary_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<UrlMetadata>,
}

impl CacheRecord {
    /// Whether the record contributes to the index artifact: summarized
    /// and not awaiting a re-summarization.
    pub fn contributes(&self) -> bool {
        !self.summary_pending && !self.summary_text.trim().is_empty()
    }

    /// The sub-record present must match `source_type`.
    pub fn is_consistent(&self) -> bool {
        match self.source_type {
            SourceType::File => self.file.is_some() && self.url.is_none(),
            SourceType::Url => self.url.is_some() && self.file.is_none(),
        }
    }
}

/// The sole persisted unit. `sources` is a `BTreeMap` so every encode
/// emits keys in the same order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheState {
    pub generated_at: String,
    pub schema_version: u32,
    #[serde(default)]
    pub sources: BTreeMap<String, CacheRecord>,
}

impl CacheState {
    pub fn empty(now: DateTime<Utc>) -> Self {
        CacheState {
            generated_at: format_rfc3339(now),
            schema_version: SCHEMA_VERSION,
            sources: BTreeMap::new(),
        }
    }
}
