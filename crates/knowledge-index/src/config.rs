//! Settings for the knowledge index. Loading and CLI wiring belong to the
//! embedding application; this is the schema with workable defaults.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::record::SourceType;

const DEFAULT_SUMMARIZATION_PROMPT: &str = "Summarize the given source for a knowledge index. \
Reply with at most two sentences describing what the source covers and when it is useful.";

/// Knowledge index settings.
///
/// Every field has a default, so a partial config deserializes cleanly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    /// Filesystem root scanned for file sources.
    pub sources_dir: PathBuf,
    /// Text file listing URL sources, one per line.
    pub links_file_path: PathBuf,
    /// JSON cache path.
    pub index_cache_path: PathBuf,
    /// Index artifact path.
    pub index_path: PathBuf,

    /// Seconds between background refresh cycles; doubles as the short
    /// retry backoff after a URL failure.
    pub runtime_refresh_tick_seconds: u64,
    /// Minimum gap between successful checks of the same URL.
    pub url_refresh_min_interval_hours: u64,
    /// Max parallel HTTP operations (conditional requests + downloads).
    pub url_download_concurrency: usize,
    /// Max parallel summarizer calls.
    pub summarization_concurrency: usize,
    /// Per-request HTTP timeout.
    pub web_fetch_timeout_seconds: u64,
    /// Directory for the extractor's body cache.
    pub web_fetch_cache_dir: PathBuf,

    /// Optional single line prepended to the index artifact.
    pub index_prefix: String,
    /// Grouping order of the artifact's blocks.
    pub source_type_order: Vec<SourceType>,

    /// Base system prompt for summarization.
    pub base_summarization_prompt: String,
    /// Optional project introduction appended to the system prompt.
    pub project_introduction: String,
}

impl Default for IndexSettings {
    fn default() -> Self {
        IndexSettings {
            sources_dir: PathBuf::from("data/knowledge-base/sources"),
            links_file_path: PathBuf::from("data/knowledge-base/links.txt"),
            index_cache_path: PathBuf::from("data/knowledge-base/index-cache.json"),
            index_path: PathBuf::from("data/knowledge-base/index.txt"),
            runtime_refresh_tick_seconds: 300,
            url_refresh_min_interval_hours: 24,
            url_download_concurrency: 4,
            summarization_concurrency: 2,
            web_fetch_timeout_seconds: 10,
            web_fetch_cache_dir: PathBuf::from("data/knowledge-base/web-cache"),
            index_prefix: String::new(),
            source_type_order: vec![SourceType::File, SourceType::Url],
            base_summarization_prompt: DEFAULT_SUMMARIZATION_PROMPT.to_string(),
            project_introduction: String::new(),
        }
    }
}

impl IndexSettings {
    pub fn refresh_tick(&self) -> Duration {
        Duration::from_secs(self.runtime_refresh_tick_seconds)
    }

    pub fn url_refresh_min_interval(&self) -> Duration {
        Duration::from_secs(self.url_refresh_min_interval_hours * 3600)
    }

    pub fn web_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.web_fetch_timeout_seconds)
    }

    /// Download concurrency, clamped to at least one permit.
    pub fn download_permits(&self) -> usize {
        self.url_download_concurrency.max(1)
    }

    /// Summarization concurrency, clamped to at least one permit.
    pub fn summary_permits(&self) -> usize {
        self.summarization_concurrency.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let settings = IndexSettings::default();
        assert_eq!(settings.source_type_order, vec![SourceType::File, SourceType::Url]);
        assert!(settings.summary_permits() >= 1);
        assert!(settings.download_permits() >= 1);
        assert!(!settings.base_summarization_prompt.is_empty());
    }

    #[test]
    fn partial_config_deserializes() {
        let settings: IndexSettings = serde_json::from_str(
            r#"{"sources_dir": "kb/sources", "url_download_concurrency": 8}"#,
        )
        .unwrap();
        assert_eq!(settings.sources_dir, PathBuf::from("kb/sources"));
        assert_eq!(settings.url_download_concurrency, 8);
        // Untouched fields keep their defaults.
        assert_eq!(settings.runtime_refresh_tick_seconds, 300);
    }

    #[test]
    fn zero_concurrency_clamps_to_one() {
        let settings: IndexSettings = serde_json::from_str(
            r#"{"url_download_concurrency": 0, "summarization_concurrency": 0}"#,
        )
        .unwrap();
        assert_eq!(settings.download_permits(), 1);
        assert_eq!(settings.summary_permits(), 1);
    }

    #[test]
    fn durations_convert() {
        let settings = IndexSettings::default();
        assert_eq!(settings.refresh_tick(), Duration::from_secs(300));
        assert_eq!(settings.url_refresh_min_interval(), Duration::from_secs(24 * 3600));
    }
}
