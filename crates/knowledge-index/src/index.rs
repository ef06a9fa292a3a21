//! The human-readable index artifact: rendering, atomic writes, and the
//! read side downstream consumers use.

use std::path::{Path, PathBuf};

use crate::cache::record::{CacheState, SourceType};
use crate::error::{IndexError, IndexResult};
use crate::util::fs::atomic_write;

/// Renders the index artifact from cache state and writes it atomically.
///
/// Only records that are summarized and not pending contribute. Blocks are
/// grouped by source type in the configured order and sorted by source id
/// within each group, so the artifact is deterministic for a given cache.
pub struct IndexWriter {
    path: PathBuf,
    prefix: String,
    type_order: Vec<SourceType>,
}

impl IndexWriter {
    pub fn new(path: impl Into<PathBuf>, prefix: impl Into<String>, type_order: Vec<SourceType>) -> Self {
        IndexWriter {
            path: path.into(),
            prefix: prefix.into(),
            type_order,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn render(&self, cache: &CacheState) -> String {
        let mut groups = self.type_order.clone();
        for source_type in [SourceType::File, SourceType::Url] {
            if !groups.contains(&source_type) {
                groups.push(source_type);
            }
        }

        let mut blocks: Vec<String> = Vec::new();
        for source_type in groups {
            // BTreeMap iteration is already sorted by source id.
            for (source_id, record) in &cache.sources {
                if record.source_type != source_type || !record.contributes() {
                    continue;
                }
                blocks.push(format!("{source_id}\n{}", record.summary_text.trim()));
            }
        }

        let body = blocks.join("\n\n");
        let prefix = self.prefix.trim();
        if prefix.is_empty() {
            body
        } else if body.is_empty() {
            prefix.to_string()
        } else {
            format!("{prefix}\n\n{body}")
        }
    }

    pub async fn write(&self, cache: &CacheState) -> IndexResult<()> {
        let content = self.render(cache);
        atomic_write(&self.path, content.as_bytes()).await?;
        tracing::info!(
            path = %self.path.display(),
            bytes = content.len(),
            "index artifact written"
        );
        Ok(())
    }
}

/// One `source_id` + description block parsed back out of the artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub source_id: String,
    pub description: String,
}

/// Load the artifact as plain text; a missing file reads as empty.
pub async fn load_index_text(path: &Path) -> IndexResult<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(text),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(error) => Err(IndexError::io("read", path, error)),
    }
}

/// Split the artifact into structured entries. Blocks are separated by a
/// blank line; the first line of each block is the source id.
pub fn parse_index(text: &str) -> Vec<IndexEntry> {
    let mut entries = Vec::new();
    for chunk in text.trim().split("\n\n") {
        let chunk = chunk.trim();
        if chunk.is_empty() {
            continue;
        }
        let (source_id, description) = match chunk.split_once('\n') {
            Some((first, rest)) => (first, rest),
            None => (chunk, ""),
        };
        entries.push(IndexEntry {
            source_id: source_id.trim().to_string(),
            description: description.trim().to_string(),
        });
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::record::{CacheRecord, FileMetadata, UrlMetadata, FetchStatus};
    use crate::util::time::utc_now;
    use tempfile::tempdir;

    fn record(source_type: SourceType, summary: &str, pending: bool) -> CacheRecord {
        let file = match source_type {
            SourceType::File => Some(FileMetadata {
                mtime_ns: 1,
                rel_path: "x".to_string(),
                size_bytes: 1,
            }),
            SourceType::Url => None,
        };
        let url = match source_type {
            SourceType::Url => Some(UrlMetadata {
                etag: None,
                fetch_status: FetchStatus::Success,
                last_fetched_at: "2024-01-01T00:00:00.000000Z".to_string(),
                last_modified: None,
                next_check_at: "2024-01-02T00:00:00.000000Z".to_string(),
                url: "https://example.com".to_string(),
            }),
            SourceType::File => None,
        };
        CacheRecord {
            content_hash: "h".to_string(),
            file,
            last_indexed_at: "2024-01-01T00:00:00.000000Z".to_string(),
            source_type,
            summary_pending: pending,
            summary_text: summary.to_string(),
            url,
        }
    }

    fn writer(prefix: &str) -> IndexWriter {
        IndexWriter::new("unused", prefix, vec![SourceType::File, SourceType::Url])
    }

    #[test]
    fn renders_sorted_blocks() {
        let mut cache = CacheState::empty(utc_now());
        cache.sources.insert("b.md".to_string(), record(SourceType::File, "SB", false));
        cache.sources.insert("a.md".to_string(), record(SourceType::File, "SA", false));

        assert_eq!(writer("").render(&cache), "a.md\nSA\n\nb.md\nSB");
    }

    #[test]
    fn groups_files_before_urls_by_default() {
        let mut cache = CacheState::empty(utc_now());
        cache
            .sources
            .insert("https://a.example".to_string(), record(SourceType::Url, "U", false));
        cache.sources.insert("z.md".to_string(), record(SourceType::File, "F", false));

        assert_eq!(writer("").render(&cache), "z.md\nF\n\nhttps://a.example\nU");
    }

    #[test]
    fn configured_order_wins() {
        let mut cache = CacheState::empty(utc_now());
        cache
            .sources
            .insert("https://a.example".to_string(), record(SourceType::Url, "U", false));
        cache.sources.insert("z.md".to_string(), record(SourceType::File, "F", false));

        let writer = IndexWriter::new("unused", "", vec![SourceType::Url, SourceType::File]);
        assert_eq!(writer.render(&cache), "https://a.example\nU\n\nz.md\nF");
    }

    #[test]
    fn pending_and_empty_records_are_excluded() {
        let mut cache = CacheState::empty(utc_now());
        cache.sources.insert("a.md".to_string(), record(SourceType::File, "S", false));
        cache.sources.insert("b.md".to_string(), record(SourceType::File, "S", true));
        cache.sources.insert("c.md".to_string(), record(SourceType::File, "  ", false));

        assert_eq!(writer("").render(&cache), "a.md\nS");
    }

    #[test]
    fn prefix_is_prepended_with_blank_line() {
        let mut cache = CacheState::empty(utc_now());
        cache.sources.insert("a.md".to_string(), record(SourceType::File, "S", false));

        assert_eq!(writer("Knowledge index").render(&cache), "Knowledge index\n\na.md\nS");
    }

    #[test]
    fn empty_cache_renders_prefix_only() {
        let cache = CacheState::empty(utc_now());
        assert_eq!(writer("").render(&cache), "");
        assert_eq!(writer("Knowledge index").render(&cache), "Knowledge index");
    }

    #[test]
    fn summaries_are_trimmed_into_blocks() {
        let mut cache = CacheState::empty(utc_now());
        cache
            .sources
            .insert("a.md".to_string(), record(SourceType::File, "  S with space \n", false));

        assert_eq!(writer("").render(&cache), "a.md\nS with space");
    }

    #[tokio::test]
    async fn writes_atomically() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("index.txt");
        let mut cache = CacheState::empty(utc_now());
        cache.sources.insert("a.md".to_string(), record(SourceType::File, "S", false));

        let writer = IndexWriter::new(&path, "", vec![SourceType::File, SourceType::Url]);
        writer.write(&cache).await.expect("write");

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a.md\nS");
        assert!(!dir.path().join("index.txt.tmp").exists());
    }

    #[test]
    fn parses_entries_back_out() {
        let entries = parse_index("a.md\nSummary A\nmore\n\nhttps://x\nSummary B");
        assert_eq!(
            entries,
            vec![
                IndexEntry {
                    source_id: "a.md".to_string(),
                    description: "Summary A\nmore".to_string(),
                },
                IndexEntry {
                    source_id: "https://x".to_string(),
                    description: "Summary B".to_string(),
                },
            ]
        );
    }

    #[test]
    fn parse_of_empty_text_is_empty() {
        assert!(parse_index("").is_empty());
        assert!(parse_index("   \n\n  ").is_empty());
    }

    #[tokio::test]
    async fn load_missing_artifact_is_empty() {
        let dir = tempdir().expect("tempdir");
        let text = load_index_text(&dir.path().join("index.txt")).await.expect("load");
        assert!(text.is_empty());
    }
}
