use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::cache::record::{CacheState, SCHEMA_VERSION};
use crate::error::IndexResult;
use crate::util::fs::atomic_write;

/// Durable store for [`CacheState`].
///
/// Losing the cache is never fatal: every load failure degrades to an
/// empty state, which only forces re-summarization on the next cycle.
pub struct CacheStore {
    path: PathBuf,
}

impl CacheStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CacheStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cache, falling back to an empty state when the file is
    /// missing, unreadable, unparseable, or from a different schema.
    pub async fn load(&self, now: DateTime<Utc>) -> CacheState {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return CacheState::empty(now);
            }
            Err(error) => {
                tracing::warn!(path = %self.path.display(), %error, "failed to read cache file");
                return CacheState::empty(now);
            }
        };

        let cache: CacheState = match serde_json::from_slice(&bytes) {
            Ok(cache) => cache,
            Err(error) => {
                tracing::warn!(path = %self.path.display(), %error, "failed to parse cache file");
                return CacheState::empty(now);
            }
        };

        if cache.schema_version != SCHEMA_VERSION {
            tracing::warn!(
                expected = SCHEMA_VERSION,
                actual = cache.schema_version,
                "cache schema mismatch; rebuilding"
            );
            return CacheState::empty(now);
        }
        cache
    }

    /// Persist the cache atomically (`.tmp` + rename).
    pub async fn save(&self, cache: &CacheState) -> IndexResult<()> {
        let encoded = serde_json::to_vec_pretty(cache)?;
        atomic_write(&self.path, &encoded).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::record::{CacheRecord, FileMetadata, SourceType};
    use crate::util::time::utc_now;
    use tempfile::tempdir;

    fn sample_state() -> CacheState {
        let mut state = CacheState::empty(utc_now());
        state.sources.insert(
            "a.md".to_string(),
            CacheRecord {
                content_hash: "hash".to_string(),
                file: Some(FileMetadata {
                    mtime_ns: 1,
                    rel_path: "a.md".to_string(),
                    size_bytes: 2,
                }),
                last_indexed_at: "2024-01-01T00:00:00.000000Z".to_string(),
                source_type: SourceType::File,
                summary_pending: false,
                summary_text: "S".to_string(),
                url: None,
            },
        );
        state
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempdir().expect("tempdir");
        let store = CacheStore::new(dir.path().join("cache.json"));
        let cache = store.load(utc_now()).await;
        assert!(cache.sources.is_empty());
        assert_eq!(cache.schema_version, SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn saves_and_reloads() {
        let dir = tempdir().expect("tempdir");
        let store = CacheStore::new(dir.path().join("cache.json"));

        let state = sample_state();
        store.save(&state).await.expect("save");
        let loaded = store.load(utc_now()).await;
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn corrupt_file_loads_empty() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("cache.json");
        std::fs::write(&path, b"{not json").unwrap();

        let store = CacheStore::new(path);
        let cache = store.load(utc_now()).await;
        assert!(cache.sources.is_empty());
    }

    #[tokio::test]
    async fn schema_mismatch_loads_empty() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("cache.json");

        let mut state = sample_state();
        state.schema_version = SCHEMA_VERSION + 1;
        std::fs::write(&path, serde_json::to_vec_pretty(&state).unwrap()).unwrap();

        let store = CacheStore::new(path);
        let cache = store.load(utc_now()).await;
        assert!(cache.sources.is_empty());
        assert_eq!(cache.schema_version, SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn save_creates_parent_dirs() {
        let dir = tempdir().expect("tempdir");
        let store = CacheStore::new(dir.path().join("nested/dir/cache.json"));
        store.save(&sample_state()).await.expect("save");
        assert!(store.path().exists());
    }
}
