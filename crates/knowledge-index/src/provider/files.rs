use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use crate::cache::record::{CacheRecord, CacheState, FileMetadata, SourceType};
use crate::provider::SourceProvider;
use crate::util::text::hash_text;
use crate::util::time::format_rfc3339;

/// Sources discovered under a directory root. Change detection is by
/// `(size_bytes, mtime_ns)`; content edits that keep both identical are
/// not detected.
pub struct FileSourceProvider {
    sources_dir: PathBuf,
    // rel_path -> absolute path, refreshed by every discover call.
    discovered: parking_lot::Mutex<BTreeMap<String, PathBuf>>,
}

impl FileSourceProvider {
    pub fn new(sources_dir: impl Into<PathBuf>) -> Self {
        FileSourceProvider {
            sources_dir: sources_dir.into(),
            discovered: parking_lot::Mutex::new(BTreeMap::new()),
        }
    }

    fn lookup(&self, source_id: &str) -> Option<PathBuf> {
        self.discovered.lock().get(source_id).cloned()
    }

    async fn read_utf8(path: &Path) -> Option<String> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "failed to read source file");
                return None;
            }
        };
        match String::from_utf8(bytes) {
            Ok(text) => Some(text),
            Err(_) => {
                tracing::warn!(path = %path.display(), "skipping non-UTF-8 source file");
                None
            }
        }
    }

    async fn stat(path: &Path) -> Option<(u64, u64)> {
        match tokio::fs::metadata(path).await {
            Ok(metadata) => Some((metadata.len(), mtime_nanos(&metadata))),
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "failed to stat source file");
                None
            }
        }
    }
}

fn mtime_nanos(metadata: &std::fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|mtime| mtime.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or(0)
}

fn walk_sources(root: &Path) -> BTreeMap<String, PathBuf> {
    let mut sources = BTreeMap::new();
    if !root.exists() {
        tracing::warn!(path = %root.display(), "sources directory is missing");
        return sources;
    }
    for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let rel_path = rel
            .components()
            .map(|component| component.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        sources.insert(rel_path, entry.path().to_path_buf());
    }
    sources
}

#[async_trait]
impl SourceProvider for FileSourceProvider {
    fn name(&self) -> &'static str {
        "files"
    }

    async fn discover(&self, _now: DateTime<Utc>) -> BTreeMap<String, SourceType> {
        let root = self.sources_dir.clone();
        let walked = tokio::task::spawn_blocking(move || walk_sources(&root))
            .await
            .unwrap_or_default();
        let ids = walked
            .keys()
            .map(|source_id| (source_id.clone(), SourceType::File))
            .collect();
        *self.discovered.lock() = walked;
        ids
    }

    async fn init_record(&self, source_id: &str, now: DateTime<Utc>) -> Option<CacheRecord> {
        let path = self.lookup(source_id)?;
        let (size_bytes, mtime_ns) = Self::stat(&path).await?;
        let text = Self::read_utf8(&path).await?;
        Some(CacheRecord {
            content_hash: hash_text(&text),
            file: Some(FileMetadata {
                mtime_ns,
                rel_path: source_id.to_string(),
                size_bytes,
            }),
            last_indexed_at: format_rfc3339(now),
            source_type: SourceType::File,
            summary_pending: true,
            summary_text: String::new(),
            url: None,
        })
    }

    async fn refresh(&self, cache: &mut CacheState, _now: DateTime<Utc>) -> bool {
        let discovered: Vec<(String, PathBuf)> =
            self.discovered.lock().iter().map(|(k, v)| (k.clone(), v.clone())).collect();

        let mut changed = false;
        for (rel_path, path) in discovered {
            let Some(record) = cache.sources.get(&rel_path) else {
                continue;
            };
            if record.source_type != SourceType::File {
                // Stale record from another family; drop it and let the
                // next reconcile recreate it under the right type.
                tracing::warn!(source_id = %rel_path, "record type mismatch for file source");
                cache.sources.remove(&rel_path);
                changed = true;
                continue;
            }

            let Some((size_bytes, mtime_ns)) = Self::stat(&path).await else {
                continue;
            };
            let unchanged = record
                .file
                .as_ref()
                .is_some_and(|meta| meta.size_bytes == size_bytes && meta.mtime_ns == mtime_ns);
            if unchanged {
                continue;
            }

            let Some(text) = Self::read_utf8(&path).await else {
                continue;
            };
            let content_hash = hash_text(&text);
            let Some(record) = cache.sources.get_mut(&rel_path) else {
                continue;
            };
            record.file = Some(FileMetadata {
                mtime_ns,
                rel_path: rel_path.clone(),
                size_bytes,
            });
            if content_hash != record.content_hash || record.summary_pending {
                record.content_hash = content_hash;
                record.summary_pending = true;
            }
            changed = true;
        }
        changed
    }

    async fn load_text(&self, source_id: &str) -> Option<String> {
        let path = self.lookup(source_id)?;
        Self::read_utf8(&path).await
    }
}
