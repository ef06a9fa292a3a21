use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use reqwest::header;
use tokio::sync::Semaphore;

use crate::cache::record::{CacheRecord, CacheState, FetchStatus, SourceType, UrlMetadata};
use crate::config::IndexSettings;
use crate::fetch::ContentExtractor;
use crate::provider::SourceProvider;
use crate::util::text::hash_text;
use crate::util::time::{format_rfc3339, parse_rfc3339};

/// Sources listed in a links file, refreshed over HTTP with conditional
/// requests. Body retrieval is delegated to the extractor; this provider
/// only speaks the validator protocol.
pub struct UrlLinksProvider {
    links_file: PathBuf,
    extractor: Arc<dyn ContentExtractor>,
    http: reqwest::Client,
    refresh_interval: chrono::Duration,
    retry_backoff: chrono::Duration,
    // Shared by conditional requests and body downloads.
    download_semaphore: Arc<Semaphore>,
    state: parking_lot::Mutex<LinksState>,
}

#[derive(Default)]
struct LinksState {
    sources: BTreeMap<String, SourceType>,
    // (mtime_ns, size_bytes) of the links file at the last parse.
    links_file_last: Option<(u64, u64)>,
}

/// Result of probing one URL for changes.
enum ProbeOutcome {
    NotModified,
    Modified {
        content_hash: String,
        etag: Option<String>,
        last_modified: Option<String>,
    },
    Failed(FetchStatus),
}

impl UrlLinksProvider {
    pub fn new(settings: &IndexSettings, extractor: Arc<dyn ContentExtractor>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(settings.web_fetch_timeout())
            .build()
            .unwrap_or_default();
        UrlLinksProvider {
            links_file: settings.links_file_path.clone(),
            extractor,
            http,
            refresh_interval: chrono::Duration::hours(settings.url_refresh_min_interval_hours as i64),
            retry_backoff: chrono::Duration::seconds(settings.runtime_refresh_tick_seconds as i64),
            download_semaphore: Arc::new(Semaphore::new(settings.download_permits())),
            state: parking_lot::Mutex::new(LinksState::default()),
        }
    }

    fn clear_state(&self) {
        let mut state = self.state.lock();
        state.sources.clear();
        state.links_file_last = None;
    }

    /// Fetch a URL's body through the extractor, bounded by the shared
    /// download semaphore.
    async fn fetch_text(&self, url: &str, force_refresh: bool) -> Option<String> {
        let Ok(_permit) = self.download_semaphore.acquire().await else {
            return None;
        };
        self.extractor.fetch(url, force_refresh).await
    }

    async fn conditional_request(
        &self,
        url: &str,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> Result<(u16, Option<String>, Option<String>), reqwest::Error> {
        let mut request = self.http.get(url);
        if let Some(etag) = etag {
            request = request.header(header::IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = last_modified {
            request = request.header(header::IF_MODIFIED_SINCE, last_modified);
        }
        let response = request.send().await?;
        let header_value = |name: header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        Ok((
            response.status().as_u16(),
            header_value(header::ETAG),
            header_value(header::LAST_MODIFIED),
        ))
    }

    async fn probe(
        &self,
        url: &str,
        etag: Option<String>,
        last_modified: Option<String>,
    ) -> ProbeOutcome {
        let result = {
            let Ok(_permit) = self.download_semaphore.acquire().await else {
                return ProbeOutcome::Failed(FetchStatus::Error);
            };
            self.conditional_request(url, etag.as_deref(), last_modified.as_deref())
                .await
        };
        let (status, new_etag, new_last_modified) = match result {
            Ok(parts) => parts,
            Err(error) if error.is_timeout() => {
                tracing::warn!(url, "url refresh request timed out");
                return ProbeOutcome::Failed(FetchStatus::Timeout);
            }
            Err(error) => {
                tracing::warn!(url, %error, "url refresh request failed");
                return ProbeOutcome::Failed(FetchStatus::Error);
            }
        };

        if status == 304 {
            return ProbeOutcome::NotModified;
        }
        if status != 200 {
            tracing::warn!(url, status, "unexpected url refresh status");
            return ProbeOutcome::Failed(FetchStatus::Error);
        }

        match self.fetch_text(url, true).await {
            Some(text) => ProbeOutcome::Modified {
                content_hash: hash_text(&text),
                etag: new_etag,
                last_modified: new_last_modified,
            },
            None => {
                tracing::warn!(url, "failed to fetch url body during refresh");
                ProbeOutcome::Failed(FetchStatus::Error)
            }
        }
    }

    fn apply_probe(
        &self,
        cache: &mut CacheState,
        source_id: &str,
        outcome: ProbeOutcome,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(record) = cache.sources.get_mut(source_id) else {
            return false;
        };
        let Some(url_meta) = record.url.as_mut() else {
            return false;
        };

        match outcome {
            ProbeOutcome::NotModified => {
                url_meta.fetch_status = FetchStatus::NotModified;
                url_meta.last_fetched_at = format_rfc3339(now);
                url_meta.next_check_at = format_rfc3339(now + self.refresh_interval);
                true
            }
            ProbeOutcome::Modified {
                content_hash,
                etag,
                last_modified,
            } => {
                url_meta.etag = etag;
                url_meta.last_modified = last_modified;
                url_meta.fetch_status = FetchStatus::Success;
                url_meta.last_fetched_at = format_rfc3339(now);
                url_meta.next_check_at = format_rfc3339(now + self.refresh_interval);

                let needs_summary = content_hash != record.content_hash
                    || record.summary_pending
                    || record.summary_text.trim().is_empty();
                record.content_hash = content_hash;
                if needs_summary {
                    record.summary_pending = true;
                }
                true
            }
            ProbeOutcome::Failed(status) => {
                url_meta.fetch_status = status;
                // Short retry; the backoff must land on disk.
                url_meta.next_check_at = format_rfc3339(now + self.retry_backoff);
                true
            }
        }
    }

    fn is_eligible(record: &CacheRecord, now: DateTime<Utc>) -> bool {
        let Some(url_meta) = &record.url else {
            return false;
        };
        match parse_rfc3339(&url_meta.next_check_at) {
            Ok(next_check) => next_check <= now,
            Err(_) => true,
        }
    }
}

fn parse_links(content: &str) -> BTreeMap<String, SourceType> {
    let mut sources = BTreeMap::new();
    for line in content.lines() {
        let url = line.trim();
        if url.is_empty() || url.starts_with('#') {
            continue;
        }
        sources.entry(url.to_string()).or_insert(SourceType::Url);
    }
    sources
}

#[async_trait]
impl SourceProvider for UrlLinksProvider {
    fn name(&self) -> &'static str {
        "links"
    }

    async fn discover(&self, _now: DateTime<Utc>) -> BTreeMap<String, SourceType> {
        let stat = match tokio::fs::metadata(&self.links_file).await {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                self.clear_state();
                return BTreeMap::new();
            }
            Err(error) => {
                tracing::warn!(path = %self.links_file.display(), %error, "failed to stat links file");
                self.clear_state();
                return BTreeMap::new();
            }
        };
        let current = (
            stat.modified()
                .ok()
                .and_then(|mtime| mtime.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|elapsed| elapsed.as_nanos() as u64)
                .unwrap_or(0),
            stat.len(),
        );

        if self.state.lock().links_file_last == Some(current) {
            return self.state.lock().sources.clone();
        }

        let content = match tokio::fs::read_to_string(&self.links_file).await {
            Ok(content) => content,
            Err(error) => {
                tracing::warn!(path = %self.links_file.display(), %error, "failed to read links file");
                self.clear_state();
                return BTreeMap::new();
            }
        };

        let sources = parse_links(&content);
        tracing::debug!(
            path = %self.links_file.display(),
            discovered = sources.len(),
            "parsed links file"
        );
        let mut state = self.state.lock();
        state.sources = sources.clone();
        state.links_file_last = Some(current);
        sources
    }

    async fn init_record(&self, source_id: &str, now: DateTime<Utc>) -> Option<CacheRecord> {
        if !self.state.lock().sources.contains_key(source_id) {
            return None;
        }
        let text = self.fetch_text(source_id, true).await;
        let Some(text) = text else {
            tracing::warn!(url = source_id, "failed to fetch content for new url source");
            return None;
        };
        Some(CacheRecord {
            content_hash: hash_text(&text),
            file: None,
            last_indexed_at: format_rfc3339(now),
            source_type: SourceType::Url,
            summary_pending: true,
            summary_text: String::new(),
            url: Some(UrlMetadata {
                etag: None,
                fetch_status: FetchStatus::Success,
                last_fetched_at: format_rfc3339(now),
                last_modified: None,
                next_check_at: format_rfc3339(now + self.refresh_interval),
                url: source_id.to_string(),
            }),
        })
    }

    async fn refresh(&self, cache: &mut CacheState, now: DateTime<Utc>) -> bool {
        let eligible: Vec<(String, Option<String>, Option<String>)> = cache
            .sources
            .iter()
            .filter(|(_, record)| record.source_type == SourceType::Url)
            .filter(|(_, record)| Self::is_eligible(record, now))
            .map(|(source_id, record)| {
                let url_meta = record.url.as_ref();
                (
                    source_id.clone(),
                    url_meta.and_then(|meta| meta.etag.clone()),
                    url_meta.and_then(|meta| meta.last_modified.clone()),
                )
            })
            .collect();

        if eligible.is_empty() {
            tracing::debug!("no eligible urls to refresh");
            return false;
        }
        tracing::debug!(eligible = eligible.len(), "refreshing urls");

        // Probe concurrently (bounded by the download semaphore), apply
        // mutations as each probe lands.
        let mut probes: FuturesUnordered<_> = eligible
            .into_iter()
            .map(|(source_id, etag, last_modified)| async move {
                let outcome = self.probe(&source_id, etag, last_modified).await;
                (source_id, outcome)
            })
            .collect();

        let mut changed = false;
        while let Some((source_id, outcome)) = probes.next().await {
            changed |= self.apply_probe(cache, &source_id, outcome, now);
        }
        changed
    }

    async fn load_text(&self, source_id: &str) -> Option<String> {
        self.extractor.cached(source_id).await
    }
}
