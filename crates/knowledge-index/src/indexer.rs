//! The indexing orchestrator: discover, reconcile, refresh, summarize,
//! and persist, one cycle at a time under a single writer lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use tokio::sync::{Mutex, Semaphore};

use crate::cache::record::{CacheState, SourceType};
use crate::cache::store::CacheStore;
use crate::config::IndexSettings;
use crate::error::{IndexError, IndexResult};
use crate::fetch::{ContentExtractor, WebFetcher};
use crate::index::IndexWriter;
use crate::provider::{FileSourceProvider, SourceProvider, UrlLinksProvider};
use crate::summarize::{compose_system_prompt, Summarizer};
use crate::util::text::normalize_text;
use crate::util::time::{format_rfc3339, utc_now};

pub mod runtime;

pub use runtime::RuntimeRefresher;

/// Maps each discovered source id to the index of its owning provider.
type OwnerMap = HashMap<String, usize>;

/// Owns the cache, the index artifact, and the providers. All progress
/// happens through [`run_once`](Self::run_once); cycles are serialized by
/// an internal writer lock, so concurrent callers queue up rather than
/// interleave.
pub struct KnowledgeIndexer {
    store: CacheStore,
    writer: IndexWriter,
    system_prompt: String,
    summarizer: Arc<dyn Summarizer>,
    providers: Vec<Box<dyn SourceProvider>>,
    summary_semaphore: Arc<Semaphore>,
    writer_lock: Mutex<()>,
}

impl KnowledgeIndexer {
    pub fn new(
        settings: &IndexSettings,
        providers: Vec<Box<dyn SourceProvider>>,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        KnowledgeIndexer {
            store: CacheStore::new(settings.index_cache_path.clone()),
            writer: IndexWriter::new(
                settings.index_path.clone(),
                settings.index_prefix.clone(),
                settings.source_type_order.clone(),
            ),
            system_prompt: compose_system_prompt(
                &settings.base_summarization_prompt,
                &settings.project_introduction,
            ),
            summarizer,
            providers,
            summary_semaphore: Arc::new(Semaphore::new(settings.summary_permits())),
            writer_lock: Mutex::new(()),
        }
    }

    /// Standard wiring: the file provider over `sources_dir` and the URL
    /// provider over the links file, sharing the production web fetcher.
    pub fn from_settings(settings: &IndexSettings, summarizer: Arc<dyn Summarizer>) -> Self {
        let extractor: Arc<dyn ContentExtractor> = Arc::new(WebFetcher::new(settings));
        let providers: Vec<Box<dyn SourceProvider>> = vec![
            Box::new(FileSourceProvider::new(settings.sources_dir.clone())),
            Box::new(UrlLinksProvider::new(settings, extractor)),
        ];
        Self::new(settings, providers, summarizer)
    }

    /// Run one full cycle. Transient source failures are absorbed (the
    /// affected record retries next cycle); only persistence failures and
    /// provider wiring bugs surface as errors.
    pub async fn run_once(&self) -> IndexResult<()> {
        let _guard = self.writer_lock.lock().await;
        self.run_once_locked().await
    }

    /// A source changed out of band. The id is advisory: a full cycle
    /// subsumes any targeted refresh.
    pub async fn notify_changed(&self, source_id: &str) -> IndexResult<()> {
        tracing::debug!(source_id, "change notification");
        self.run_once().await
    }

    async fn run_once_locked(&self) -> IndexResult<()> {
        let run_started = Instant::now();
        let now = utc_now();

        tracing::info!("index stage 1/4: load cache");
        let mut cache = self.store.load(now).await;
        tracing::debug!(sources = cache.sources.len(), "cache loaded");

        tracing::info!("index stage 2/4: discover sources");
        let stage_started = Instant::now();
        let (discovered, owner) = self.discover_sources(now).await?;
        tracing::info!(
            sources = discovered.len(),
            elapsed_ms = stage_started.elapsed().as_millis() as u64,
            "discover completed"
        );

        tracing::info!("index stage 3/4: reconcile and refresh providers");
        let stage_started = Instant::now();
        let mut changed = self.reconcile(&mut cache, &discovered, &owner, now).await;
        for (position, provider) in self.providers.iter().enumerate() {
            tracing::info!(
                provider = provider.name(),
                position = position + 1,
                total = self.providers.len(),
                "provider refresh"
            );
            if provider.refresh(&mut cache, now).await {
                changed = true;
            }
        }
        if changed {
            self.persist(&mut cache, now).await?;
        }
        tracing::info!(
            changed,
            elapsed_ms = stage_started.elapsed().as_millis() as u64,
            "reconcile and refresh completed"
        );

        tracing::info!("index stage 4/4: summarize pending sources");
        self.summarize_pending(&mut cache, &owner, now).await;
        tracing::info!(
            elapsed_ms = run_started.elapsed().as_millis() as u64,
            "index run completed"
        );
        Ok(())
    }

    async fn discover_sources(
        &self,
        now: DateTime<Utc>,
    ) -> IndexResult<(BTreeMap<String, SourceType>, OwnerMap)> {
        let mut combined = BTreeMap::new();
        let mut owner = OwnerMap::new();
        for (index, provider) in self.providers.iter().enumerate() {
            for (source_id, source_type) in provider.discover(now).await {
                if combined.contains_key(&source_id) {
                    return Err(IndexError::DuplicateSource(source_id));
                }
                combined.insert(source_id.clone(), source_type);
                owner.insert(source_id, index);
            }
        }
        Ok((combined, owner))
    }

    /// Drop records for sources no longer discovered; initialize records
    /// for new sources (and for ids whose type changed families).
    async fn reconcile(
        &self,
        cache: &mut CacheState,
        discovered: &BTreeMap<String, SourceType>,
        owner: &OwnerMap,
        now: DateTime<Utc>,
    ) -> bool {
        let mut changed = false;

        let stale: Vec<String> = cache
            .sources
            .keys()
            .filter(|source_id| !discovered.contains_key(*source_id))
            .cloned()
            .collect();
        for source_id in stale {
            tracing::info!(source_id, "source no longer discovered; removing");
            cache.sources.remove(&source_id);
            changed = true;
        }

        let init_candidates: Vec<(String, SourceType, usize)> = discovered
            .iter()
            .filter(|(source_id, source_type)| {
                cache
                    .sources
                    .get(*source_id)
                    .is_none_or(|record| record.source_type != **source_type)
            })
            .filter_map(|(source_id, source_type)| {
                owner
                    .get(source_id)
                    .map(|&index| (source_id.clone(), *source_type, index))
            })
            .collect();

        if !init_candidates.is_empty() {
            tracing::info!(pending = init_candidates.len(), "initializing new sources");
        }
        let total = init_candidates.len();
        for (position, (source_id, source_type, provider_index)) in
            init_candidates.into_iter().enumerate()
        {
            let provider = &self.providers[provider_index];
            tracing::info!(
                source_id,
                source_type = %source_type,
                provider = provider.name(),
                position = position + 1,
                total,
                "init source"
            );
            let started = Instant::now();
            match provider.init_record(&source_id, now).await {
                Some(record) => {
                    cache.sources.insert(source_id, record);
                    changed = true;
                }
                None => {
                    tracing::warn!(
                        source_id,
                        provider = provider.name(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "source init declined; retrying next cycle"
                    );
                }
            }
        }
        changed
    }

    /// Summarize every pending record with a known owner, committing and
    /// persisting each result as it lands.
    async fn summarize_pending(
        &self,
        cache: &mut CacheState,
        owner: &OwnerMap,
        now: DateTime<Utc>,
    ) {
        let pending: Vec<(String, usize)> = cache
            .sources
            .iter()
            .filter(|(_, record)| record.summary_pending)
            .filter_map(|(source_id, _)| {
                owner.get(source_id).map(|&index| (source_id.clone(), index))
            })
            .collect();

        if pending.is_empty() {
            tracing::info!(pending = 0, "no summaries pending");
            return;
        }
        tracing::info!(
            pending = pending.len(),
            concurrency = self.summary_semaphore.available_permits(),
            "summarizing pending sources"
        );

        let mut jobs: FuturesUnordered<_> = pending
            .into_iter()
            .map(|(source_id, provider_index)| async move {
                let summary = self.summarize_one(&source_id, provider_index).await;
                (source_id, summary)
            })
            .collect();

        // Summaries run concurrently; commits apply here, one at a time,
        // after re-checking that the record still wants one.
        while let Some((source_id, summary)) = jobs.next().await {
            let Some(summary) = summary else {
                continue;
            };
            let committed = match cache.sources.get_mut(&source_id) {
                Some(record) if record.summary_pending => {
                    record.summary_text = summary;
                    record.last_indexed_at = format_rfc3339(now);
                    record.summary_pending = false;
                    true
                }
                _ => false,
            };
            if committed {
                tracing::info!(source_id, "summary saved");
                if let Err(error) = self.persist(cache, now).await {
                    // The on-disk record stays pending, so the summary is
                    // recomputed after a restart rather than lost.
                    tracing::error!(source_id, %error, "failed to persist after summary commit");
                }
            }
        }
    }

    async fn summarize_one(&self, source_id: &str, provider_index: usize) -> Option<String> {
        let Ok(_permit) = self.summary_semaphore.acquire().await else {
            return None;
        };
        let provider = &self.providers[provider_index];
        let text = normalize_text(&provider.load_text(source_id).await?);
        if text.is_empty() {
            tracing::warn!(source_id, "empty source text; skipping summary");
            return None;
        }

        tracing::debug!(source_id, text_chars = text.len(), "invoking summarizer");
        let started = Instant::now();
        let result = self.summarizer.summarize(&self.system_prompt, &text).await;
        tracing::debug!(
            source_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "summarizer call finished"
        );

        match result {
            Ok(response) => {
                let summary = response.text.trim().to_string();
                if summary.is_empty() {
                    tracing::warn!(source_id, "summarizer returned empty text");
                    None
                } else {
                    Some(summary)
                }
            }
            Err(error) => {
                tracing::warn!(source_id, %error, "summarization failed");
                None
            }
        }
    }

    async fn persist(&self, cache: &mut CacheState, now: DateTime<Utc>) -> IndexResult<()> {
        cache.generated_at = format_rfc3339(now);
        self.store.save(cache).await?;
        self.writer.write(cache).await
    }
}
