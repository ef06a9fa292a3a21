use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::indexer::KnowledgeIndexer;

/// Drives [`KnowledgeIndexer::run_once`] on a fixed tick in a background
/// task. Stop requests are honored between cycles; a cycle in flight
/// always runs to completion so its persist lands on disk.
pub struct RuntimeRefresher {
    indexer: Arc<KnowledgeIndexer>,
    tick: Duration,
    running: parking_lot::Mutex<Option<RunningLoop>>,
}

struct RunningLoop {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl RuntimeRefresher {
    pub fn new(indexer: Arc<KnowledgeIndexer>, tick: Duration) -> Self {
        RuntimeRefresher {
            indexer,
            tick,
            running: parking_lot::Mutex::new(None),
        }
    }

    /// Start the background loop. Calling start while the loop is alive
    /// is a no-op.
    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|current| !current.handle.is_finished()) {
            return;
        }

        let token = CancellationToken::new();
        let loop_token = token.clone();
        let indexer = self.indexer.clone();
        let tick = self.tick;
        let handle = tokio::spawn(async move {
            refresh_loop(indexer, tick, loop_token).await;
        });
        *running = Some(RunningLoop { token, handle });
        tracing::info!(tick_seconds = self.tick.as_secs(), "runtime refresh started");
    }

    /// Signal the loop to stop and wait for it to finish its current
    /// cycle. A no-op when the loop is not running.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        running.token.cancel();
        if let Err(error) = running.handle.await {
            tracing::error!(%error, "runtime refresh task terminated abnormally");
        }
        tracing::info!("runtime refresh stopped");
    }
}

async fn refresh_loop(indexer: Arc<KnowledgeIndexer>, tick: Duration, token: CancellationToken) {
    while !token.is_cancelled() {
        let started = Instant::now();
        if let Err(error) = indexer.run_once().await {
            tracing::error!(%error, "runtime refresh cycle failed");
        }
        let sleep = tick.saturating_sub(started.elapsed());
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(sleep) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::record::{CacheRecord, CacheState, SourceType};
    use crate::config::IndexSettings;
    use crate::error::IndexResult;
    use crate::provider::SourceProvider;
    use crate::summarize::{SummaryResponse, Summarizer};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// Provider that only counts discover calls; one count per cycle.
    struct CycleCounter {
        cycles: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SourceProvider for CycleCounter {
        fn name(&self) -> &'static str {
            "cycle-counter"
        }

        async fn discover(&self, _now: DateTime<Utc>) -> BTreeMap<String, SourceType> {
            self.cycles.fetch_add(1, Ordering::SeqCst);
            BTreeMap::new()
        }

        async fn init_record(&self, _source_id: &str, _now: DateTime<Utc>) -> Option<CacheRecord> {
            None
        }

        async fn refresh(&self, _cache: &mut CacheState, _now: DateTime<Utc>) -> bool {
            false
        }

        async fn load_text(&self, _source_id: &str) -> Option<String> {
            None
        }
    }

    struct NoopSummarizer;

    #[async_trait]
    impl Summarizer for NoopSummarizer {
        async fn summarize(&self, _system_prompt: &str, _text: &str) -> IndexResult<SummaryResponse> {
            Ok(SummaryResponse {
                text: "S".to_string(),
            })
        }
    }

    fn refresher(tick: Duration) -> (RuntimeRefresher, Arc<AtomicUsize>, tempfile::TempDir) {
        let dir = tempdir().expect("tempdir");
        let mut settings = IndexSettings::default();
        settings.index_cache_path = dir.path().join("cache.json");
        settings.index_path = dir.path().join("index.txt");

        let cycles = Arc::new(AtomicUsize::new(0));
        let indexer = Arc::new(KnowledgeIndexer::new(
            &settings,
            vec![Box::new(CycleCounter {
                cycles: cycles.clone(),
            })],
            Arc::new(NoopSummarizer),
        ));
        (RuntimeRefresher::new(indexer, tick), cycles, dir)
    }

    #[tokio::test]
    async fn runs_cycles_until_stopped() {
        let (refresher, cycles, _dir) = refresher(Duration::from_millis(20));
        refresher.start();

        tokio::time::sleep(Duration::from_millis(120)).await;
        refresher.stop().await;

        let seen = cycles.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected at least two cycles, saw {seen}");

        // After stop, no further cycles run.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cycles.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let (refresher, cycles, _dir) = refresher(Duration::from_millis(20));
        refresher.start();
        refresher.start();
        refresher.start();

        tokio::time::sleep(Duration::from_millis(50)).await;
        refresher.stop().await;

        // A duplicated loop would burn roughly twice the cycles.
        let seen = cycles.load(Ordering::SeqCst);
        assert!(seen <= 5, "duplicate loops detected: {seen} cycles");
    }

    #[tokio::test]
    async fn stop_without_start_is_a_noop() {
        let (refresher, _cycles, _dir) = refresher(Duration::from_millis(20));
        refresher.stop().await;
    }

    #[tokio::test]
    async fn restarts_after_stop() {
        let (refresher, cycles, _dir) = refresher(Duration::from_millis(20));
        refresher.start();
        tokio::time::sleep(Duration::from_millis(30)).await;
        refresher.stop().await;

        let after_first = cycles.load(Ordering::SeqCst);
        refresher.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        refresher.stop().await;

        assert!(cycles.load(Ordering::SeqCst) > after_first);
    }
}
