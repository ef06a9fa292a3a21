//! Web content extraction with a per-URL body cache.

use std::path::PathBuf;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::config::IndexSettings;
use crate::util::fs::atomic_write;

const MAX_RESPONSE_BYTES: usize = 5 * 1024 * 1024; // 5 MB
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// External collaborator that maps a URL to extracted body text and keeps
/// its own cache of previously extracted bodies.
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    /// Fetch and extract a URL's body. With `force_refresh = false` a
    /// cached body is served without touching the network. `None` means
    /// the body could not be obtained (or was empty).
    async fn fetch(&self, url: &str, force_refresh: bool) -> Option<String>;

    /// The last extracted body, if any. Never fetches.
    async fn cached(&self, url: &str) -> Option<String>;
}

/// Production extractor: plain GET, HTML converted to text, extracted
/// bodies cached on disk keyed by the sha256 of the URL.
pub struct WebFetcher {
    client: reqwest::Client,
    cache_dir: PathBuf,
}

impl WebFetcher {
    pub fn new(settings: &IndexSettings) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(settings.web_fetch_timeout())
            .build()
            .unwrap_or_default();
        WebFetcher {
            client,
            cache_dir: settings.web_fetch_cache_dir.clone(),
        }
    }

    fn cache_path(&self, url: &str) -> PathBuf {
        let mut sha = Sha256::new();
        sha.update(url.as_bytes());
        self.cache_dir.join(format!("{:x}.txt", sha.finalize()))
    }

    async fn read_cache(&self, url: &str) -> Option<String> {
        let text = tokio::fs::read_to_string(self.cache_path(url)).await.ok()?;
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }

    async fn write_cache(&self, url: &str, text: &str) {
        let path = self.cache_path(url);
        if let Err(error) = atomic_write(&path, text.as_bytes()).await {
            tracing::warn!(url, %error, "failed to write web cache entry");
        }
    }

    async fn download(&self, url: &str) -> Option<String> {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(url, %error, "web fetch failed");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(url, status = status.as_u16(), "web fetch returned non-success status");
            return None;
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string();

        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::warn!(url, %error, "failed to read web fetch body");
                return None;
            }
        };
        if bytes.len() > MAX_RESPONSE_BYTES {
            tracing::warn!(url, bytes = bytes.len(), "web fetch response too large");
            return None;
        }

        extract_text(&content_type, &bytes)
    }
}

/// Convert a response body to text: HTML is rendered down, anything else
/// must already be valid UTF-8.
fn extract_text(content_type: &str, bytes: &[u8]) -> Option<String> {
    let text = if content_type.contains("html") {
        html2text::from_read(bytes, 80).ok()?
    } else {
        String::from_utf8(bytes.to_vec()).ok()?
    };
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

#[async_trait]
impl ContentExtractor for WebFetcher {
    async fn fetch(&self, url: &str, force_refresh: bool) -> Option<String> {
        if !force_refresh {
            if let Some(text) = self.read_cache(url).await {
                return Some(text);
            }
        }
        let text = self.download(url).await?;
        self.write_cache(url, &text).await;
        Some(text)
    }

    async fn cached(&self, url: &str) -> Option<String> {
        self.read_cache(url).await
    }
}
