//! Seam to the external summarizer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IndexResult;

/// Structured summarizer output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryResponse {
    pub text: String,
}

/// External collaborator that turns source text into a short summary.
///
/// Implementations are expected to be expensive and fallible; any error is
/// treated as transient and the source is retried on a later cycle.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, system_prompt: &str, text: &str) -> IndexResult<SummaryResponse>;
}

/// Compose the summarization system prompt from the base prompt and the
/// optional project introduction, skipping empty parts.
pub fn compose_system_prompt(base_prompt: &str, project_introduction: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    let base = base_prompt.trim();
    if !base.is_empty() {
        parts.push(base.to_string());
    }
    let intro = project_introduction.trim();
    if !intro.is_empty() {
        parts.push(format!("Project introduction:\n{intro}"));
    }
    parts.join("\n\n")
}
