//! Shared fixtures for integration tests.

// Not every test binary exercises every helper.
#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use knowledge_index::{IndexError, IndexResult, SummaryResponse, Summarizer};

/// Scripted summarizer: replies are consumed in order (the last one
/// repeats), every call is recorded.
pub struct MockSummarizer {
    replies: Vec<String>,
    calls: parking_lot::Mutex<Vec<(String, String)>>,
    fail: parking_lot::Mutex<bool>,
}

impl MockSummarizer {
    pub fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(MockSummarizer {
            replies: replies.iter().map(|reply| reply.to_string()).collect(),
            calls: parking_lot::Mutex::new(Vec::new()),
            fail: parking_lot::Mutex::new(false),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// The `(system_prompt, text)` pairs seen so far.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.fail.lock() = failing;
    }
}

#[async_trait]
impl Summarizer for MockSummarizer {
    async fn summarize(&self, system_prompt: &str, text: &str) -> IndexResult<SummaryResponse> {
        if *self.fail.lock() {
            return Err(IndexError::Summarizer("scripted failure".to_string()));
        }
        let position = {
            let mut calls = self.calls.lock();
            calls.push((system_prompt.to_string(), text.to_string()));
            calls.len() - 1
        };
        let reply = self
            .replies
            .get(position)
            .or_else(|| self.replies.last())
            .cloned()
            .unwrap_or_default();
        Ok(SummaryResponse { text: reply })
    }
}
