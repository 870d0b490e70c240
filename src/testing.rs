//! Test doubles shared by unit tests

use crate::error::OrchestrationError;
use crate::llm::{LanguageModel, Prompt};
use crate::models::ScoredChunk;
use crate::retrieval::EvidenceRetriever;
use crate::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Replies with the first rule whose needle occurs in the prompt
/// (case-insensitive); errors when no rule matches.
#[derive(Default)]
pub(crate) struct ScriptedModel {
    rules: Vec<(String, String)>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reply(mut self, needle: &str, reply: &str) -> Self {
        self.rules.push((needle.to_lowercase(), reply.to_string()));
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight counter even when the call is cancelled
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let haystack = format!("{}\n{}", prompt.system, prompt.user).to_lowercase();
        self.rules
            .iter()
            .find(|(needle, _)| haystack.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone())
            .ok_or_else(|| OrchestrationError::LlmError("no scripted reply".to_string()))
    }
}

/// Returns the same chunks for every non-blank query
pub(crate) struct StaticRetriever {
    chunks: Vec<String>,
}

impl StaticRetriever {
    pub(crate) fn new(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
        }
    }
}

#[async_trait]
impl EvidenceRetriever for StaticRetriever {
    async fn query(&self, q: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        if q.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .chunks
            .iter()
            .take(k)
            .enumerate()
            .map(|(rank, text)| ScoredChunk {
                text: text.clone(),
                score: 1.0 / (rank + 1) as f64,
            })
            .collect())
    }
}
