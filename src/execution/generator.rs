//! Per-node answer generation

use super::timeout_error;
use crate::llm::LanguageModel;
use crate::models::Answers;
use crate::prompts;
use crate::Result;
use std::sync::Arc;
use std::time::Duration;

/// Characters kept from the top snippet by the extractive fallback
const EXTRACTIVE_MAX_CHARS: usize = 300;

pub struct NodeGenerator {
    model: Arc<dyn LanguageModel>,
    timeout: Option<Duration>,
}

impl NodeGenerator {
    pub fn new(model: Arc<dyn LanguageModel>, timeout: Option<Duration>) -> Self {
        Self { model, timeout }
    }

    /// Answer one subquery.
    ///
    /// Without a backend the answer is extractive and never fails. With a
    /// backend, a failed or timed-out call is an `Err`.
    pub async fn answer(&self, subquery: &str, parents: &Answers, snippets: &[String]) -> Result<String> {
        if !self.model.is_available() {
            return Ok(extractive_answer(snippets));
        }

        let prompt = prompts::generator(subquery, parents, snippets);
        let reply = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.model.complete(&prompt))
                .await
                .map_err(|_| timeout_error(limit))??,
            None => self.model.complete(&prompt).await?,
        };

        Ok(reply.trim().to_string())
    }
}

/// First line of the best snippet, or `"N/A"`
pub fn extractive_answer(snippets: &[String]) -> String {
    match snippets.first() {
        Some(top) => top
            .split('\n')
            .next()
            .unwrap_or_default()
            .chars()
            .take(EXTRACTIVE_MAX_CHARS)
            .collect(),
        None => "N/A".to_string(),
    }
}
