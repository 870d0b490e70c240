//! Final answer synthesis

use crate::llm::LanguageModel;
use crate::models::Answers;
use crate::prompts::{self, id_lines};
use std::sync::Arc;
use tracing::warn;

/// Final answer when no node was answered
pub const NO_ANSWER: &str = "No answer.";

pub struct Aggregator {
    model: Arc<dyn LanguageModel>,
}

impl Aggregator {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    pub async fn aggregate(&self, query: &str, answers: &Answers) -> String {
        if answers.is_empty() {
            return NO_ANSWER.to_string();
        }
        if !self.model.is_available() {
            return summary(query, answers);
        }

        match self.model.complete(&prompts::aggregator(query, answers)).await {
            Ok(reply) if !reply.trim().is_empty() => reply.trim().to_string(),
            Ok(_) => summary(query, answers),
            Err(e) => {
                warn!(error = %e, "Aggregation failed, using summary");
                summary(query, answers)
            }
        }
    }
}

/// The question followed by every `id: answer` line
pub fn summary(query: &str, answers: &Answers) -> String {
    format!("{}\n\nSummary:\n{}", query, id_lines(answers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::null_model;
    use crate::testing::ScriptedModel;

    fn answers() -> Answers {
        let mut answers = Answers::new();
        answers.insert("3.1".into(), "20 (25.00%)".into());
        answers.insert("1.1".into(), "Acme, 2020".into());
        answers
    }

    #[tokio::test]
    async fn test_empty_answers_sentinel() {
        let aggregator = Aggregator::new(Arc::new(ScriptedModel::new().reply("solved", "x")));
        assert_eq!(aggregator.aggregate("q", &Answers::new()).await, NO_ANSWER);
    }

    #[tokio::test]
    async fn test_deterministic_summary() {
        let aggregator = Aggregator::new(null_model());
        assert_eq!(
            aggregator.aggregate("What changed?", &answers()).await,
            "What changed?\n\nSummary:\n1.1: Acme, 2020\n3.1: 20 (25.00%)"
        );
    }

    #[tokio::test]
    async fn test_backend_synthesis() {
        let aggregator = Aggregator::new(Arc::new(
            ScriptedModel::new().reply("solved subqueries", " Revenue rose 20 (25.00%). "),
        ));
        assert_eq!(
            aggregator.aggregate("What changed?", &answers()).await,
            "Revenue rose 20 (25.00%)."
        );
    }
}
