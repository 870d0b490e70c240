//! Answer validation against gathered evidence
//!
//! A model judges whether the final answer is supported and may propose
//! a correction. Without a usable judgement the answer passes with a
//! moderate confidence.

use crate::llm::{extract_json, LanguageModel};
use crate::models::{Answers, Validation, Verdict};
use crate::prompts;
use crate::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Confidence reported when no judgement was made
pub const FALLBACK_CONFIDENCE: f64 = 0.5;

pub struct Validator {
    model: Arc<dyn LanguageModel>,
}

impl Validator {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    pub async fn validate(
        &self,
        query: &str,
        final_answer: &str,
        answers: &Answers,
        retrieved: &BTreeMap<String, Vec<String>>,
    ) -> Validation {
        if !self.model.is_available() {
            return fallback("no generative backend configured; validation skipped");
        }

        let prompt = prompts::validator(query, final_answer, answers, retrieved);
        let validation = match self.model.complete(&prompt).await {
            Ok(reply) => parse_validation(&reply),
            Err(e) => Err(e),
        };

        match validation {
            Ok(validation) => {
                info!(
                    verdict = %validation.verdict,
                    confidence = validation.confidence,
                    "Validation completed"
                );
                validation
            }
            Err(e) => {
                warn!(error = %e, "Validation failed, passing answer through");
                fallback(&format!("validator unavailable ({}); answer not checked", e))
            }
        }
    }
}

fn fallback(note: &str) -> Validation {
    Validation {
        verdict: Verdict::Pass,
        corrected: String::new(),
        confidence: FALLBACK_CONFIDENCE,
        rationale: note.to_string(),
    }
}

fn parse_validation(reply: &str) -> Result<Validation> {
    let json = extract_json(reply)?;

    let verdict = json
        .get("verdict")
        .and_then(Value::as_str)
        .map(Verdict::normalize)
        .unwrap_or(Verdict::Pass);

    let corrected = match json.get("corrected") {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };

    let confidence = json
        .get("confidence")
        .and_then(|v| v.as_f64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok())))
        .map(|c| c.clamp(0.0, 1.0))
        .unwrap_or(FALLBACK_CONFIDENCE);

    let rationale = json
        .get("rationale")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(Validation {
        verdict,
        corrected,
        confidence,
        rationale,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::null_model;
    use crate::testing::ScriptedModel;

    async fn run(model: Arc<dyn LanguageModel>) -> Validation {
        Validator::new(model)
            .validate("q", "final", &Answers::new(), &BTreeMap::new())
            .await
    }

    #[tokio::test]
    async fn test_passes_without_backend() {
        let validation = run(null_model()).await;
        assert_eq!(validation.verdict, Verdict::Pass);
        assert_eq!(validation.confidence, FALLBACK_CONFIDENCE);
        assert!(!validation.rationale.is_empty());
    }

    #[tokio::test]
    async fn test_fail_with_correction() {
        let reply = r#"{"verdict": "fail", "corrected": "X", "confidence": 0.9, "rationale": "wrong year"}"#;
        let validation = run(Arc::new(ScriptedModel::new().reply("proposed answer", reply))).await;

        assert_eq!(validation.verdict, Verdict::Fail);
        assert_eq!(validation.correction(), Some("X"));
        assert_eq!(validation.confidence, 0.9);
    }

    #[tokio::test]
    async fn test_unknown_verdict_normalized_to_pass() {
        let reply = r#"{"verdict": "maybe", "corrected": "Y", "confidence": "7"}"#;
        let validation = run(Arc::new(ScriptedModel::new().reply("proposed answer", reply))).await;

        assert_eq!(validation.verdict, Verdict::Pass);
        assert!(validation.correction().is_none());
        assert_eq!(validation.confidence, 1.0);
    }

    #[tokio::test]
    async fn test_malformed_reply_passes() {
        let validation = run(Arc::new(ScriptedModel::new().reply("proposed answer", "looks fine"))).await;
        assert_eq!(validation.verdict, Verdict::Pass);
        assert!(validation.rationale.contains("not checked"));
    }
}
