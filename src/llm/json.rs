//! Lenient extraction of structured data from model replies
//!
//! Strategies run in order; the first that yields JSON wins.

use crate::error::OrchestrationError;
use crate::Result;
use serde_json::Value;
use tracing::debug;

type Strategy = fn(&str) -> Option<Value>;

const STRATEGIES: &[(&str, Strategy)] = &[
    ("direct", parse_direct),
    ("fenced", parse_fenced),
    ("braces", parse_braces),
];

/// Extract a JSON value from free-form model output.
pub fn extract_json(raw: &str) -> Result<Value> {
    for (name, strategy) in STRATEGIES {
        if let Some(value) = strategy(raw) {
            debug!(strategy = name, "Structured response parsed");
            return Ok(value);
        }
    }

    let preview: String = raw.chars().take(200).collect();
    Err(OrchestrationError::MalformedResponse(format!(
        "no JSON found by {} strategies | raw={}",
        STRATEGIES.len(),
        preview
    )))
}

fn parse_direct(raw: &str) -> Option<Value> {
    serde_json::from_str(raw.trim()).ok()
}

/// First ``` fenced block, with or without a language tag
fn parse_fenced(raw: &str) -> Option<Value> {
    let start = raw.find("```")?;
    let after_fence = &raw[start + 3..];
    let body_start = after_fence.find('\n').unwrap_or(0);
    let tag = after_fence[..body_start].trim();
    // A tag is a single word like `json`; anything else is already content
    let body = if tag.chars().all(|c| c.is_ascii_alphanumeric()) {
        &after_fence[body_start..]
    } else {
        after_fence
    };
    let end = body.find("```")?;
    serde_json::from_str(body[..end].trim()).ok()
}

/// Largest `{ ... }` span in the text
fn parse_braces(raw: &str) -> Option<Value> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&raw[start..=end]).ok()
}
