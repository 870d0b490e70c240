//! Reference and ellipsis resolution for follow-up questions

use super::is_slot_key;
use crate::error::OrchestrationError;
use crate::llm::{extract_json, LanguageModel};
use crate::models::MemorySlots;
use crate::prompts;
use crate::Result;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct MemoryResolver {
    model: Arc<dyn LanguageModel>,
}

impl MemoryResolver {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Rewritten query plus slot updates. A no-op without a backend or
    /// when the reply cannot be used.
    pub async fn resolve(&self, query: &str, memory: &MemorySlots) -> (String, MemorySlots) {
        if !self.model.is_available() {
            return (query.to_string(), MemorySlots::new());
        }

        match self.try_resolve(query, memory).await {
            Ok((rewritten, updates)) => {
                debug!(updates = updates.len(), "Query resolved against memory");
                (rewritten, updates)
            }
            Err(e) => {
                warn!(error = %e, "Resolver failed, keeping question as asked");
                (query.to_string(), MemorySlots::new())
            }
        }
    }

    async fn try_resolve(&self, query: &str, memory: &MemorySlots) -> Result<(String, MemorySlots)> {
        let response = self.model.complete(&prompts::resolver(query, memory)).await?;
        let json = extract_json(&response)?;
        if !json.is_object() {
            return Err(OrchestrationError::MalformedResponse(
                "resolver reply is not an object".to_string(),
            ));
        }

        let rewritten = json
            .get("rewritten")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(query)
            .to_string();

        let updates = json
            .get("memory_updates")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter(|(key, _)| is_slot_key(key))
                    .filter_map(|(key, value)| {
                        let value = value.as_str()?.trim();
                        (!value.is_empty()).then(|| (key.clone(), value.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok((rewritten, updates))
    }
}
