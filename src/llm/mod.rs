//! Generative backend capability
//!
//! Components receive an `Arc<dyn LanguageModel>` at construction. The
//! `NullModel` stands in when no backend is configured, and every caller
//! has a deterministic path for that case.

use crate::error::OrchestrationError;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub mod json;

pub use json::extract_json;

/// Role-tagged prompt: system instructions plus user content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

/// Trait for text generation backends
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// False selects the deterministic fallback in every component
    fn is_available(&self) -> bool {
        true
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String>;
}

/// Backend used when no credentials are configured
pub struct NullModel;

#[async_trait]
impl LanguageModel for NullModel {
    fn is_available(&self) -> bool {
        false
    }

    async fn complete(&self, _prompt: &Prompt) -> Result<String> {
        Err(OrchestrationError::BackendUnavailable)
    }
}

pub fn null_model() -> Arc<dyn LanguageModel> {
    Arc::new(NullModel)
}
