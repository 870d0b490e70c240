//! Runtime settings
//!
//! Loaded once by each binary and handed to constructors explicitly.
//! Nothing below the binaries reads the process environment.

use crate::error::OrchestrationError;
use crate::Result;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_GEN_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_EMBED_MODEL: &str = "text-embedding-004";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_DATASET_PATH: &str = "convfinqa_dataset.json";
pub const DEFAULT_TOP_K: usize = 6;
pub const DEFAULT_MAX_WORKERS: usize = 4;
pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Clone)]
pub struct Settings {
    /// Empty or unset means "no generative backend"
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: String,
    pub gen_model: String,
    pub embed_model: String,
    pub dataset_path: String,
    pub top_k: usize,
    pub max_workers: usize,
    pub node_timeout: Option<Duration>,
    pub port: u16,
    pub database_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            gen_model: DEFAULT_GEN_MODEL.to_string(),
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            dataset_path: DEFAULT_DATASET_PATH.to_string(),
            top_k: DEFAULT_TOP_K,
            max_workers: DEFAULT_MAX_WORKERS,
            node_timeout: None,
            port: DEFAULT_PORT,
            database_url: None,
        }
    }
}

impl Settings {
    /// Read `.env` (if present) and then the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let node_timeout = non_empty("NODE_TIMEOUT_SECS")
            .map(|raw| parse_value::<u64>("NODE_TIMEOUT_SECS", &raw))
            .transpose()?
            .map(Duration::from_secs);

        let port = match non_empty("PORT").or_else(|| non_empty("API_PORT")) {
            Some(raw) => parse_value::<u16>("PORT", &raw)?,
            None => defaults.port,
        };

        Ok(Self {
            gemini_api_key: non_empty("GEMINI_API_KEY"),
            gemini_base_url: non_empty("GEMINI_BASE_URL")
                .unwrap_or(defaults.gemini_base_url),
            gen_model: non_empty("GEN_MODEL").unwrap_or(defaults.gen_model),
            embed_model: non_empty("EMBED_MODEL").unwrap_or(defaults.embed_model),
            dataset_path: non_empty("DATASET_PATH").unwrap_or(defaults.dataset_path),
            top_k: non_empty("TOP_K")
                .map(|raw| parse_value::<usize>("TOP_K", &raw))
                .transpose()?
                .unwrap_or(defaults.top_k),
            max_workers: non_empty("MAX_WORKERS")
                .map(|raw| parse_value::<usize>("MAX_WORKERS", &raw))
                .transpose()?
                .unwrap_or(defaults.max_workers),
            node_timeout,
            port,
            database_url: non_empty("DATABASE_URL").or_else(|| non_empty("POSTGRES_URL")),
        })
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse::<T>().map_err(|_| {
        OrchestrationError::ConfigError(format!("{} has an invalid value: {:?}", key, raw))
    })
}
