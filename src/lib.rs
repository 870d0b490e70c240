//! FinQA PlanRAG
//!
//! Answers multi-turn financial questions over one filing excerpt
//! (narrative text plus a table):
//! - Decomposes a question into a DAG of atomic subqueries
//! - Retrieves evidence per subquery with hybrid dense + BM25 search
//! - Solves each depth of the DAG concurrently on a bounded worker pool
//! - Computes period-over-period changes deterministically
//! - Synthesizes and validates the final answer
//! - Carries conversational memory between turns
//!
//! TURN PIPELINE:
//! RESOLVE → PLAN → EXECUTE (depth by depth) → COMPUTE → AGGREGATE → VALIDATE
//!
//! Every model-backed step has a deterministic fallback, so the whole
//! pipeline runs without credentials.

pub mod agent;
pub mod aggregation;
pub mod api;
pub mod config;
pub mod dataset;
pub mod embeddings;
pub mod error;
pub mod execution;
pub mod gemini;
pub mod llm;
pub mod memory;
pub mod models;
pub mod numeric;
pub mod planner;
pub mod prompts;
pub mod retrieval;
pub mod verification;

#[cfg(test)]
pub(crate) mod testing;

pub use error::Result;

// Re-export common types
pub use models::*;
