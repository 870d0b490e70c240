//! Planner trait and implementations
//!
//! A planner turns a question into a `PlanGraph` of atomic subqueries.
//! Planning never fails: the generative planner falls back to the
//! heuristic one on any error.

use async_trait::async_trait;

pub mod generative;
pub mod graph;
pub mod heuristic;

pub use generative::GenerativePlanner;
pub use graph::PlanGraph;
pub use heuristic::HeuristicPlanner;

/// Trait for plan generation
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, question: &str) -> PlanGraph;
}
