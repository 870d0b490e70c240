//! Plan execution engine
//!
//! Runs a `PlanGraph` depth by depth. Each batch is the ready set at its
//! minimum depth; same-depth nodes are solved concurrently on a bounded
//! worker pool and merged by node id once they complete. Failures never
//! abort a turn: a node that cannot be answered records an empty answer.

use crate::config::Settings;
use crate::llm::LanguageModel;
use crate::memory::enrich_from_grounding;
use crate::models::{Answers, ExecutionState, NodeKind, PlanNode};
use crate::numeric::change_between;
use crate::planner::PlanGraph;
use crate::retrieval::EvidenceRetriever;
use crate::error::OrchestrationError;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub mod generator;

pub use generator::NodeGenerator;

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Evidence snippets retrieved per node
    pub top_k: usize,
    /// Upper bound on concurrently solved nodes; 1 means sequential
    pub max_workers: usize,
    /// Bound on each node's generation call
    pub node_timeout: Option<Duration>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            top_k: crate::config::DEFAULT_TOP_K,
            max_workers: crate::config::DEFAULT_MAX_WORKERS,
            node_timeout: None,
        }
    }
}

impl ExecutionConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            top_k: settings.top_k,
            max_workers: settings.max_workers,
            node_timeout: settings.node_timeout,
        }
    }
}

/// What solving one node produced
#[derive(Debug)]
struct NodeOutcome {
    id: String,
    kind: NodeKind,
    snippets: Vec<String>,
    answer: String,
    failure: Option<String>,
}

pub struct ExecutionEngine {
    retriever: Arc<dyn EvidenceRetriever>,
    generator: Arc<NodeGenerator>,
    config: ExecutionConfig,
}

impl ExecutionEngine {
    pub fn new(
        retriever: Arc<dyn EvidenceRetriever>,
        model: Arc<dyn LanguageModel>,
        config: ExecutionConfig,
    ) -> Self {
        let generator = Arc::new(NodeGenerator::new(model, config.node_timeout));
        Self {
            retriever,
            generator,
            config,
        }
    }

    /// Solve every reachable node of `graph` into `state`.
    ///
    /// Stops when nothing is ready, which covers both completion and a
    /// stalled graph; whatever was answered stands.
    pub async fn execute(&self, graph: &PlanGraph, state: &mut ExecutionState) {
        loop {
            let answered: HashSet<String> = state.answers.keys().cloned().collect();
            let ready = graph.ready(&answered);

            let Some(current_depth) = ready.iter().map(|n| n.depth).min() else {
                break;
            };

            let batch: Vec<PlanNode> = ready
                .into_iter()
                .filter(|n| n.depth == current_depth)
                .cloned()
                .collect();

            debug!(depth = current_depth, nodes = batch.len(), "Executing batch");
            state.log(format!(
                "Batch: depth {} with {} node(s)",
                current_depth,
                batch.len()
            ));

            let outcomes = if batch.len() > 1 && self.config.max_workers > 1 {
                self.solve_concurrently(&batch, &state.answers).await
            } else {
                self.solve_sequentially(&batch, &state.answers).await
            };

            for outcome in outcomes {
                self.record(outcome, state);
            }

            // A worker that panicked leaves no outcome; close the node so
            // the loop cannot spin on it.
            for node in &batch {
                if !state.answers.contains_key(&node.id) {
                    warn!(node_id = %node.id, "Node produced no outcome");
                    state.log(format!("Node {} produced no outcome", node.id));
                    state.answers.insert(node.id.clone(), String::new());
                    state.retrieved.entry(node.id.clone()).or_default();
                }
            }
        }

        if !state.is_complete() {
            let missing: Vec<&str> = graph
                .nodes()
                .filter(|n| !state.answers.contains_key(&n.id))
                .map(|n| n.id.as_str())
                .collect();
            if !missing.is_empty() {
                warn!(?missing, "Plan stalled with unanswered nodes");
                state.log(format!("Stalled: unanswered nodes {}", missing.join(", ")));
            }
        }
    }

    async fn solve_sequentially(&self, batch: &[PlanNode], answers: &Answers) -> Vec<NodeOutcome> {
        let mut outcomes = Vec::with_capacity(batch.len());
        for node in batch {
            outcomes.push(
                solve(
                    node.clone(),
                    parent_answers(node, answers),
                    self.retriever.clone(),
                    self.generator.clone(),
                    self.config.top_k,
                )
                .await,
            );
        }
        outcomes
    }

    async fn solve_concurrently(&self, batch: &[PlanNode], answers: &Answers) -> Vec<NodeOutcome> {
        let permits = Arc::new(Semaphore::new(self.config.max_workers));
        let mut tasks = JoinSet::new();

        for node in batch {
            let parents = parent_answers(node, answers);
            let node = node.clone();
            let permits = permits.clone();
            let retriever = self.retriever.clone();
            let generator = self.generator.clone();
            let top_k = self.config.top_k;

            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                solve(node, parents, retriever, generator, top_k).await
            });
        }

        let mut outcomes = Vec::with_capacity(batch.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(error = %e, "Node worker failed"),
            }
        }
        outcomes
    }

    fn record(&self, outcome: NodeOutcome, state: &mut ExecutionState) {
        if let Some(reason) = &outcome.failure {
            state.log(format!("Node {} failed: {}", outcome.id, reason));
        }
        state.log(format!("Solved node {}", outcome.id));

        if outcome.kind == NodeKind::Grounding {
            let enriched = enrich_from_grounding(&state.memory, &outcome.answer);
            if enriched != state.memory {
                debug!(node_id = %outcome.id, "Memory enriched from grounding answer");
                state.memory = enriched;
            }
        }

        state.retrieved.insert(outcome.id.clone(), outcome.snippets);
        state.answers.insert(outcome.id, outcome.answer);
    }
}

fn parent_answers(node: &PlanNode, answers: &Answers) -> Answers {
    node.depends_on
        .iter()
        .filter_map(|dep| answers.get(dep).map(|a| (dep.clone(), a.clone())))
        .collect()
}

async fn solve(
    node: PlanNode,
    parents: Answers,
    retriever: Arc<dyn EvidenceRetriever>,
    generator: Arc<NodeGenerator>,
    top_k: usize,
) -> NodeOutcome {
    let mut failure = None;

    let snippets: Vec<String> = match retriever.query(&node.text, top_k).await {
        Ok(hits) => hits.into_iter().map(|h| h.text).collect(),
        Err(e) => {
            warn!(node_id = %node.id, error = %e, "Retrieval failed");
            failure = Some(format!("retrieval: {}", e));
            Vec::new()
        }
    };

    let answer = match generator.answer(&node.text, &parents, &snippets).await {
        Ok(answer) => answer,
        Err(e) => {
            warn!(node_id = %node.id, error = %e, "Generation failed");
            failure = Some(format!("generation: {}", e));
            String::new()
        }
    };

    info!(node_id = %node.id, depth = node.depth, snippets = snippets.len(), "Solved node");

    NodeOutcome {
        id: node.id,
        kind: node.kind,
        snippets,
        answer,
        failure,
    }
}

/// Deterministic change override for the change node.
///
/// The change node is the first compute node by id path. Takes the first
/// two metric nodes by id path; when both answers parse and the change
/// node is answered, its answer becomes `"<delta> (<pct>%)"`. Any other
/// compute node keeps its generated answer.
pub fn apply_compute_step(graph: &PlanGraph, state: &mut ExecutionState) -> Option<String> {
    let change_id = graph
        .nodes()
        .filter(|n| n.kind == NodeKind::Compute)
        .min_by_key(|n| n.id_path())
        .map(|n| n.id.clone())?;
    if !state.answers.contains_key(&change_id) {
        return None;
    }

    let mut metrics: Vec<&PlanNode> = graph.nodes().filter(|n| n.kind == NodeKind::Metric).collect();
    metrics.sort_by_key(|n| n.id_path());

    let (first, second) = match metrics.as_slice() {
        [a, b, ..] => (state.answers.get(&a.id)?, state.answers.get(&b.id)?),
        _ => return None,
    };
    let computed = change_between(first, second)?;

    info!(node_id = %change_id, value = %computed, "Compute override");
    state.log(format!("Compute: {} = {}", change_id, computed));
    state.answers.insert(change_id, computed.clone());

    Some(computed)
}

pub(crate) fn timeout_error(limit: Duration) -> OrchestrationError {
    OrchestrationError::LlmError(format!("generation timed out after {:?}", limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::null_model;
    use crate::testing::{ScriptedModel, StaticRetriever};

    fn node(id: &str, depth: u32, deps: &[&str]) -> PlanNode {
        PlanNode::new(
            id,
            format!("subquery {}", id),
            depth,
            deps.iter().map(|d| d.to_string()).collect(),
            NodeKind::infer(id, depth),
        )
    }

    async fn execute_plan(engine: &ExecutionEngine, graph: &PlanGraph, question: &str) -> ExecutionState {
        let mut state = ExecutionState::new(question, Default::default());
        state.plan = graph.ordered_nodes();
        engine.execute(graph, &mut state).await;
        state
    }

    fn engine(model: Arc<dyn LanguageModel>, config: ExecutionConfig) -> ExecutionEngine {
        ExecutionEngine::new(
            Arc::new(StaticRetriever::new(&["Acme Corp fiscal 2020 | Revenue | 100"])),
            model,
            config,
        )
    }

    fn wide_graph() -> PlanGraph {
        PlanGraph::new(vec![
            node("1.1", 1, &[]),
            node("2.1", 2, &["1.1"]),
            node("2.2", 2, &["1.1"]),
            node("2.3", 2, &["1.1"]),
            node("2.4", 2, &["1.1"]),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_executes_all_nodes_extractively() {
        let engine = engine(null_model(), ExecutionConfig::default());
        let graph = wide_graph();
        let state = execute_plan(&engine, &graph, "q").await;

        assert!(state.is_complete());
        assert_eq!(state.answers["2.3"], "Acme Corp fiscal 2020 | Revenue | 100");
        assert_eq!(state.retrieved["1.1"].len(), 1);
        assert_eq!(state.memory.get("period").map(String::as_str), Some("2020"));
        assert_eq!(state.memory.get("entity").map(String::as_str), Some("Acme Corp"));
        assert_eq!(
            state.logs.iter().filter(|l| l.starts_with("Batch:")).count(),
            2
        );
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded_by_workers() {
        let model = Arc::new(ScriptedModel::new().reply("subquery", "42").with_delay(Duration::from_millis(50)));
        let config = ExecutionConfig {
            max_workers: 2,
            ..ExecutionConfig::default()
        };
        let engine = engine(model.clone(), config);

        let state = execute_plan(&engine, &wide_graph(), "q").await;

        assert!(state.is_complete());
        assert_eq!(model.max_in_flight(), 2);
        assert_eq!(model.calls(), 5);
    }

    #[tokio::test]
    async fn test_single_worker_runs_sequentially() {
        let model = Arc::new(ScriptedModel::new().reply("subquery", "42").with_delay(Duration::from_millis(10)));
        let config = ExecutionConfig {
            max_workers: 1,
            ..ExecutionConfig::default()
        };
        let engine = engine(model.clone(), config);

        let state = execute_plan(&engine, &wide_graph(), "q").await;

        assert!(state.is_complete());
        assert_eq!(model.max_in_flight(), 1);
        let solved: Vec<&String> = state.logs.iter().filter(|l| l.starts_with("Solved")).collect();
        assert_eq!(solved[1], "Solved node 2.1");
        assert_eq!(solved[4], "Solved node 2.4");
    }

    #[tokio::test]
    async fn test_timeout_yields_empty_answer() {
        let model = Arc::new(ScriptedModel::new().reply("subquery", "late").with_delay(Duration::from_millis(500)));
        let config = ExecutionConfig {
            node_timeout: Some(Duration::from_millis(50)),
            ..ExecutionConfig::default()
        };
        let engine = engine(model, config);

        let state = execute_plan(&engine, &wide_graph(), "q").await;

        assert!(state.is_complete());
        assert!(state.answers.values().all(|a| a.is_empty()));
        assert!(state.logs.iter().any(|l| l.contains("timed out")));
    }

    #[tokio::test]
    async fn test_dangling_dependency_terminates_partially() {
        let graph = PlanGraph::unchecked(vec![node("1.1", 1, &[]), node("2.1", 2, &["9.9"])]);
        let engine = engine(null_model(), ExecutionConfig::default());

        let state = execute_plan(&engine, &graph, "q").await;

        assert_eq!(state.answers.len(), 1);
        assert!(!state.is_complete());
        assert!(state.logs.iter().any(|l| l.starts_with("Stalled")));
    }

    #[tokio::test]
    async fn test_cycle_terminates_with_nothing_answered() {
        let graph = PlanGraph::unchecked(vec![node("1.1", 1, &["1.2"]), node("1.2", 1, &["1.1"])]);
        let engine = engine(null_model(), ExecutionConfig::default());

        let state = execute_plan(&engine, &graph, "q").await;
        assert!(state.answers.is_empty());
    }

    #[tokio::test]
    async fn test_only_minimum_depth_runs_per_batch() {
        // "3.1" has no dependencies, so it is ready from the start
        let graph = PlanGraph::unchecked(vec![node("1.1", 1, &[]), node("3.1", 3, &[])]);
        let engine = engine(null_model(), ExecutionConfig::default());

        let state = execute_plan(&engine, &graph, "q").await;

        let batches: Vec<&String> = state.logs.iter().filter(|l| l.starts_with("Batch:")).collect();
        assert_eq!(batches, vec!["Batch: depth 1 with 1 node(s)", "Batch: depth 3 with 1 node(s)"]);
    }

    #[test]
    fn test_compute_step_overrides_change_node() {
        let graph = PlanGraph::new(vec![
            node("1.1", 1, &[]),
            node("2.1", 2, &["1.1"]),
            node("2.2", 2, &["1.1"]),
            node("3.1", 3, &["2.1", "2.2"]),
        ])
        .unwrap();
        let mut state = ExecutionState::new("q", Default::default());
        for (id, answer) in [("1.1", "Acme"), ("2.1", "$100"), ("2.2", "80"), ("3.1", "about 20")] {
            state.answers.insert(id.into(), answer.into());
        }

        assert_eq!(apply_compute_step(&graph, &mut state).as_deref(), Some("20 (25.00%)"));
        assert_eq!(state.answers["3.1"], "20 (25.00%)");
    }

    #[test]
    fn test_compute_step_keeps_answer_when_unparseable() {
        let graph = PlanGraph::new(vec![
            node("2.1", 2, &[]),
            node("2.10", 2, &[]),
            node("2.2", 2, &[]),
            node("3.1", 3, &["2.1", "2.2"]),
        ])
        .unwrap();
        let mut state = ExecutionState::new("q", Default::default());
        for (id, answer) in [("2.1", "unknown"), ("2.2", "80"), ("2.10", "5"), ("3.1", "about 20")] {
            state.answers.insert(id.into(), answer.into());
        }

        assert!(apply_compute_step(&graph, &mut state).is_none());
        assert_eq!(state.answers["3.1"], "about 20");
    }

    #[test]
    fn test_compute_step_leaves_other_compute_nodes() {
        let graph = PlanGraph::new(vec![
            node("2.1", 2, &[]),
            node("2.2", 2, &[]),
            node("3.1", 3, &["2.1", "2.2"]),
            PlanNode::new("3.2", "Revenue ratio", 3, vec!["2.1".into(), "2.2".into()], NodeKind::Compute),
        ])
        .unwrap();
        let mut state = ExecutionState::new("q", Default::default());
        for (id, answer) in [("2.1", "100"), ("2.2", "80"), ("3.1", "x"), ("3.2", "1.25")] {
            state.answers.insert(id.into(), answer.into());
        }

        assert_eq!(apply_compute_step(&graph, &mut state).as_deref(), Some("20 (25.00%)"));
        assert_eq!(state.answers["3.1"], "20 (25.00%)");
        assert_eq!(state.answers["3.2"], "1.25");
        assert_eq!(state.logs.iter().filter(|l| l.starts_with("Compute:")).count(), 1);
    }

    #[test]
    fn test_compute_step_needs_two_metrics() {
        let graph = PlanGraph::new(vec![node("2.1", 2, &[]), node("3.1", 3, &["2.1"])]).unwrap();
        let mut state = ExecutionState::new("q", Default::default());
        state.answers.insert("2.1".into(), "100".into());
        state.answers.insert("3.1".into(), "n/a".into());

        assert!(apply_compute_step(&graph, &mut state).is_none());
        assert_eq!(state.answers["3.1"], "n/a");
    }
}
