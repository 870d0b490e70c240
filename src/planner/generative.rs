//! Model-driven decomposition with heuristic fallback

use super::{HeuristicPlanner, PlanGraph, Planner};
use crate::error::OrchestrationError;
use crate::llm::{extract_json, LanguageModel};
use crate::models::{NodeKind, PlanNode};
use crate::prompts;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct GenerativePlanner {
    model: Arc<dyn LanguageModel>,
}

impl GenerativePlanner {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    async fn try_plan(&self, question: &str) -> Result<PlanGraph> {
        let response = self.model.complete(&prompts::planner(question)).await?;
        let nodes = parse_plan_response(&response)?;
        PlanGraph::new(nodes)
    }
}

#[async_trait]
impl Planner for GenerativePlanner {
    async fn plan(&self, question: &str) -> PlanGraph {
        if !self.model.is_available() {
            return HeuristicPlanner::build(question);
        }

        match self.try_plan(question).await {
            Ok(graph) => {
                debug!(nodes = graph.len(), max_depth = graph.max_depth(), "Generative plan accepted");
                graph
            }
            Err(e) => {
                warn!(error = %e, "Generative planning failed, using heuristic plan");
                HeuristicPlanner::build(question)
            }
        }
    }
}

/// Parse `{"nodes": [{id, text, depth, depends_on, kind?}]}` into plan nodes
fn parse_plan_response(response: &str) -> Result<Vec<PlanNode>> {
    let json = extract_json(response)?;

    let nodes_json = json
        .get("nodes")
        .and_then(Value::as_array)
        .ok_or_else(|| OrchestrationError::MalformedResponse("no nodes array".to_string()))?;

    if nodes_json.is_empty() {
        return Err(OrchestrationError::PlanningError("empty plan".to_string()));
    }

    nodes_json.iter().map(parse_node).collect()
}

fn parse_node(node_json: &Value) -> Result<PlanNode> {
    let id = node_json
        .get("id")
        .and_then(scalar_string)
        .ok_or_else(|| OrchestrationError::MalformedResponse("node missing id".to_string()))?;

    let text = node_json
        .get("text")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| OrchestrationError::MalformedResponse(format!("node {} missing text", id)))?
        .to_string();

    let depth = node_json
        .get("depth")
        .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok())))
        .ok_or_else(|| OrchestrationError::MalformedResponse(format!("node {} missing depth", id)))?
        as u32;

    let depends_on: Vec<String> = node_json
        .get("depends_on")
        .and_then(Value::as_array)
        .map(|deps| deps.iter().filter_map(scalar_string).collect())
        .unwrap_or_default();

    let kind = node_json
        .get("kind")
        .and_then(Value::as_str)
        .and_then(NodeKind::parse)
        .unwrap_or_else(|| NodeKind::infer(&id, depth));

    Ok(PlanNode::new(id, text, depth, depends_on, kind))
}

/// Ids sometimes come back as numbers (`1.1`); accept both
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
