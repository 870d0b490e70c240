//! Dependency graph of plan nodes

use crate::error::OrchestrationError;
use crate::models::PlanNode;
use crate::Result;
use std::collections::{BTreeMap, HashSet};

/// Plan nodes keyed by id. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct PlanGraph {
    nodes: BTreeMap<String, PlanNode>,
}

impl PlanGraph {
    /// Build a validated graph.
    ///
    /// Rejects duplicate ids, depth 0, dependencies on unknown ids, and
    /// dependencies that are not at a strictly lower depth. The last rule
    /// also rules out cycles.
    pub fn new(nodes: Vec<PlanNode>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for node in nodes {
            if node.depth < 1 {
                return Err(OrchestrationError::InvalidPlan(format!(
                    "node {} has depth 0",
                    node.id
                )));
            }
            if map.contains_key(&node.id) {
                return Err(OrchestrationError::InvalidPlan(format!(
                    "duplicate node id {}",
                    node.id
                )));
            }
            map.insert(node.id.clone(), node);
        }

        for node in map.values() {
            for dep in &node.depends_on {
                let parent = map.get(dep).ok_or_else(|| {
                    OrchestrationError::InvalidPlan(format!(
                        "node {} depends on unknown node {}",
                        node.id, dep
                    ))
                })?;
                if parent.depth >= node.depth {
                    return Err(OrchestrationError::InvalidPlan(format!(
                        "node {} (depth {}) depends on {} at depth {}",
                        node.id, node.depth, dep, parent.depth
                    )));
                }
            }
        }

        Ok(Self { nodes: map })
    }

    /// Build without validation. Later duplicates replace earlier ones.
    pub fn unchecked(nodes: Vec<PlanNode>) -> Self {
        Self {
            nodes: nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&PlanNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &PlanNode> {
        self.nodes.values()
    }

    /// Unanswered nodes whose dependencies are all answered, by (depth, id)
    pub fn ready(&self, answered: &HashSet<String>) -> Vec<&PlanNode> {
        let mut ready: Vec<&PlanNode> = self
            .nodes
            .values()
            .filter(|n| !answered.contains(&n.id))
            .filter(|n| n.depends_on.iter().all(|d| answered.contains(d)))
            .collect();
        ready.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.id.cmp(&b.id)));
        ready
    }

    /// 0 for an empty graph
    pub fn max_depth(&self) -> u32 {
        self.nodes.values().map(|n| n.depth).max().unwrap_or(0)
    }

    /// All nodes in (depth, id) order
    pub fn ordered_nodes(&self) -> Vec<PlanNode> {
        let mut nodes: Vec<PlanNode> = self.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.id.cmp(&b.id)));
        nodes
    }
}
