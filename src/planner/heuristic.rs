//! Keyword-driven planner with no model dependency

use super::{PlanGraph, Planner};
use crate::models::{NodeKind, PlanNode};
use async_trait::async_trait;

const GROUNDING_TEXT: &str = "Identify the entity and fiscal period(s) referenced in the question.";
const FALLBACK_METRIC: &str = "the requested financial metric in the question";
const CHANGE_TEXT: &str =
    "Compute absolute and percentage change vs prior comparable period for requested metric(s).";

/// (keywords, metric) in the order metric nodes are emitted
const METRIC_GROUPS: &[(&[&str], &str)] = &[
    (&["net income", "profit", "earnings"], "net income"),
    (&["revenue", "sales", "top line"], "revenue"),
    (&["gross margin", "operating margin", "margin"], "margin"),
];

const CHANGE_KEYWORDS: &[&str] = &[
    "yoy",
    "year over year",
    "change",
    "difference",
    "delta",
    "increase",
    "decrease",
];

pub struct HeuristicPlanner;

impl HeuristicPlanner {
    pub fn build(question: &str) -> PlanGraph {
        let lowered = question.to_lowercase();
        let has_any = |keywords: &[&str]| keywords.iter().any(|k| lowered.contains(k));

        let mut nodes = vec![PlanNode::new("1.1", GROUNDING_TEXT, 1, vec![], NodeKind::Grounding)];

        let mut metrics: Vec<&str> = METRIC_GROUPS
            .iter()
            .filter(|(keywords, _)| has_any(keywords))
            .map(|(_, metric)| *metric)
            .collect();
        if metrics.is_empty() {
            metrics.push(FALLBACK_METRIC);
        }

        let metric_ids: Vec<String> = (1..=metrics.len()).map(|j| format!("2.{}", j)).collect();
        for (id, metric) in metric_ids.iter().zip(&metrics) {
            nodes.push(PlanNode::new(
                id.as_str(),
                format!("Retrieve the value for {} for the identified period(s).", metric),
                2,
                vec!["1.1".to_string()],
                NodeKind::Metric,
            ));
        }

        if has_any(CHANGE_KEYWORDS) {
            nodes.push(PlanNode::new("3.1", CHANGE_TEXT, 3, metric_ids, NodeKind::Compute));
        }

        // Constructed to satisfy every validation rule
        PlanGraph::unchecked(nodes)
    }
}

#[async_trait]
impl Planner for HeuristicPlanner {
    async fn plan(&self, question: &str) -> PlanGraph {
        Self::build(question)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(graph: &PlanGraph) -> Vec<String> {
        graph.nodes().map(|n| n.id.clone()).collect()
    }

    #[test]
    fn test_year_over_year_revenue_change() {
        let graph = HeuristicPlanner::build("What was the year-over-year change in revenue?");

        assert_eq!(ids(&graph), vec!["1.1", "2.1", "3.1"]);
        assert_eq!(graph.get("2.1").unwrap().depends_on, vec!["1.1"]);
        assert_eq!(graph.get("3.1").unwrap().depends_on, vec!["2.1"]);
        assert_eq!(graph.get("3.1").unwrap().kind, NodeKind::Compute);
        assert!(graph.get("2.1").unwrap().text.contains("revenue"));
    }

    #[test]
    fn test_is_deterministic() {
        let q = "What was the year-over-year change in revenue?";
        assert_eq!(
            HeuristicPlanner::build(q).ordered_nodes(),
            HeuristicPlanner::build(q).ordered_nodes()
        );
    }

    #[test]
    fn test_multiple_metrics_in_group_order() {
        let graph = HeuristicPlanner::build("Compare operating margin, sales and profit");

        assert_eq!(ids(&graph), vec!["1.1", "2.1", "2.2", "2.3"]);
        assert!(graph.get("2.1").unwrap().text.contains("net income"));
        assert!(graph.get("2.2").unwrap().text.contains("revenue"));
        assert!(graph.get("2.3").unwrap().text.contains("margin"));
    }

    #[test]
    fn test_no_metric_keyword_uses_generic_node() {
        let graph = HeuristicPlanner::build("How many employees were there?");

        assert_eq!(ids(&graph), vec!["1.1", "2.1"]);
        assert!(graph.get("2.1").unwrap().text.contains(FALLBACK_METRIC));
        assert_eq!(graph.max_depth(), 2);
    }

    #[test]
    fn test_output_passes_validation() {
        let graph = HeuristicPlanner::build("What was the difference in net income and revenue?");
        assert!(PlanGraph::new(graph.ordered_nodes()).is_ok());
    }
}
