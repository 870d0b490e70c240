//! Core data models for plan-and-retrieve question answering

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Node answers keyed by node id
pub type Answers = BTreeMap<String, String>;

/// Conversational memory slots (entity, period, metric, unit, ...)
pub type MemorySlots = BTreeMap<String, String>;

//
// ================= Plan =================
//

/// What a plan node contributes to the answer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Identifies the entity and period the question is about
    Grounding,
    /// Looks up one metric value
    Metric,
    /// Derives a change from metric values
    Compute,
    Other,
}

impl NodeKind {
    /// Kind implied by the `depth.position` id convention, used when a
    /// decomposition does not state kinds explicitly.
    pub fn infer(id: &str, depth: u32) -> Self {
        match (id, depth) {
            ("1.1", _) => NodeKind::Grounding,
            ("3.1", _) => NodeKind::Compute,
            (_, 2) => NodeKind::Metric,
            _ => NodeKind::Other,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "grounding" => Some(NodeKind::Grounding),
            "metric" => Some(NodeKind::Metric),
            "compute" => Some(NodeKind::Compute),
            "other" => Some(NodeKind::Other),
            _ => None,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeKind::Grounding => "grounding",
            NodeKind::Metric => "metric",
            NodeKind::Compute => "compute",
            NodeKind::Other => "other",
        };
        write!(f, "{}", s)
    }
}

/// One atomic subquery in a plan
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanNode {
    /// `depth.position` tag, e.g. "2.1"
    pub id: String,
    pub text: String,
    /// 1 = root
    pub depth: u32,
    pub depends_on: Vec<String>,
    pub kind: NodeKind,
}

impl PlanNode {
    pub fn new(
        id: impl Into<String>,
        text: impl Into<String>,
        depth: u32,
        depends_on: Vec<String>,
        kind: NodeKind,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            depth,
            depends_on,
            kind,
        }
    }

    /// Numeric path of the id ("2.10" → [2, 10]); non-numeric parts sort last.
    pub fn id_path(&self) -> Vec<u64> {
        id_path(&self.id)
    }
}

pub fn id_path(id: &str) -> Vec<u64> {
    id.split('.')
        .map(|part| part.trim().parse::<u64>().unwrap_or(u64::MAX))
        .collect()
}

//
// ================= Evidence =================
//

/// A chunk returned by the evidence index with its fused score
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredChunk {
    pub text: String,
    pub score: f64,
}

//
// ================= Validation =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    /// Anything other than exactly "fail" counts as a pass.
    pub fn normalize(raw: &str) -> Self {
        if raw == "fail" {
            Verdict::Fail
        } else {
            Verdict::Pass
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => write!(f, "pass"),
            Verdict::Fail => write!(f, "fail"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Validation {
    pub verdict: Verdict,
    pub corrected: String,
    pub confidence: f64,
    pub rationale: String,
}

impl Validation {
    /// The correction to apply, if the verdict demands one and it is usable.
    pub fn correction(&self) -> Option<&str> {
        let corrected = self.corrected.trim();
        if self.verdict == Verdict::Fail && !corrected.is_empty() {
            Some(corrected)
        } else {
            None
        }
    }
}

//
// ================= Execution State =================
//

/// Everything one conversational turn produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    pub turn_id: Uuid,
    /// The question as asked
    pub question: String,
    /// The question after memory resolution
    pub query: String,
    /// Plan nodes in (depth, id) order
    pub plan: Vec<PlanNode>,
    pub answers: Answers,
    pub retrieved: BTreeMap<String, Vec<String>>,
    pub memory: MemorySlots,
    pub logs: Vec<String>,
    pub final_answer: Option<String>,
    pub validation: Option<Validation>,
    pub started_at: DateTime<Utc>,
    pub execution_time_ms: u64,
}

impl ExecutionState {
    pub fn new(question: &str, memory: MemorySlots) -> Self {
        Self {
            turn_id: Uuid::new_v4(),
            question: question.to_string(),
            query: question.to_string(),
            plan: Vec::new(),
            answers: Answers::new(),
            retrieved: BTreeMap::new(),
            memory,
            logs: Vec::new(),
            final_answer: None,
            validation: None,
            started_at: Utc::now(),
            execution_time_ms: 0,
        }
    }

    pub fn log(&mut self, line: impl Into<String>) {
        self.logs.push(line.into());
    }

    /// True when every planned node has an answer
    pub fn is_complete(&self) -> bool {
        self.plan.iter().all(|n| self.answers.contains_key(&n.id))
    }
}
