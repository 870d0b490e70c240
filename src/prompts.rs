//! Prompt builders for every model-backed step

use crate::llm::Prompt;
use crate::models::{Answers, MemorySlots};
use std::collections::BTreeMap;

/// Snippets shown to the generator per node
pub const MAX_GENERATOR_SNIPPETS: usize = 6;

const PLANNER_SYSTEM: &str = "You break a financial question into a dependency graph of small \
subqueries. Each subquery must be answerable with a single lookup in the filing text or table. \
Reply with JSON only: {\"nodes\": [{\"id\", \"text\", \"depth\", \"depends_on\": []}]}. \
Ids take the form \"<depth>.<position>\" with depth starting at 1.";

const GENERATOR_SYSTEM: &str = "You are a careful financial analyst. Answer the subquery from the \
snippets and parent answers in one short factual statement, with units and period where relevant. \
Prefer a single canonical number when the answer is numeric.";

const AGGREGATOR_SYSTEM: &str = "You combine solved subqueries into the final answer to a \
financial question. Be brief and show the arithmetic when a calculation is involved.";

const RESOLVER_SYSTEM: &str = "You resolve references and ellipsis in follow-up financial \
questions. Using the memory snapshot, rewrite the question so it stands on its own. Reply with \
JSON only: {\"rewritten\": \"...\", \"memory_updates\": {\"entity\", \"period\", \"metric\", \
\"unit\"}}. Include only slots you are confident about.";

const VALIDATOR_SYSTEM: &str = "You check whether a proposed answer to a financial question is \
supported by the evidence and is numerically consistent with the subquery answers. Reply with \
JSON only: {\"verdict\": \"pass\" or \"fail\", \"corrected\": \"answer, empty on pass\", \
\"confidence\": 0.0 to 1.0, \"rationale\": \"short reason\"}.";

pub fn planner(question: &str) -> Prompt {
    Prompt::new(
        PLANNER_SYSTEM,
        format!(
            "Decompose this question into atomic subqueries, listing parent ids in depends_on.\n\n\
             QUESTION:\n{}\n\n\
             Rules:\n\
             - keep each subquery minimal and factual\n\
             - prefer table lookups for metrics and period-over-period changes\n\
             - root nodes have depth 1 and no dependencies",
            question
        ),
    )
}

pub fn generator(subquery: &str, parents: &Answers, snippets: &[String]) -> Prompt {
    let parents = if parents.is_empty() {
        "(none)".to_string()
    } else {
        id_lines(parents)
    };
    let snippets = snippets
        .iter()
        .take(MAX_GENERATOR_SNIPPETS)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("\n---\n");

    Prompt::new(
        GENERATOR_SYSTEM,
        format!(
            "SUBQUERY: {}\n\nPARENT ANSWERS:\n{}\n\nSNIPPETS (best first):\n{}\n\nAnswer:",
            subquery, parents, snippets
        ),
    )
}

pub fn aggregator(query: &str, answers: &Answers) -> Prompt {
    Prompt::new(
        AGGREGATOR_SYSTEM,
        format!(
            "QUESTION:\n{}\n\nSOLVED SUBQUERIES:\n{}\n\nFinal answer:",
            query,
            id_lines(answers)
        ),
    )
}

pub fn resolver(query: &str, memory: &MemorySlots) -> Prompt {
    let snapshot = serde_json::to_string(memory).unwrap_or_else(|_| "{}".to_string());
    Prompt::new(
        RESOLVER_SYSTEM,
        format!(
            "QUESTION:\n{}\n\nMEMORY:\n{}\n\n\
             Make entity, period and metric explicit where memory implies them.",
            query, snapshot
        ),
    )
}

pub fn validator(
    query: &str,
    final_answer: &str,
    answers: &Answers,
    retrieved: &BTreeMap<String, Vec<String>>,
) -> Prompt {
    let evidence = retrieved
        .iter()
        .map(|(id, snippets)| format!("[{}]\n{}", id, snippets.join("\n")))
        .collect::<Vec<_>>()
        .join("\n\n");

    Prompt::new(
        VALIDATOR_SYSTEM,
        format!(
            "QUESTION:\n{}\n\nPROPOSED ANSWER:\n{}\n\nSUBQUERY ANSWERS:\n{}\n\nEVIDENCE:\n{}",
            query,
            final_answer,
            id_lines(answers),
            evidence
        ),
    )
}

/// `id: answer` lines in id order
pub fn id_lines(answers: &Answers) -> String {
    answers
        .iter()
        .map(|(id, answer)| format!("{}: {}", id, answer))
        .collect::<Vec<_>>()
        .join("\n")
}
