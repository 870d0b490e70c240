//! ConvFinQA-style records
//!
//! Each record carries one filing excerpt (narrative text plus a table
//! keyed by column then row) and a multi-turn dialogue over it.

use crate::error::OrchestrationError;
use crate::retrieval::TableCell;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub pre_text: String,
    #[serde(default)]
    pub post_text: String,
    /// column → row → number-or-string
    #[serde(default)]
    pub table: Map<String, Value>,
}

impl Document {
    /// Flattened `(column, row, value)` cells in document order
    pub fn cells(&self) -> Vec<TableCell> {
        let mut cells = Vec::new();
        for (column, rows) in &self.table {
            let Some(rows) = rows.as_object() else {
                continue;
            };
            for (row, value) in rows {
                cells.push(TableCell::new(column.as_str(), row.as_str(), render_value(value)));
            }
        }
        cells
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dialogue {
    #[serde(default)]
    pub conv_questions: Vec<String>,
    #[serde(default)]
    pub conv_answers: Vec<String>,
    #[serde(default)]
    pub turn_program: Vec<String>,
    #[serde(default)]
    pub executed_answers: Vec<Value>,
    #[serde(default)]
    pub qa_split: Vec<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Features {
    #[serde(default)]
    pub num_dialogue_turns: u32,
    #[serde(default)]
    pub has_type2_question: bool,
    #[serde(default)]
    pub has_duplicate_columns: bool,
    #[serde(default)]
    pub has_non_numeric_values: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvFinQARecord {
    pub id: String,
    pub doc: Document,
    pub dialogue: Dialogue,
    #[serde(default)]
    pub features: Features,
}

pub fn load_records(path: impl AsRef<Path>) -> Result<Vec<ConvFinQARecord>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|e| {
        OrchestrationError::DatasetError(format!("cannot read {}: {}", path.display(), e))
    })?;
    let records = parse_records(&raw)?;
    info!(path = %path.display(), records = records.len(), "Loaded dataset");
    Ok(records)
}

pub fn parse_records(raw: &str) -> Result<Vec<ConvFinQARecord>> {
    serde_json::from_str(raw)
        .map_err(|e| OrchestrationError::DatasetError(format!("invalid dataset: {}", e)))
}

pub fn index_by_id(records: Vec<ConvFinQARecord>) -> HashMap<String, ConvFinQARecord> {
    records.into_iter().map(|r| (r.id.clone(), r)).collect()
}

/// Turn index, with `None` and out-of-range selecting the last turn
fn select_turn(len: usize, turn: Option<usize>) -> Option<usize> {
    if len == 0 {
        return None;
    }
    match turn {
        Some(t) if t < len => Some(t),
        _ => Some(len - 1),
    }
}

pub fn get_turn_question(record: &ConvFinQARecord, turn: Option<usize>) -> String {
    let questions = &record.dialogue.conv_questions;
    select_turn(questions.len(), turn)
        .map(|t| questions[t].clone())
        .unwrap_or_default()
}

pub fn get_turn_gold(record: &ConvFinQARecord, turn: Option<usize>) -> Option<String> {
    let golds = &record.dialogue.executed_answers;
    select_turn(golds.len(), turn).map(|t| render_value(&golds[t]))
}

/// Numbers and strings as plain text
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"[
        {
            "id": "Single_ACME/2020/page_12.pdf-1",
            "doc": {
                "pre_text": "Acme Corp reported results for fiscal 2020.",
                "post_text": "",
                "table": {
                    "2020": {"Revenue": 100, "Net income": "12.5"},
                    "2019": {"Revenue": 80.0, "Net income": "(3)"}
                }
            },
            "dialogue": {
                "conv_questions": ["what was revenue in 2020?", "and the change from 2019?"],
                "conv_answers": ["100", "20"],
                "turn_program": ["100", "subtract(100, 80)"],
                "executed_answers": [100, 20.0],
                "qa_split": [false, false]
            },
            "features": {"num_dialogue_turns": 2}
        }
    ]"#;

    #[test]
    fn test_cells_follow_document_order() {
        let records = parse_records(SAMPLE).unwrap();
        let cells = records[0].doc.cells();

        assert_eq!(cells.len(), 4);
        assert_eq!(cells[0], TableCell::new("2020", "Revenue", "100"));
        assert_eq!(cells[1].render(), "Net income | 2020 | 12.5");
        assert_eq!(cells[2].value, "80.0");
    }

    #[test]
    fn test_turn_selection_defaults_to_last() {
        let records = parse_records(SAMPLE).unwrap();
        let record = &records[0];

        assert_eq!(get_turn_question(record, Some(0)), "what was revenue in 2020?");
        assert_eq!(get_turn_question(record, None), "and the change from 2019?");
        assert_eq!(get_turn_question(record, Some(9)), "and the change from 2019?");
        assert_eq!(get_turn_gold(record, None).as_deref(), Some("20.0"));
    }

    #[test]
    fn test_index_by_id() {
        let index = index_by_id(parse_records(SAMPLE).unwrap());
        assert!(index.contains_key("Single_ACME/2020/page_12.pdf-1"));
    }

    #[test]
    fn test_invalid_dataset_is_an_error() {
        assert!(matches!(
            parse_records("{not json"),
            Err(OrchestrationError::DatasetError(_))
        ));
    }
}
