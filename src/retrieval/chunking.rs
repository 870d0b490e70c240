//! Document → retrievable chunks

use serde::{Deserialize, Serialize};

/// Paragraphs at or below this many characters are treated as noise
const MIN_PARAGRAPH_CHARS: usize = 30;

/// One table cell as supplied by the document source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCell {
    pub column: String,
    pub row: String,
    pub value: String,
}

impl TableCell {
    pub fn new(column: impl Into<String>, row: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            row: row.into(),
            value: value.into(),
        }
    }

    /// `"<row> | <column> | <value>"`
    pub fn render(&self) -> String {
        format!("{} | {} | {}", self.row, self.column, self.value)
    }
}

/// Paragraph chunks from both narrative blocks, then one chunk per cell.
///
/// Falls back to the raw narrative text when nothing qualifies.
pub fn build_doc_chunks(pre_text: &str, post_text: &str, cells: &[TableCell]) -> Vec<String> {
    let mut chunks: Vec<String> = [pre_text, post_text]
        .iter()
        .filter(|block| !block.is_empty())
        .flat_map(|block| block.split("\n\n"))
        .map(str::trim)
        .filter(|para| para.chars().count() > MIN_PARAGRAPH_CHARS)
        .map(str::to_string)
        .collect();

    chunks.extend(cells.iter().map(TableCell::render));

    if chunks.is_empty() {
        let raw = if pre_text.is_empty() { post_text } else { pre_text };
        if !raw.is_empty() {
            chunks.push(raw.to_string());
        }
    }

    chunks
}
