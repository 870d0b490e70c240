//! Conversational memory
//!
//! Slot values carried from one turn to the next, the model-backed
//! resolver that rewrites follow-up questions, and per-session storage.

use crate::models::MemorySlots;
use lazy_static::lazy_static;
use regex::Regex;

pub mod resolver;
pub mod store;

pub use resolver::MemoryResolver;
pub use store::SessionMemoryStore;

/// Slots a resolver is allowed to update
pub const SLOT_KEYS: [&str; 4] = ["entity", "period", "metric", "unit"];

lazy_static! {
    static ref YEAR: Regex = Regex::new(r"(20\d{2}|19\d{2})").expect("year pattern is valid");
    static ref ENTITY: Regex =
        Regex::new(r"\b([A-Z][A-Za-z0-9.&-]+(?:\s+[A-Z][A-Za-z0-9.&-]+)?)\b")
            .expect("entity pattern is valid");
}

pub fn is_slot_key(key: &str) -> bool {
    SLOT_KEYS.contains(&key)
}

/// Overwrite slots only with non-blank values; blanks never erase.
pub fn merge_memory(old: &MemorySlots, updates: &MemorySlots) -> MemorySlots {
    let mut merged = old.clone();
    for (key, value) in updates {
        let value = value.trim();
        if !value.is_empty() {
            merged.insert(key.clone(), value.to_string());
        }
    }
    merged
}

/// Period (first year token) and entity (first capitalized phrase) found
/// in a grounding answer
pub fn grounding_updates(answer: &str) -> MemorySlots {
    let mut updates = MemorySlots::new();
    if let Some(year) = YEAR.captures(answer).and_then(|c| c.get(1)) {
        updates.insert("period".to_string(), year.as_str().to_string());
    }
    if let Some(entity) = ENTITY.captures(answer).and_then(|c| c.get(1)) {
        updates.insert("entity".to_string(), entity.as_str().to_string());
    }
    updates
}

pub fn enrich_from_grounding(memory: &MemorySlots, answer: &str) -> MemorySlots {
    merge_memory(memory, &grounding_updates(answer))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots(pairs: &[(&str, &str)]) -> MemorySlots {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_merge_ignores_blank_values() {
        let old = slots(&[("entity", "Acme"), ("period", "2019")]);
        let updates = slots(&[("entity", "  "), ("period", " 2020 "), ("unit", "USD")]);

        let merged = merge_memory(&old, &updates);
        assert_eq!(merged, slots(&[("entity", "Acme"), ("period", "2020"), ("unit", "USD")]));
    }

    #[test]
    fn test_grounding_updates() {
        let updates = grounding_updates("The entity is Acme Corp and the period is fiscal 2020.");
        assert_eq!(updates.get("period").map(String::as_str), Some("2020"));
        assert_eq!(updates.get("entity").map(String::as_str), Some("The"));

        let updates = grounding_updates("Acme Corp, fiscal years 2019 and 2020");
        assert_eq!(updates.get("entity").map(String::as_str), Some("Acme Corp"));
        assert_eq!(updates.get("period").map(String::as_str), Some("2019"));
    }

    #[test]
    fn test_grounding_without_matches_keeps_memory() {
        let memory = slots(&[("entity", "Acme")]);
        assert_eq!(enrich_from_grounding(&memory, "n/a"), memory);
    }
}
