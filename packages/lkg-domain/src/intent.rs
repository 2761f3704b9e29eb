use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::concept::{normalize_concept_keys, key_phrase};

pub const FALLBACK_INTENT_NOTE: &str = "fallback_intent";
const MAX_INTENT_CONCEPTS: usize = 12;

/// A file's "from → to / core thread" description.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntentDraft {
	pub from_state: String,
	pub to_state: String,
	pub core_thread: String,
	pub destination_concepts: Vec<String>,
	pub prerequisite_concepts: Vec<String>,
	pub assumed_knowledge: Vec<String>,
	pub notes: Vec<String>,
}
impl IntentDraft {
	/// Reads intent fields from an LLM object; concept lists are normalized to keys.
	pub fn from_llm(value: &Value) -> Self {
		Self {
			from_state: crate::string_field(value, "from_state"),
			to_state: crate::string_field(value, "to_state"),
			core_thread: crate::string_field(value, "core_thread"),
			destination_concepts: capped_keys(value.get("destination_concepts")),
			prerequisite_concepts: capped_keys(value.get("prerequisite_concepts")),
			assumed_knowledge: crate::string_list(value.get("assumed_knowledge")),
			notes: crate::string_list(value.get("notes")),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.from_state.is_empty()
			&& self.to_state.is_empty()
			&& self.core_thread.is_empty()
			&& self.destination_concepts.is_empty()
			&& self.prerequisite_concepts.is_empty()
	}

	pub fn is_fallback(&self) -> bool {
		notes_mark_fallback(&self.notes)
	}

	/// Terms used for cheap lexical alignment against chunk excerpts.
	pub fn alignment_terms(&self) -> Vec<String> {
		let mut terms: Vec<String> = self
			.destination_concepts
			.iter()
			.chain(&self.prerequisite_concepts)
			.map(|key| key_phrase(key))
			.collect();

		terms.sort();
		terms.dedup();

		terms
	}

	pub fn metadata(&self) -> Value {
		serde_json::json!({ "notes": self.notes })
	}
}

pub fn notes_mark_fallback(notes: &[String]) -> bool {
	notes.iter().any(|note| note == FALLBACK_INTENT_NOTE)
}

/// Deterministic intent derived from a file's signature when no model output is usable.
pub fn fallback_intent(
	file_name: &str,
	summary: &str,
	topics: &[String],
	concept_keys: &[String],
) -> IntentDraft {
	let mut destination = normalize_concept_keys(concept_keys);

	if destination.is_empty() {
		destination = normalize_concept_keys(topics);
	}

	destination.truncate(MAX_INTENT_CONCEPTS);

	let subject = topics.first().map(String::as_str).unwrap_or(file_name).trim();
	let first_sentence = summary.split(['.', '\n']).map(str::trim).find(|s| !s.is_empty());
	let core_thread = match first_sentence {
		Some(sentence) => sentence.to_string(),
		None => format!("Work through {subject}"),
	};

	IntentDraft {
		from_state: format!("New to the material in {}", file_name.trim()),
		to_state: if destination.is_empty() {
			format!("Familiar with {subject}")
		} else {
			format!("Able to work with {}", destination.iter().take(3).cloned().collect::<Vec<_>>().join(", "))
		},
		core_thread,
		destination_concepts: destination,
		prerequisite_concepts: Vec::new(),
		assumed_knowledge: Vec::new(),
		notes: vec![FALLBACK_INTENT_NOTE.to_string()],
	}
}

fn capped_keys(value: Option<&Value>) -> Vec<String> {
	let mut keys = normalize_concept_keys(crate::string_list(value));

	keys.truncate(MAX_INTENT_CONCEPTS);

	keys
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fallback_is_labeled_and_uses_concepts() {
		let intent = fallback_intent(
			"graphs.pdf",
			"Graphs model pairwise relations. More text.",
			&["Graph theory".to_string()],
			&["Adjacency List".to_string(), "BFS".to_string()],
		);

		assert!(intent.is_fallback());
		assert_eq!(intent.destination_concepts, vec!["adjacency_list".to_string(), "bfs".to_string()]);
		assert_eq!(intent.core_thread, "Graphs model pairwise relations");
		assert!(!intent.is_empty());
	}

	#[test]
	fn llm_intent_normalizes_concepts() {
		let value = serde_json::json!({
			"from_state": "novice",
			"destination_concepts": ["Dynamic Programming", "dynamic programming"],
			"notes": ["solid"]
		});
		let intent = IntentDraft::from_llm(&value);

		assert_eq!(intent.destination_concepts, vec!["dynamic_programming".to_string()]);
		assert!(!intent.is_fallback());
		assert_eq!(intent.alignment_terms(), vec!["dynamic programming".to_string()]);
	}
}
