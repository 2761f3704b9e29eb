//! Set-level intent: parsing the model's answer and the deterministic fallback.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use uuid::Uuid;

use crate::{
	concept::normalize_concept_keys,
	coverage::{CoverageRow, CoverageType, EdgeType, FileEdge},
	intent::IntentDraft,
};

pub const FALLBACK_SET_INTENT_NOTE: &str = "fallback_set_intent";
const MAX_GAP_KEYS: usize = 12;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SetIntentDraft {
	pub from_state: String,
	pub to_state: String,
	pub core_thread: String,
	pub spine_material_file_ids: Vec<Uuid>,
	pub satellite_material_file_ids: Vec<Uuid>,
	pub gaps_concept_keys: Vec<String>,
	pub redundancy_notes: Vec<String>,
	pub conflict_notes: Vec<String>,
	pub notes: Vec<String>,
}
impl SetIntentDraft {
	/// Parses a `material_set_signal` response; file ids outside the set are dropped and a file
	/// is never both spine and satellite.
	pub fn from_llm(value: &Value, set_file_ids: &BTreeSet<Uuid>) -> Self {
		let spine = file_ids(value.get("spine_material_file_ids"), set_file_ids);
		let satellite = file_ids(value.get("satellite_material_file_ids"), set_file_ids)
			.into_iter()
			.filter(|id| !spine.contains(id))
			.collect();

		Self {
			from_state: crate::string_field(value, "from_state"),
			to_state: crate::string_field(value, "to_state"),
			core_thread: crate::string_field(value, "core_thread"),
			spine_material_file_ids: spine,
			satellite_material_file_ids: satellite,
			gaps_concept_keys: normalize_concept_keys(crate::string_list(
				value.get("gaps_concept_keys"),
			)),
			redundancy_notes: crate::string_list(value.get("redundancy_notes")),
			conflict_notes: crate::string_list(value.get("conflict_notes")),
			notes: crate::string_list(value.get("notes")),
		}
	}

	pub fn is_fallback(&self) -> bool {
		self.notes.iter().any(|note| note == FALLBACK_SET_INTENT_NOTE)
	}

	/// `redundancy_notes` joined and lowercased, for substring matching.
	pub fn redundancy_text(&self) -> String {
		self.redundancy_notes.join(" ").to_lowercase()
	}

	pub fn metadata(&self) -> Value {
		serde_json::json!({ "notes": self.notes })
	}
}

/// Derives a set intent from file intents, coverage and edges.
///
/// Files that are the source of any edge, or that introduce a concept, form the spine; the rest
/// are satellites. Gaps are concepts that are only ever assumed.
pub fn fallback_set_intent(
	file_intents: &BTreeMap<Uuid, IntentDraft>,
	coverage: &[CoverageRow],
	edges: &[FileEdge],
	set_file_ids: &BTreeSet<Uuid>,
) -> SetIntentDraft {
	let mut spine: BTreeSet<Uuid> = edges
		.iter()
		.filter(|edge| matches!(edge.edge_type, EdgeType::Prerequisite | EdgeType::Extends))
		.map(|edge| edge.from_file_id)
		.collect();

	for row in coverage.iter().filter(|row| row.coverage_type == CoverageType::Introduces) {
		spine.extend(row.source_material_file_ids.iter().copied());
	}

	spine.retain(|id| set_file_ids.contains(id));

	if spine.is_empty() {
		spine = set_file_ids.clone();
	}

	let satellite = set_file_ids.iter().filter(|id| !spine.contains(id)).copied().collect();
	let gaps = coverage
		.iter()
		.filter(|row| row.coverage_type == CoverageType::Assumes)
		.map(|row| row.concept_key.clone())
		.take(MAX_GAP_KEYS)
		.collect();
	let first = spine.iter().find_map(|id| file_intents.get(id));
	let last = spine.iter().rev().find_map(|id| file_intents.get(id));
	let threads: Vec<&str> = spine
		.iter()
		.filter_map(|id| file_intents.get(id))
		.map(|intent| intent.core_thread.as_str())
		.filter(|thread| !thread.is_empty())
		.collect();

	SetIntentDraft {
		from_state: first.map(|intent| intent.from_state.clone()).unwrap_or_default(),
		to_state: last.map(|intent| intent.to_state.clone()).unwrap_or_default(),
		core_thread: threads.join("; "),
		spine_material_file_ids: spine.into_iter().collect(),
		satellite_material_file_ids: satellite,
		gaps_concept_keys: gaps,
		redundancy_notes: Vec::new(),
		conflict_notes: Vec::new(),
		notes: vec![FALLBACK_SET_INTENT_NOTE.to_string()],
	}
}

fn file_ids(value: Option<&Value>, allowed: &BTreeSet<Uuid>) -> Vec<Uuid> {
	let mut seen = BTreeSet::new();

	crate::string_list(value)
		.iter()
		.filter_map(|raw| Uuid::parse_str(raw).ok())
		.filter(|id| allowed.contains(id) && seen.insert(*id))
		.collect()
}
