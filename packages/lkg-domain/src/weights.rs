//! Set-position and compound weights for chunk signals.

use std::collections::{BTreeMap, BTreeSet};

use uuid::Uuid;

use crate::{clamp01, concept::key_phrase, set_intent::SetIntentDraft};

pub const DEFAULT_CROSS_SET_RELEVANCE: f64 = 0.5;

/// Intent-derived context shared by every chunk of a set.
#[derive(Clone, Debug, Default)]
pub struct SetPositionContext {
	spine: BTreeSet<Uuid>,
	satellite: BTreeSet<Uuid>,
	core_thread: String,
	gaps: BTreeSet<String>,
	redundancy: String,
}
impl SetPositionContext {
	pub fn new(intent: &SetIntentDraft) -> Self {
		Self {
			spine: intent.spine_material_file_ids.iter().copied().collect(),
			satellite: intent.satellite_material_file_ids.iter().copied().collect(),
			core_thread: intent.core_thread.to_lowercase(),
			gaps: intent.gaps_concept_keys.iter().cloned().collect(),
			redundancy: intent.redundancy_text(),
		}
	}

	/// `clamp01(base + core_match + gap_match - redundancy_match)` for one chunk.
	pub fn score(&self, file_id: Uuid, keys: &BTreeSet<String>) -> f64 {
		let base = if self.spine.contains(&file_id) {
			1.0
		} else if self.satellite.contains(&file_id) {
			0.6
		} else {
			0.8
		};
		let core_match =
			if keys.iter().any(|key| mentions(&self.core_thread, key)) { 0.2 } else { 0.0 };
		let gap_match = if keys.iter().any(|key| self.gaps.contains(key)) { 0.3 } else { 0.0 };
		let redundancy_match =
			if keys.iter().any(|key| mentions(&self.redundancy, key)) { 0.2 } else { 0.0 };

		clamp01(base + core_match + gap_match - redundancy_match)
	}
}

fn mentions(text: &str, key: &str) -> bool {
	!text.is_empty() && (text.contains(key) || text.contains(&key_phrase(key)))
}

/// Product of the four factors, each clamped first.
pub fn compound_weight(
	signal_strength: f64,
	intent_alignment: f64,
	set_position: f64,
	cross_set_relevance: f64,
) -> f64 {
	clamp01(
		clamp01(signal_strength)
			* clamp01(intent_alignment)
			* clamp01(set_position)
			* clamp01(cross_set_relevance),
	)
}

/// Highest relevance among the chunk's keys, or the default when none is known.
pub fn cross_set_relevance(keys: &BTreeSet<String>, by_key: &BTreeMap<String, f64>) -> f64 {
	keys.iter()
		.filter_map(|key| by_key.get(key))
		.copied()
		.map(clamp01)
		.fold(None, |best: Option<f64>, value| Some(best.map_or(value, |b| b.max(value))))
		.unwrap_or(DEFAULT_CROSS_SET_RELEVANCE)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn keys(raw: &[&str]) -> BTreeSet<String> {
		raw.iter().map(|k| k.to_string()).collect()
	}

	#[test]
	fn set_position_combines_matches() {
		let spine = Uuid::from_u128(1);
		let satellite = Uuid::from_u128(2);
		let ctx = SetPositionContext::new(&SetIntentDraft {
			core_thread: "From Binary Search to balanced trees".to_string(),
			spine_material_file_ids: vec![spine],
			satellite_material_file_ids: vec![satellite],
			gaps_concept_keys: vec!["recursion".to_string()],
			redundancy_notes: vec!["Heaps are covered twice".to_string()],
			..Default::default()
		});

		assert_eq!(ctx.score(spine, &keys(&["binary_search"])), 1.0);
		assert!((ctx.score(satellite, &keys(&["recursion"])) - 0.9).abs() < 1e-9);
		assert!((ctx.score(satellite, &keys(&["heaps"])) - 0.4).abs() < 1e-9);
		assert!((ctx.score(Uuid::from_u128(3), &keys(&[])) - 0.8).abs() < 1e-9);
	}

	#[test]
	fn cross_set_relevance_defaults_and_takes_max() {
		let by_key = BTreeMap::from([("a".to_string(), 0.2), ("b".to_string(), 0.9)]);

		assert_eq!(cross_set_relevance(&keys(&["a", "b", "c"]), &by_key), 0.9);
		assert_eq!(cross_set_relevance(&keys(&["c"]), &by_key), DEFAULT_CROSS_SET_RELEVANCE);
	}

	#[test]
	fn compound_weight_clamps_inputs() {
		assert_eq!(compound_weight(1.5, 1.0, 1.0, 1.0), 1.0);
		assert_eq!(compound_weight(f64::NAN, 1.0, 1.0, 1.0), 0.0);
		assert!((compound_weight(0.8, 0.5, 1.0, 0.5) - 0.2).abs() < 1e-9);
	}
}
