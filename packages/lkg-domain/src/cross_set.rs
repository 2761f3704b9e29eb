//! Aggregation across all source material sets of one user.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
	clamp01,
	concept::normalize_concept_key,
	coverage::{CoverageDepth, CoverageType, MAX_BRIDGING_CONCEPTS},
};

pub const PREREQUISITE_OVERLAP: f64 = 0.30;
pub const PARALLEL_OVERLAP: f64 = 0.20;
const EXPOSURE_SATURATION_SETS: f64 = 5.0;
const BRIDGING_BOOST: f64 = 0.20;
const EMERGENT_PREREQ_BOOST: f64 = 0.25;
const GAP_BOOST: f64 = 0.20;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetRelation {
	Prerequisite,
	Parallel,
	Extends,
	Overlaps,
}
impl SetRelation {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Prerequisite => "prerequisite",
			Self::Parallel => "parallel",
			Self::Extends => "extends",
			Self::Overlaps => "overlaps",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw.trim().to_ascii_lowercase().as_str() {
			"prerequisite" => Some(Self::Prerequisite),
			"parallel" => Some(Self::Parallel),
			"extends" => Some(Self::Extends),
			"overlaps" => Some(Self::Overlaps),
			_ => None,
		}
	}
}

/// One coverage row of one source set.
#[derive(Clone, Debug, PartialEq)]
pub struct SetCoverage {
	pub material_set_id: Uuid,
	pub concept_key: String,
	pub coverage_type: CoverageType,
	pub score: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SetEdgeDraft {
	pub from_set_id: Uuid,
	pub to_set_id: Uuid,
	pub relation: SetRelation,
	pub strength: f64,
	pub bridging_concept_keys: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GlobalCoverageDraft {
	pub concept_key: String,
	pub material_set_ids: Vec<Uuid>,
	pub coverage_depth: CoverageDepth,
	pub mean_score: f64,
	pub exposure_score: f64,
	pub cross_set_relevance: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EmergentConceptDraft {
	pub key: String,
	pub name: String,
	pub summary: String,
	pub source_material_set_ids: Vec<Uuid>,
	pub prereq_concept_keys: Vec<String>,
}

#[derive(Default)]
struct SetKeys {
	introduces: BTreeSet<String>,
	reinforces: BTreeSet<String>,
	assumes: BTreeSet<String>,
}

/// Deterministic set→set edges from per-set coverage.
pub fn derive_set_edges(coverage: &[SetCoverage]) -> Vec<SetEdgeDraft> {
	let mut by_set: BTreeMap<Uuid, SetKeys> = BTreeMap::new();

	for row in coverage {
		let keys = by_set.entry(row.material_set_id).or_default();
		let slot = match row.coverage_type {
			CoverageType::Introduces => &mut keys.introduces,
			CoverageType::Reinforces => &mut keys.reinforces,
			CoverageType::Assumes => &mut keys.assumes,
			CoverageType::Mentions => continue,
		};

		slot.insert(row.concept_key.clone());
	}

	let mut edges = Vec::new();

	for (from, a) in &by_set {
		for (to, b) in &by_set {
			if from == to {
				continue;
			}
			if let Some((strength, bridging)) = overlap(&a.introduces, &b.assumes)
				&& strength >= PREREQUISITE_OVERLAP
			{
				edges.push(SetEdgeDraft {
					from_set_id: *from,
					to_set_id: *to,
					relation: SetRelation::Prerequisite,
					strength,
					bridging_concept_keys: bridging,
				});

				continue;
			}
			if let Some((strength, bridging)) = overlap(&a.reinforces, &b.reinforces)
				&& strength > PARALLEL_OVERLAP
			{
				edges.push(SetEdgeDraft {
					from_set_id: *from,
					to_set_id: *to,
					relation: SetRelation::Parallel,
					strength,
					bridging_concept_keys: bridging,
				});
			}
		}
	}

	edges
}

fn overlap(source: &BTreeSet<String>, target: &BTreeSet<String>) -> Option<(f64, Vec<String>)> {
	if target.is_empty() {
		return None;
	}

	let shared: Vec<String> = source.intersection(target).cloned().collect();
	let strength = clamp01(shared.len() as f64 / target.len() as f64);

	Some((strength, shared.into_iter().take(MAX_BRIDGING_CONCEPTS).collect()))
}

/// Relevance boosts known before global coverage is computed.
#[derive(Clone, Debug, Default)]
pub struct RelevanceBoosts {
	pub bridging: BTreeSet<String>,
	pub emergent_prereqs: BTreeSet<String>,
	pub gaps: BTreeSet<String>,
}
impl RelevanceBoosts {
	pub fn from_edges(edges: &[SetEdgeDraft]) -> BTreeSet<String> {
		edges.iter().flat_map(|edge| edge.bridging_concept_keys.iter().cloned()).collect()
	}
}

/// One row per concept key, sorted by key.
pub fn aggregate_global_coverage(
	coverage: &[SetCoverage],
	boosts: &RelevanceBoosts,
) -> Vec<GlobalCoverageDraft> {
	#[derive(Default)]
	struct Acc {
		sets: BTreeSet<Uuid>,
		score_sum: f64,
		count: usize,
		best_depth: Option<CoverageDepth>,
	}

	let mut by_key: BTreeMap<&str, Acc> = BTreeMap::new();

	for row in coverage {
		let acc = by_key.entry(row.concept_key.as_str()).or_default();
		let depth = CoverageDepth::from_score(row.score);

		acc.sets.insert(row.material_set_id);
		acc.score_sum += clamp01(row.score);
		acc.count += 1;
		acc.best_depth = Some(acc.best_depth.map_or(depth, |current| current.max(depth)));
	}

	by_key
		.into_iter()
		.map(|(key, acc)| {
			let mean_score = if acc.count == 0 { 0.0 } else { clamp01(acc.score_sum / acc.count as f64) };
			let exposure_score = clamp01(acc.sets.len() as f64 / EXPOSURE_SATURATION_SETS);
			let mut boost = 0.0;

			if boosts.bridging.contains(key) {
				boost += BRIDGING_BOOST;
			}
			if boosts.emergent_prereqs.contains(key) {
				boost += EMERGENT_PREREQ_BOOST;
			}
			if boosts.gaps.contains(key) {
				boost += GAP_BOOST;
			}

			GlobalCoverageDraft {
				concept_key: key.to_string(),
				material_set_ids: acc.sets.into_iter().collect(),
				coverage_depth: acc.best_depth.unwrap_or(CoverageDepth::Surface),
				mean_score,
				exposure_score,
				cross_set_relevance: clamp01(0.35 * mean_score + 0.45 * exposure_score + boost),
			}
		})
		.collect()
}

/// Parses `emergent_concepts[]` from a `cross_set_signal` response.
pub fn parse_emergent_concepts(value: &Value, known_sets: &BTreeSet<Uuid>) -> Vec<EmergentConceptDraft> {
	let Some(items) = value.get("emergent_concepts").and_then(|v| v.as_array()) else {
		return Vec::new();
	};
	let mut seen = BTreeSet::new();
	let mut out = Vec::new();

	for item in items {
		let name = crate::string_field(item, "name");
		let Some(key) = normalize_concept_key(&crate::string_field(item, "key"))
			.or_else(|| normalize_concept_key(&name))
		else {
			continue;
		};

		if !seen.insert(key.clone()) {
			continue;
		}

		out.push(EmergentConceptDraft {
			name: if name.is_empty() { crate::concept::key_phrase(&key) } else { name },
			summary: crate::string_field(item, "summary"),
			source_material_set_ids: set_ids(item.get("source_material_set_ids"), known_sets),
			prereq_concept_keys: crate::concept::normalize_concept_keys(crate::string_list(
				item.get("prereq_concept_keys"),
			)),
			key,
		});
	}

	out
}

/// Parses extra `set_edges[]` proposed by the model; self-loops and unknown sets are dropped.
pub fn parse_proposed_set_edges(value: &Value, known_sets: &BTreeSet<Uuid>) -> Vec<SetEdgeDraft> {
	let Some(items) = value.get("set_edges").and_then(|v| v.as_array()) else {
		return Vec::new();
	};

	items
		.iter()
		.filter_map(|item| {
			let from = parse_set_id(item.get("from_material_set_id"), known_sets)?;
			let to = parse_set_id(item.get("to_material_set_id"), known_sets)?;
			let relation = SetRelation::parse(&crate::string_field(item, "relation"))?;

			if from == to {
				return None;
			}

			Some(SetEdgeDraft {
				from_set_id: from,
				to_set_id: to,
				relation,
				strength: crate::normalize_score(item.get("strength"), 0.5),
				bridging_concept_keys: crate::concept::normalize_concept_keys(crate::string_list(
					item.get("bridging_concept_keys"),
				))
				.into_iter()
				.take(MAX_BRIDGING_CONCEPTS)
				.collect(),
			})
		})
		.collect()
}

/// Merges edges by `(from, to, relation)`, keeping the strongest.
pub fn merge_set_edges(edges: Vec<SetEdgeDraft>) -> Vec<SetEdgeDraft> {
	let mut best: BTreeMap<(Uuid, Uuid, SetRelation), SetEdgeDraft> = BTreeMap::new();

	for edge in edges {
		let key = (edge.from_set_id, edge.to_set_id, edge.relation);

		match best.get(&key) {
			Some(existing) if existing.strength >= edge.strength => {},
			_ => {
				best.insert(key, edge);
			},
		}
	}

	best.into_values().collect()
}

fn parse_set_id(value: Option<&Value>, known: &BTreeSet<Uuid>) -> Option<Uuid> {
	value
		.and_then(|v| v.as_str())
		.and_then(|raw| Uuid::parse_str(raw.trim()).ok())
		.filter(|id| known.contains(id))
}

fn set_ids(value: Option<&Value>, known: &BTreeSet<Uuid>) -> Vec<Uuid> {
	crate::string_list(value)
		.iter()
		.filter_map(|raw| Uuid::parse_str(raw).ok())
		.filter(|id| known.contains(id))
		.collect::<BTreeSet<_>>()
		.into_iter()
		.collect()
}
