//! Set-level aggregation of chunk signals: concept coverage, file edges, chunk links.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
	clamp01,
	signal::{ChunkRole, Trajectory, TrajectorySlot},
};

/// Score credited to signature concept keys that no chunk signal mentions.
pub const SIGNATURE_SEED_SCORE: f64 = 0.35;
pub const MIN_EDGE_STRENGTH: f64 = 0.18;
pub const MAX_BRIDGING_CONCEPTS: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageType {
	Introduces,
	Reinforces,
	Assumes,
	Mentions,
}
impl CoverageType {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Introduces => "introduces",
			Self::Reinforces => "reinforces",
			Self::Assumes => "assumes",
			Self::Mentions => "mentions",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw {
			"introduces" => Some(Self::Introduces),
			"reinforces" => Some(Self::Reinforces),
			"assumes" => Some(Self::Assumes),
			"mentions" => Some(Self::Mentions),
			_ => None,
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageDepth {
	Surface,
	Moderate,
	Thorough,
}
impl CoverageDepth {
	pub fn from_score(score: f64) -> Self {
		if score >= 0.75 {
			Self::Thorough
		} else if score >= 0.45 {
			Self::Moderate
		} else {
			Self::Surface
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Surface => "surface",
			Self::Moderate => "moderate",
			Self::Thorough => "thorough",
		}
	}

	pub fn parse(raw: &str) -> Self {
		match raw {
			"thorough" => Self::Thorough,
			"moderate" => Self::Moderate,
			_ => Self::Surface,
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
	Prerequisite,
	Reinforces,
	Extends,
	Alternative,
}
impl EdgeType {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Prerequisite => "prerequisite",
			Self::Reinforces => "reinforces",
			Self::Extends => "extends",
			Self::Alternative => "alternative",
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkRelation {
	Reinforces,
	Redundant,
}
impl LinkRelation {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Reinforces => "reinforces",
			Self::Redundant => "redundant",
		}
	}
}

/// The fields of a stored chunk signal that aggregation reads.
#[derive(Clone, Debug)]
pub struct SignalView {
	pub chunk_id: Uuid,
	pub file_id: Uuid,
	pub role: ChunkRole,
	pub signal_strength: f64,
	pub trajectory: Trajectory,
}

/// Per-file max score per concept key, per trajectory slot.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FileConceptStat {
	pub establishes: BTreeMap<String, f64>,
	pub reinforces: BTreeMap<String, f64>,
	pub builds_on: BTreeMap<String, f64>,
	pub points_toward: BTreeMap<String, f64>,
}
impl FileConceptStat {
	fn slot_mut(&mut self, slot: TrajectorySlot) -> &mut BTreeMap<String, f64> {
		match slot {
			TrajectorySlot::Establishes => &mut self.establishes,
			TrajectorySlot::Reinforces => &mut self.reinforces,
			TrajectorySlot::BuildsOn => &mut self.builds_on,
			TrajectorySlot::PointsToward => &mut self.points_toward,
		}
	}

	fn record(&mut self, slot: TrajectorySlot, key: &str, score: f64) {
		let entry = self.slot_mut(slot).entry(key.to_string()).or_insert(score);

		if score > *entry {
			*entry = score;
		}
	}

	pub fn keys(slot: &BTreeMap<String, f64>) -> BTreeSet<&str> {
		slot.keys().map(String::as_str).collect()
	}
}

#[derive(Default)]
struct ConceptAggregate {
	score_sum: f64,
	score_count: usize,
	file_ids: BTreeSet<Uuid>,
	slots: BTreeSet<TrajectorySlot>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoverageRow {
	pub concept_key: String,
	pub coverage_type: CoverageType,
	pub depth: CoverageDepth,
	pub score: f64,
	pub source_material_file_ids: Vec<Uuid>,
}

#[derive(Clone, Debug, Default)]
pub struct CoverageAggregation {
	pub rows: Vec<CoverageRow>,
	pub file_stats: BTreeMap<Uuid, FileConceptStat>,
}

/// Aggregates concept coverage from chunk signals, seeded by signature concept keys.
///
/// Rows come out sorted by concept key; input order does not matter.
pub fn aggregate_coverage(
	signals: &[SignalView],
	signature_keys: &[(Uuid, Vec<String>)],
) -> CoverageAggregation {
	let mut aggregates: BTreeMap<String, ConceptAggregate> = BTreeMap::new();
	let mut file_stats: BTreeMap<Uuid, FileConceptStat> = BTreeMap::new();
	let mut ordered: Vec<&SignalView> = signals.iter().collect();

	// Scores are summed in chunk-id order.
	ordered.sort_by_key(|signal| signal.chunk_id);

	for signal in ordered {
		let score = clamp01(signal.signal_strength);

		for (slot, keys) in signal.trajectory.slots() {
			for key in keys {
				file_stats.entry(signal.file_id).or_default().record(slot, key, score);

				let agg = aggregates.entry(key.clone()).or_default();

				agg.score_sum += score;
				agg.score_count += 1;
				agg.file_ids.insert(signal.file_id);
				agg.slots.insert(slot);
			}
		}
	}
	let signal_keys: BTreeSet<String> = aggregates.keys().cloned().collect();

	for (file_id, keys) in signature_keys {
		for key in keys {
			file_stats.entry(*file_id).or_default().record(
				TrajectorySlot::PointsToward,
				key,
				SIGNATURE_SEED_SCORE,
			);

			if signal_keys.contains(key) {
				continue;
			}

			let agg = aggregates.entry(key.clone()).or_default();

			agg.score_sum += SIGNATURE_SEED_SCORE;
			agg.score_count += 1;
			agg.file_ids.insert(*file_id);
			agg.slots.insert(TrajectorySlot::PointsToward);
		}
	}

	let rows = aggregates
		.into_iter()
		.filter(|(_, agg)| agg.score_count > 0)
		.map(|(concept_key, agg)| {
			let score = clamp01(agg.score_sum / agg.score_count as f64);

			CoverageRow {
				concept_key,
				coverage_type: coverage_type_for(&agg.slots),
				depth: CoverageDepth::from_score(score),
				score,
				source_material_file_ids: agg.file_ids.into_iter().collect(),
			}
		})
		.collect();

	CoverageAggregation { rows, file_stats }
}

fn coverage_type_for(slots: &BTreeSet<TrajectorySlot>) -> CoverageType {
	if slots.contains(&TrajectorySlot::Establishes) {
		CoverageType::Introduces
	} else if slots.contains(&TrajectorySlot::Reinforces) {
		CoverageType::Reinforces
	} else if slots.contains(&TrajectorySlot::BuildsOn) {
		CoverageType::Assumes
	} else {
		CoverageType::Mentions
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileEdge {
	pub from_file_id: Uuid,
	pub to_file_id: Uuid,
	pub edge_type: EdgeType,
	pub strength: f64,
	pub bridging_concepts: Vec<String>,
}

/// Derives file→file edges from per-file concept stats.
///
/// For each ordered pair the edge type with the largest `|overlap| / |target slot|` wins;
/// earlier candidates win ties. Edges below [`MIN_EDGE_STRENGTH`] are dropped.
pub fn derive_file_edges(file_stats: &BTreeMap<Uuid, FileConceptStat>) -> Vec<FileEdge> {
	let mut best: BTreeMap<(Uuid, Uuid, EdgeType), FileEdge> = BTreeMap::new();

	for (from, a) in file_stats {
		for (to, b) in file_stats {
			if from == to {
				continue;
			}

			let a_est = FileConceptStat::keys(&a.establishes);
			let a_next = FileConceptStat::keys(&a.points_toward);
			let candidates = [
				(EdgeType::Prerequisite, &a_est, FileConceptStat::keys(&b.builds_on)),
				(EdgeType::Reinforces, &a_est, FileConceptStat::keys(&b.reinforces)),
				(EdgeType::Extends, &a_next, FileConceptStat::keys(&b.establishes)),
				(EdgeType::Alternative, &a_est, FileConceptStat::keys(&b.establishes)),
			];
			let mut chosen: Option<(EdgeType, f64, Vec<String>)> = None;

			for (edge_type, source, target) in candidates {
				if target.is_empty() {
					continue;
				}

				let overlap: Vec<String> =
					source.intersection(&target).map(|key| key.to_string()).collect();
				let strength = clamp01(overlap.len() as f64 / target.len() as f64);

				if chosen.as_ref().map(|(_, current, _)| strength > *current).unwrap_or(true) {
					chosen = Some((edge_type, strength, overlap));
				}
			}

			let Some((edge_type, strength, mut bridging)) = chosen else {
				continue;
			};

			if strength < MIN_EDGE_STRENGTH {
				continue;
			}

			bridging.truncate(MAX_BRIDGING_CONCEPTS);

			let key = (*from, *to, edge_type);
			let keep = best.get(&key).map(|existing| strength > existing.strength).unwrap_or(true);

			if keep {
				best.insert(key, FileEdge {
					from_file_id: *from,
					to_file_id: *to,
					edge_type,
					strength,
					bridging_concepts: bridging,
				});
			}
		}
	}

	best.into_values().collect()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkLink {
	pub from_chunk_id: Uuid,
	pub to_chunk_id: Uuid,
	pub relation: LinkRelation,
	pub strength: f64,
	pub concept_key: String,
}

/// Links chunks that share a concept key.
///
/// Buckets are visited in key order; each keeps its `max_per_concept` strongest chunks and emits
/// all pairs until `max_total` links exist. A pair seen under several concepts keeps its
/// strongest link.
pub fn derive_chunk_links(
	signals: &[SignalView],
	max_per_concept: usize,
	max_total: usize,
) -> Vec<ChunkLink> {
	let mut buckets: BTreeMap<&str, BTreeMap<Uuid, &SignalView>> = BTreeMap::new();

	for signal in signals {
		for (_, keys) in signal.trajectory.slots() {
			for key in keys {
				buckets.entry(key.as_str()).or_default().insert(signal.chunk_id, signal);
			}
		}
	}

	let mut links: BTreeMap<(Uuid, Uuid), ChunkLink> = BTreeMap::new();

	'buckets: for (concept_key, members) in buckets {
		let mut ranked: Vec<&SignalView> = members.into_values().collect();

		ranked.sort_by(|a, b| {
			b.signal_strength
				.partial_cmp(&a.signal_strength)
				.unwrap_or(std::cmp::Ordering::Equal)
				.then(a.chunk_id.cmp(&b.chunk_id))
		});
		ranked.truncate(max_per_concept);

		for i in 0..ranked.len() {
			for j in (i + 1)..ranked.len() {
				let (a, b) = (ranked[i], ranked[j]);
				let (from, to) =
					if a.chunk_id <= b.chunk_id { (a.chunk_id, b.chunk_id) } else { (b.chunk_id, a.chunk_id) };
				let strength = clamp01((a.signal_strength + b.signal_strength) / 2.0);
				let relation =
					if a.role == b.role { LinkRelation::Redundant } else { LinkRelation::Reinforces };

				match links.get_mut(&(from, to)) {
					Some(existing) => {
						if strength > existing.strength {
							existing.strength = strength;
							existing.concept_key = concept_key.to_string();
						}
					},
					None => {
						if links.len() >= max_total {
							break 'buckets;
						}

						links.insert((from, to), ChunkLink {
							from_chunk_id: from,
							to_chunk_id: to,
							relation,
							strength,
							concept_key: concept_key.to_string(),
						});
					},
				}
			}
		}
	}

	links.into_values().collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	fn view(chunk: u128, file: u128, role: ChunkRole, strength: f64, trajectory: Trajectory) -> SignalView {
		SignalView {
			chunk_id: Uuid::from_u128(chunk),
			file_id: Uuid::from_u128(file),
			role,
			signal_strength: strength,
			trajectory,
		}
	}

	fn keys(raw: &[&str]) -> Vec<String> {
		raw.iter().map(|k| k.to_string()).collect()
	}

	#[test]
	fn coverage_type_follows_slot_precedence() {
		let signals = vec![
			view(1, 10, ChunkRole::Definition, 0.9, Trajectory {
				establishes: keys(&["graphs"]),
				builds_on: keys(&["sets"]),
				..Default::default()
			}),
			view(2, 11, ChunkRole::Example, 0.5, Trajectory {
				reinforces: keys(&["graphs"]),
				..Default::default()
			}),
		];
		let agg = aggregate_coverage(&signals, &[(Uuid::from_u128(11), keys(&["trees"]))]);
		let by_key: BTreeMap<_, _> = agg.rows.iter().map(|r| (r.concept_key.as_str(), r)).collect();

		assert_eq!(by_key["graphs"].coverage_type, CoverageType::Introduces);
		assert!((by_key["graphs"].score - 0.7).abs() < 1e-9);
		assert_eq!(by_key["graphs"].depth, CoverageDepth::Moderate);
		assert_eq!(by_key["sets"].coverage_type, CoverageType::Assumes);
		assert_eq!(by_key["trees"].coverage_type, CoverageType::Mentions);
		assert_eq!(by_key["trees"].depth, CoverageDepth::Surface);
		assert_eq!(
			by_key["graphs"].source_material_file_ids,
			vec![Uuid::from_u128(10), Uuid::from_u128(11)]
		);
	}

	#[test]
	fn signature_seed_only_scores_unmentioned_concepts() {
		let file = Uuid::from_u128(10);
		let signals = vec![view(1, 10, ChunkRole::Definition, 0.9, Trajectory {
			establishes: keys(&["graphs"]),
			..Default::default()
		})];
		let agg = aggregate_coverage(&signals, &[(file, keys(&["graphs", "trees"]))]);
		let by_key: BTreeMap<_, _> = agg.rows.iter().map(|r| (r.concept_key.as_str(), r)).collect();

		assert!((by_key["graphs"].score - 0.9).abs() < 1e-9);
		assert_eq!(by_key["graphs"].depth, CoverageDepth::Thorough);
		assert_eq!(by_key["graphs"].coverage_type, CoverageType::Introduces);
		assert!((by_key["trees"].score - SIGNATURE_SEED_SCORE).abs() < 1e-9);
		assert_eq!(by_key["trees"].depth, CoverageDepth::Surface);
		assert!(agg.file_stats[&file].points_toward.contains_key("graphs"));
		assert!(agg.file_stats[&file].points_toward.contains_key("trees"));
	}

	#[test]
	fn edges_pick_best_ratio_and_skip_self_loops() {
		let mut stats = BTreeMap::new();
		let mut a = FileConceptStat::default();
		let mut b = FileConceptStat::default();

		a.establishes.insert("sets".to_string(), 0.9);
		a.establishes.insert("relations".to_string(), 0.8);
		b.builds_on.insert("sets".to_string(), 0.6);
		b.builds_on.insert("logic".to_string(), 0.6);
		b.establishes.insert("graphs".to_string(), 0.7);
		stats.insert(Uuid::from_u128(1), a);
		stats.insert(Uuid::from_u128(2), b);

		let edges = derive_file_edges(&stats);

		assert_eq!(edges.len(), 1);
		assert_eq!(edges[0].from_file_id, Uuid::from_u128(1));
		assert_eq!(edges[0].edge_type, EdgeType::Prerequisite);
		assert!((edges[0].strength - 0.5).abs() < 1e-9);
		assert_eq!(edges[0].bridging_concepts, keys(&["sets"]));
	}

	#[test]
	fn chunk_links_respect_caps_and_roles() {
		let shared = Trajectory { reinforces: keys(&["graphs"]), ..Default::default() };
		let signals = vec![
			view(1, 1, ChunkRole::Example, 0.9, shared.clone()),
			view(2, 1, ChunkRole::Example, 0.7, shared.clone()),
			view(3, 2, ChunkRole::Definition, 0.5, shared.clone()),
			view(4, 2, ChunkRole::Definition, 0.1, shared),
		];
		let links = derive_chunk_links(&signals, 3, 10);

		assert_eq!(links.len(), 3);
		assert!(links.iter().all(|l| l.from_chunk_id != Uuid::from_u128(4) && l.to_chunk_id != Uuid::from_u128(4)));

		let redundant = links
			.iter()
			.find(|l| l.from_chunk_id == Uuid::from_u128(1) && l.to_chunk_id == Uuid::from_u128(2))
			.expect("pair 1-2");

		assert_eq!(redundant.relation, LinkRelation::Redundant);
		assert!((redundant.strength - 0.8).abs() < 1e-9);
		assert_eq!(derive_chunk_links(&signals, 3, 2).len(), 2);
	}
}
