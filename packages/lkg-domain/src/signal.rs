//! Per-chunk instructional signals.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{clamp01, concept::normalize_concept_keys, normalize_score, outline::SECTION_PATH_SEPARATOR};

pub const FALLBACK_SIGNAL_NOTE: &str = "fallback_signal";
const MAX_TRAJECTORY_KEYS: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkRole {
	Definition,
	Explanation,
	Example,
	Exercise,
	Procedure,
	Evidence,
	Summary,
	Overview,
	Transition,
	Noise,
}
impl ChunkRole {
	pub const ALL: [Self; 10] = [
		Self::Definition,
		Self::Explanation,
		Self::Example,
		Self::Exercise,
		Self::Procedure,
		Self::Evidence,
		Self::Summary,
		Self::Overview,
		Self::Transition,
		Self::Noise,
	];

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Definition => "definition",
			Self::Explanation => "explanation",
			Self::Example => "example",
			Self::Exercise => "exercise",
			Self::Procedure => "procedure",
			Self::Evidence => "evidence",
			Self::Summary => "summary",
			Self::Overview => "overview",
			Self::Transition => "transition",
			Self::Noise => "noise",
		}
	}

	/// Lenient parse; unknown labels read as `Explanation`.
	pub fn parse(raw: &str) -> Self {
		let lowered = raw.trim().to_ascii_lowercase();

		Self::ALL.into_iter().find(|role| role.as_str() == lowered).unwrap_or(Self::Explanation)
	}
}

/// Directional role of a chunk with respect to concept keys.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Trajectory {
	pub establishes: Vec<String>,
	pub reinforces: Vec<String>,
	pub builds_on: Vec<String>,
	pub points_toward: Vec<String>,
}
impl Trajectory {
	pub fn from_value(value: Option<&Value>) -> Self {
		let Some(value) = value else {
			return Self::default();
		};

		Self {
			establishes: slot_keys(value.get("establishes")),
			reinforces: slot_keys(value.get("reinforces")),
			builds_on: slot_keys(value.get("builds_on")),
			points_toward: slot_keys(value.get("points_toward")),
		}
	}

	pub fn slots(&self) -> [(TrajectorySlot, &[String]); 4] {
		[
			(TrajectorySlot::Establishes, self.establishes.as_slice()),
			(TrajectorySlot::Reinforces, self.reinforces.as_slice()),
			(TrajectorySlot::BuildsOn, self.builds_on.as_slice()),
			(TrajectorySlot::PointsToward, self.points_toward.as_slice()),
		]
	}

	pub fn all_keys(&self) -> BTreeSet<String> {
		self.slots().into_iter().flat_map(|(_, keys)| keys.iter().cloned()).collect()
	}

	pub fn is_empty(&self) -> bool {
		self.slots().iter().all(|(_, keys)| keys.is_empty())
	}

	pub fn to_value(&self) -> Value {
		serde_json::to_value(self).unwrap_or(Value::Null)
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrajectorySlot {
	Establishes,
	Reinforces,
	BuildsOn,
	PointsToward,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignalScores {
	pub signal_strength: f64,
	pub floor_signal: f64,
	pub intent_alignment_score: f64,
	pub novelty_score: f64,
	pub density_score: f64,
	pub complexity_score: f64,
	pub load_bearing_score: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChunkSignalDraft {
	pub chunk_id: Uuid,
	pub role: ChunkRole,
	pub scores: SignalScores,
	pub trajectory: Trajectory,
	pub notes: Vec<String>,
}
impl ChunkSignalDraft {
	pub fn is_fallback(&self) -> bool {
		self.notes.iter().any(|note| note == FALLBACK_SIGNAL_NOTE)
	}
}

/// Parses `items[]` from a chunk-signal response, keeping only chunks of the batch.
pub fn parse_signal_items(value: &Value, batch: &HashSet<Uuid>) -> Vec<ChunkSignalDraft> {
	let Some(items) = value.get("items").and_then(|v| v.as_array()) else {
		return Vec::new();
	};
	let mut out = Vec::new();

	for item in items {
		let Some(chunk_id) = item
			.get("chunk_id")
			.and_then(|v| v.as_str())
			.and_then(|raw| Uuid::parse_str(raw.trim()).ok())
			.filter(|id| batch.contains(id))
		else {
			continue;
		};
		let scores = item.get("scores").unwrap_or(item);
		let signal_strength = normalize_score(scores.get("signal_strength"), 0.5);

		out.push(ChunkSignalDraft {
			chunk_id,
			role: ChunkRole::parse(&crate::string_field(item, "role")),
			scores: SignalScores {
				signal_strength,
				floor_signal: normalize_score(scores.get("floor_signal"), signal_strength * 0.5),
				intent_alignment_score: normalize_score(scores.get("intent_alignment_score"), 0.5),
				novelty_score: normalize_score(scores.get("novelty_score"), 0.5),
				density_score: normalize_score(scores.get("density_score"), 0.5),
				complexity_score: normalize_score(scores.get("complexity_score"), 0.5),
				load_bearing_score: normalize_score(scores.get("load_bearing_score"), 0.5),
			},
			trajectory: Trajectory::from_value(item.get("trajectory")),
			notes: crate::string_list(item.get("notes")),
		});
	}

	out
}

/// Lowercased substring alignment between an excerpt and intent terms.
pub fn estimate_alignment(excerpt: &str, terms: &[String]) -> f64 {
	if terms.is_empty() {
		return 0.5;
	}

	let lowered = excerpt.to_lowercase();
	let considered = terms.len().min(8);
	let matched = terms
		.iter()
		.filter(|term| !term.trim().is_empty() && lowered.contains(&term.to_lowercase()))
		.count();

	clamp01(0.2 + 0.8 * matched.min(considered) as f64 / considered as f64)
}

/// Deterministic stand-in used when the model call for a batch fails.
pub fn fallback_signal(chunk_id: Uuid, excerpt: &str, terms: &[String]) -> ChunkSignalDraft {
	let alignment = estimate_alignment(excerpt, terms);
	let lowered = excerpt.to_lowercase();
	let matched: Vec<&String> = terms.iter().filter(|term| lowered.contains(&term.to_lowercase())).collect();
	let words = excerpt.split_whitespace().count();
	let density = clamp01(words as f64 / 150.0);

	ChunkSignalDraft {
		chunk_id,
		role: ChunkRole::Explanation,
		scores: SignalScores {
			signal_strength: clamp01(0.3 + 0.4 * alignment),
			floor_signal: 0.2,
			intent_alignment_score: alignment,
			novelty_score: 0.5,
			density_score: density,
			complexity_score: 0.5,
			load_bearing_score: 0.3,
		},
		trajectory: Trajectory {
			reinforces: normalize_concept_keys(matched).into_iter().take(MAX_TRAJECTORY_KEYS).collect(),
			..Default::default()
		},
		notes: vec![FALLBACK_SIGNAL_NOTE.to_string()],
	}
}

/// Keeps one draft per chunk: the one with the highest `signal_strength`.
pub fn dedupe_signals(drafts: Vec<ChunkSignalDraft>) -> Vec<ChunkSignalDraft> {
	let mut best: BTreeMap<Uuid, ChunkSignalDraft> = BTreeMap::new();

	for draft in drafts {
		match best.get(&draft.chunk_id) {
			Some(existing) if existing.scores.signal_strength >= draft.scores.signal_strength => {},
			_ => {
				best.insert(draft.chunk_id, draft);
			},
		}
	}

	best.into_values().collect()
}

/// Page/time span of an outline section, used to place chunks.
#[derive(Clone, Debug, PartialEq)]
pub struct SectionSpan {
	pub path: String,
	pub start_page: Option<i32>,
	pub end_page: Option<i32>,
	pub start_sec: Option<f64>,
	pub end_sec: Option<f64>,
}
impl SectionSpan {
	fn depth(&self) -> usize {
		self.path.matches(SECTION_PATH_SEPARATOR).count() + 1
	}

	fn page_width(&self) -> i32 {
		match (self.start_page, self.end_page) {
			(Some(start), Some(end)) => (end - start).abs(),
			_ => i32::MAX,
		}
	}

	fn matches(&self, page: Option<i32>, start_sec: Option<f64>, end_sec: Option<f64>) -> bool {
		if let (Some(page), Some(start)) = (page, self.start_page) {
			let end = self.end_page.unwrap_or(start);

			return start <= page && page <= end;
		}
		if let (Some(chunk_start), Some(start)) = (start_sec, self.start_sec) {
			let chunk_end = end_sec.unwrap_or(chunk_start);
			let end = self.end_sec.unwrap_or(start);

			return chunk_start <= end && start <= chunk_end;
		}

		false
	}
}

/// Deepest section whose page or time span overlaps the chunk; narrower spans win ties.
pub fn map_chunk_section(
	page: Option<i32>,
	start_sec: Option<f64>,
	end_sec: Option<f64>,
	sections: &[SectionSpan],
) -> Option<String> {
	sections
		.iter()
		.enumerate()
		.filter(|(_, section)| section.matches(page, start_sec, end_sec))
		.max_by(|(ia, a), (ib, b)| {
			a.depth()
				.cmp(&b.depth())
				.then(b.page_width().cmp(&a.page_width()))
				.then(ib.cmp(ia))
		})
		.map(|(_, section)| section.path.clone())
}

fn slot_keys(value: Option<&Value>) -> Vec<String> {
	let mut keys = normalize_concept_keys(crate::string_list(value));

	keys.truncate(MAX_TRAJECTORY_KEYS);

	keys
}
