//! Sanity checks over the counts of a finished build.
//!
//! Every threshold is a lower bound on some count, so raising one can only turn a passing check
//! into a failing one, never the reverse.

use serde::{Deserialize, Serialize};

/// Sets with at least this many pages must yield a rich concept inventory.
pub const LARGE_SET_PAGES: u32 = 200;
/// Sets with at most this many pages must stay compact.
pub const SMALL_SET_PAGES: u32 = 50;
pub const SMALL_SET_MAX_NODES: u32 = 24;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcceptanceInput {
	pub page_count: u32,
	pub file_count: u32,
	pub concept_count: u32,
	pub node_count: u32,
	pub uncovered_concepts: u32,
	pub prompt_size_errors: u32,
	pub unit_count: u32,
	pub lesson_count: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AcceptanceThresholds {
	pub large_set_min_concepts: u32,
	pub nodes_per_concept: f64,
	pub small_set_min_nodes: u32,
	/// Warning only.
	pub min_covered_ratio: f64,
}
impl Default for AcceptanceThresholds {
	fn default() -> Self {
		Self {
			large_set_min_concepts: 40,
			nodes_per_concept: 0.1,
			small_set_min_nodes: 1,
			min_covered_ratio: 0.8,
		}
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AcceptanceCheck {
	pub id: String,
	pub passed: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub warning: Option<String>,
}
impl AcceptanceCheck {
	fn new(id: &str, passed: bool) -> Self {
		Self { id: id.to_string(), passed, warning: None }
	}

	fn warn(mut self, warning: String) -> Self {
		self.warning = Some(warning);

		self
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AcceptanceReport {
	pub passed: bool,
	pub checks: Vec<AcceptanceCheck>,
}
impl AcceptanceReport {
	pub fn check(&self, id: &str) -> Option<&AcceptanceCheck> {
		self.checks.iter().find(|check| check.id == id)
	}
}

pub fn evaluate(input: &AcceptanceInput, thresholds: &AcceptanceThresholds) -> AcceptanceReport {
	let mut checks = Vec::new();
	let is_large = input.page_count >= LARGE_SET_PAGES;
	let is_small = input.page_count <= SMALL_SET_PAGES;
	let mut large = AcceptanceCheck::new(
		"large_set_concepts",
		!is_large || input.concept_count >= thresholds.large_set_min_concepts,
	);

	if is_large && !large.passed {
		large = large.warn(format!(
			"{} concepts for {} pages, expected at least {}",
			input.concept_count, input.page_count, thresholds.large_set_min_concepts
		));
	}

	checks.push(large);

	let required_nodes = if input.concept_count == 0 {
		0
	} else {
		((input.concept_count as f64 * thresholds.nodes_per_concept.max(0.0)).ceil() as u32).max(1)
	};
	let mut scale =
		AcceptanceCheck::new("nodes_scale_with_concepts", input.node_count >= required_nodes);

	if !scale.passed {
		scale = scale.warn(format!(
			"{} nodes for {} concepts, expected at least {required_nodes}",
			input.node_count, input.concept_count
		));
	}

	checks.push(scale);

	let small_ok = !is_small
		|| (input.node_count >= thresholds.small_set_min_nodes
			&& input.node_count <= SMALL_SET_MAX_NODES);

	checks.push(AcceptanceCheck::new("small_set_node_counts", small_ok));
	checks.push(AcceptanceCheck::new("prompt_size_failures", input.prompt_size_errors == 0));

	let mut coverage = AcceptanceCheck::new("concept_coverage", true);

	if input.concept_count > 0 {
		let covered = input.concept_count.saturating_sub(input.uncovered_concepts) as f64
			/ input.concept_count as f64;

		if covered < thresholds.min_covered_ratio {
			coverage = coverage.warn(format!(
				"{} of {} concepts uncovered",
				input.uncovered_concepts, input.concept_count
			));
		}
	}

	checks.push(coverage);

	if input.file_count == 0 {
		checks.push(
			AcceptanceCheck::new("files_present", true).warn("no files reported".to_string()),
		);
	}

	AcceptanceReport { passed: checks.iter().all(|check| check.passed), checks }
}
