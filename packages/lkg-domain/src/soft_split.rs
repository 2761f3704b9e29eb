//! Sanity check for multi-path proposals that may really be one subject.

use std::collections::{BTreeSet, HashMap};

use unicode_segmentation::UnicodeSegmentation;

use crate::intake::{ClarifyingQuestion, IntakeProposal};

pub const STRUCTURE_CLARIFY_ID: &str = "structure_clarify";
const JACCARD_STRONG: f64 = 0.35;
const JACCARD_WEAK: f64 = 0.25;
const LOW_CONFIDENCE: f64 = 0.55;
const COSINE_STRONG: f64 = 0.72;
const PAIR_SCORE_STRONG: f64 = 0.70;
const MIN_TOKEN_CHARS: usize = 3;
const WEAK_NOTE_MARKERS: [&str; 6] =
	["unclear", "uncertain", "overlap", "could be combined", "same subject", "not sure"];

/// Per-path text and embeddings gathered from file signatures.
#[derive(Clone, Debug, Default)]
pub struct PathEvidence {
	pub path_id: String,
	pub text: String,
	pub confidence: f64,
	pub embeddings: Vec<Vec<f32>>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SoftSplitReport {
	pub max_jaccard: f64,
	pub max_cosine: f64,
	pub max_pair_score: f64,
	pub min_confidence: f64,
	pub weak_notes: bool,
	pub triggered: bool,
	pub reasons: Vec<String>,
}

pub fn token_set(text: &str) -> BTreeSet<String> {
	text.unicode_words()
		.map(str::to_lowercase)
		.filter(|word| word.chars().count() >= MIN_TOKEN_CHARS)
		.collect()
}

pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
	let union = a.union(b).count();

	if union == 0 {
		return 0.0;
	}

	a.intersection(b).count() as f64 / union as f64
}

pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
	if a.len() != b.len() || a.is_empty() {
		return 0.0;
	}

	let (mut dot, mut na, mut nb) = (0.0_f64, 0.0_f64, 0.0_f64);

	for (x, y) in a.iter().zip(b) {
		let (x, y) = (f64::from(*x), f64::from(*y));

		dot += x * y;
		na += x * x;
		nb += y * y;
	}

	if na == 0.0 || nb == 0.0 {
		return 0.0;
	}

	dot / (na.sqrt() * nb.sqrt())
}

/// Component-wise mean of equally sized vectors; mismatched vectors are skipped.
pub fn mean_vector(vectors: &[Vec<f32>]) -> Option<Vec<f32>> {
	let dim = vectors.iter().find(|v| !v.is_empty())?.len();
	let mut sum = vec![0.0_f64; dim];
	let mut count = 0_usize;

	for vector in vectors.iter().filter(|v| v.len() == dim) {
		for (acc, value) in sum.iter_mut().zip(vector) {
			*acc += f64::from(*value);
		}

		count += 1;
	}

	Some(sum.into_iter().map(|value| (value / count as f64) as f32).collect())
}

pub fn has_weak_notes(proposal: &IntakeProposal) -> bool {
	let mut texts = vec![proposal.material_alignment.notes.as_str()];

	texts.extend(proposal.paths.iter().map(|path| path.notes.as_str()));
	texts.extend(proposal.learning_intent.uncertainty_notes.iter().map(String::as_str));

	texts.iter().any(|text| {
		let lowered = text.to_lowercase();

		WEAK_NOTE_MARKERS.iter().any(|marker| lowered.contains(marker))
	})
}

/// Evaluates path pairs. `pair_scores` holds optional model "teach together" scores keyed by
/// `(path_id, path_id)` in either order.
pub fn evaluate_soft_split(
	proposal: &IntakeProposal,
	evidence: &[PathEvidence],
	pair_scores: &HashMap<(String, String), f64>,
) -> SoftSplitReport {
	let mut report = SoftSplitReport { min_confidence: 1.0, ..Default::default() };

	if proposal.paths.len() < 2 {
		report.min_confidence = proposal.paths.first().map(|p| p.confidence).unwrap_or(1.0);

		return report;
	}

	let tokens: Vec<BTreeSet<String>> = evidence.iter().map(|e| token_set(&e.text)).collect();
	let means: Vec<Option<Vec<f32>>> = evidence.iter().map(|e| mean_vector(&e.embeddings)).collect();

	report.min_confidence =
		evidence.iter().map(|e| crate::clamp01(e.confidence)).fold(1.0, f64::min);

	for i in 0..evidence.len() {
		for j in (i + 1)..evidence.len() {
			report.max_jaccard = report.max_jaccard.max(jaccard(&tokens[i], &tokens[j]));

			if let (Some(a), Some(b)) = (&means[i], &means[j]) {
				report.max_cosine = report.max_cosine.max(cosine(a, b));
			}

			let key = (evidence[i].path_id.clone(), evidence[j].path_id.clone());
			let reversed = (key.1.clone(), key.0.clone());

			if let Some(score) = pair_scores.get(&key).or_else(|| pair_scores.get(&reversed)) {
				report.max_pair_score = report.max_pair_score.max(crate::clamp01(*score));
			}
		}
	}

	report.weak_notes = has_weak_notes(proposal);

	if report.max_jaccard >= JACCARD_STRONG {
		report.reasons.push(format!("jaccard {:.2}", report.max_jaccard));
	}
	if report.max_jaccard >= JACCARD_WEAK && report.min_confidence < LOW_CONFIDENCE {
		report.reasons.push(format!(
			"jaccard {:.2} with confidence {:.2}",
			report.max_jaccard, report.min_confidence
		));
	}
	if report.max_cosine >= COSINE_STRONG {
		report.reasons.push(format!("cosine {:.2}", report.max_cosine));
	}
	if report.max_pair_score >= PAIR_SCORE_STRONG {
		report.reasons.push(format!("pair score {:.2}", report.max_pair_score));
	}
	if report.weak_notes {
		report.reasons.push("weak notes".to_string());
	}

	report.triggered = !report.reasons.is_empty();

	report
}

/// Adds the structure question once and forces confirmation.
pub fn apply_soft_split(proposal: &mut IntakeProposal, report: &SoftSplitReport) {
	if !report.triggered {
		return;
	}

	proposal.needs_clarification = true;

	if proposal.clarifying_questions.iter().any(|q| q.id == STRUCTURE_CLARIFY_ID) {
		return;
	}

	proposal.clarifying_questions.push(ClarifyingQuestion {
		id: STRUCTURE_CLARIFY_ID.to_string(),
		question: "These materials may belong to one subject. Should they stay as separate paths or be combined into one?".to_string(),
		reason: report.reasons.join("; "),
	});
}
