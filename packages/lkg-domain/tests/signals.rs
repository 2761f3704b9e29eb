use std::collections::{BTreeMap, BTreeSet, HashSet};

use uuid::Uuid;

use lkg_domain::{
	coverage::{self, SignalView},
	set_intent,
	signal::{self, ChunkRole},
	weights::{self, SetPositionContext},
};

fn views() -> Vec<SignalView> {
	let file_a = Uuid::from_u128(100);
	let file_b = Uuid::from_u128(200);
	let chunks = [(1_u128, file_a), (2, file_a), (3, file_b), (4, file_b)];
	let batch: HashSet<Uuid> = chunks.iter().map(|(c, _)| Uuid::from_u128(*c)).collect();
	let response = serde_json::json!({
		"items": [
			{ "chunk_id": Uuid::from_u128(1).to_string(), "role": "definition", "scores": { "signal_strength": 0.9, "intent_alignment_score": 0.8 }, "trajectory": { "establishes": ["Sets", "Relations"] } },
			{ "chunk_id": Uuid::from_u128(2).to_string(), "role": "example", "scores": { "signal_strength": 0.6 }, "trajectory": { "reinforces": ["sets"], "points_toward": ["graphs"] } },
			{ "chunk_id": Uuid::from_u128(3).to_string(), "role": "definition", "scores": { "signal_strength": 0.8 }, "trajectory": { "builds_on": ["sets"], "establishes": ["graphs"] } },
			{ "chunk_id": Uuid::from_u128(4).to_string(), "role": "exercise", "scores": { "signal_strength": 55 }, "trajectory": { "reinforces": ["graphs"] } }
		]
	});
	let drafts = signal::dedupe_signals(signal::parse_signal_items(&response, &batch));
	let file_of: BTreeMap<Uuid, Uuid> =
		chunks.iter().map(|(c, f)| (Uuid::from_u128(*c), *f)).collect();

	drafts
		.into_iter()
		.map(|draft| SignalView {
			chunk_id: draft.chunk_id,
			file_id: file_of[&draft.chunk_id],
			role: draft.role,
			signal_strength: draft.scores.signal_strength,
			trajectory: draft.trajectory,
		})
		.collect()
}

#[test]
fn aggregation_is_deterministic_and_order_insensitive() {
	let signals = views();
	let mut reversed = signals.clone();

	reversed.reverse();

	let first = coverage::aggregate_coverage(&signals, &[]);
	let second = coverage::aggregate_coverage(&reversed, &[]);

	assert_eq!(first.rows, second.rows);
	assert_eq!(
		coverage::derive_file_edges(&first.file_stats),
		coverage::derive_file_edges(&second.file_stats)
	);
	assert_eq!(
		coverage::derive_chunk_links(&signals, 6, 100),
		coverage::derive_chunk_links(&reversed, 6, 100)
	);
}

#[test]
fn edges_link_foundations_to_dependents() {
	let agg = coverage::aggregate_coverage(&views(), &[]);
	let edges = coverage::derive_file_edges(&agg.file_stats);

	assert!(edges.iter().all(|e| e.from_file_id != e.to_file_id && e.strength >= 0.18));
	assert!(edges.iter().any(|e| e.from_file_id == Uuid::from_u128(100)
		&& e.to_file_id == Uuid::from_u128(200)
		&& e.bridging_concepts.iter().any(|k| k == "sets" || k == "graphs")));
}

#[test]
fn compound_weights_stay_in_unit_range() {
	let signals = views();
	let agg = coverage::aggregate_coverage(&signals, &[]);
	let edges = coverage::derive_file_edges(&agg.file_stats);
	let set_files: BTreeSet<Uuid> = signals.iter().map(|s| s.file_id).collect();
	let intent = set_intent::fallback_set_intent(&BTreeMap::new(), &agg.rows, &edges, &set_files);
	let ctx = SetPositionContext::new(&intent);
	let relevance = BTreeMap::from([("graphs".to_string(), 0.9)]);

	for signal in &signals {
		let keys = signal.trajectory.all_keys();
		let position = ctx.score(signal.file_id, &keys);
		let cross = weights::cross_set_relevance(&keys, &relevance);
		let weight = weights::compound_weight(signal.signal_strength, 0.5, position, cross);

		assert!((0.0..=1.0).contains(&weight));

		if signal.role == ChunkRole::Exercise {
			assert_eq!(cross, 0.9);
		}
	}
}
