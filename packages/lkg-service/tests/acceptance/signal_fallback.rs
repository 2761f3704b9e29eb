use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use lkg_service::{StageInput, file_signature};
use lkg_testkit::fixtures;

use super::ScriptedLlm;

const CHUNKS: [&str; 3] = [
	"TCP opens a connection with a three-way handshake of SYN, SYN-ACK and ACK segments.",
	"Sequence numbers let the receiver reorder segments and detect loss.",
	"Flow control uses the advertised receive window to pace the sender.",
];

fn signature_reply() -> serde_json::Value {
	json!({
		"summary_md": "Explains how TCP establishes and paces a connection.",
		"topics": ["TCP handshake", "flow control"],
		"concept_keys": ["tcp handshake", "flow control"],
		"difficulty": "intro",
		"language": "eng",
		"domain_tags": ["networking"],
		"citations": [],
		"outline_json": { "sections": [{ "title": "Handshake", "start_page": 1, "end_page": 1 }] },
		"outline_confidence": 0.8,
		"from_state": "knows what a packet is",
		"to_state": "can trace a TCP session",
		"core_thread": "reliable delivery over an unreliable network",
		"destination_concepts": ["tcp handshake"],
		"prerequisite_concepts": ["ip packet"],
		"assumed_knowledge": [],
		"notes": [],
	})
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set LKG_PG_DSN to run."]
async fn signal_model_outage_falls_back_per_chunk() {
	let Some(test_db) = super::test_db().await else {
		eprintln!("Skipping signal_model_outage_falls_back_per_chunk; set LKG_PG_DSN to run this test.");

		return;
	};
	let harness = super::build_service(&test_db, Arc::new(ScriptedLlm::default())).await;
	let pool = &harness.service.db.pool;
	let user_id = Uuid::new_v4();
	let set_id = fixtures::insert_material_set(pool, user_id, None, "TCP")
		.await
		.expect("Failed to insert material set.");
	let file_id = fixtures::insert_material_file(pool, set_id, "tcp.pdf")
		.await
		.expect("Failed to insert material file.");

	for (index, text) in CHUNKS.iter().enumerate() {
		fixtures::insert_material_chunk(pool, file_id, index as i32, text, Some(1))
			.await
			.expect("Failed to insert material chunk.");
	}

	harness.llm.reply("file_signature_build", signature_reply());

	let input = StageInput::new(user_id, set_id);
	let env = super::test_env(&[]);
	let signatures = harness
		.service
		.build_file_signatures(&super::ctx(), &input, &env)
		.await
		.expect("File signatures failed.");

	assert_eq!(signatures.files_processed, 1);
	assert_eq!(signatures.sections_written, 1);
	assert!(harness.vectors.count(&file_signature::vector_namespace(set_id)) >= 1);

	let signals = harness
		.service
		.build_material_signals(&super::ctx(), &input, &env)
		.await
		.expect("Material signals failed.");

	assert_eq!(signals.signals_written, CHUNKS.len() as u64);
	assert_eq!(signals.signals_fallback, CHUNKS.len());
	assert_eq!(signals.intents_fallback, 0);
	assert!(signals.set_intent_fallback);
	assert!(signals.coverage_rows >= 2);
	assert!(!signals.trace.warnings.is_empty());
	assert_eq!(harness.llm.calls("material_intent_extract"), 0);

	let stored: i64 = sqlx::query_scalar(
		"\
SELECT COUNT(*)
FROM material_chunk_signals s
JOIN material_chunks c ON c.id = s.material_chunk_id
WHERE c.material_file_id = $1",
	)
	.bind(file_id)
	.fetch_one(pool)
	.await
	.expect("Failed to count signals.");

	assert_eq!(stored, CHUNKS.len() as i64);

	let cached = harness
		.service
		.build_material_signals(&super::ctx(), &input, &env)
		.await
		.expect("Cached material signals failed.");

	assert!(cached.trace.cache_hit);
	assert_eq!(cached.signals_written, 0);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}
