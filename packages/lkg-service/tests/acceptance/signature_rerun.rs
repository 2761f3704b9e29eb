use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use lkg_service::{Error, StageInput};
use lkg_storage::signatures;
use lkg_testkit::fixtures;

use super::ScriptedLlm;

#[tokio::test]
#[ignore = "Requires external Postgres. Set LKG_PG_DSN to run."]
async fn empty_set_is_upstream_data_error() {
	let Some(test_db) = super::test_db().await else {
		eprintln!("Skipping empty_set_is_upstream_data_error; set LKG_PG_DSN to run this test.");

		return;
	};
	let harness = super::build_service(&test_db, Arc::new(ScriptedLlm::default())).await;
	let pool = &harness.service.db.pool;
	let user_id = Uuid::new_v4();
	let set_id = fixtures::insert_material_set(pool, user_id, None, "Empty")
		.await
		.expect("Failed to insert material set.");
	let result = harness
		.service
		.build_file_signatures(&super::ctx(), &StageInput::new(user_id, set_id), &super::test_env(&[]))
		.await;

	assert!(matches!(result, Err(Error::UpstreamData { .. })));
	assert_eq!(harness.llm.calls("file_signature_build"), 0);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set LKG_PG_DSN to run."]
async fn second_signature_run_skips_unchanged_files() {
	let Some(test_db) = super::test_db().await else {
		eprintln!("Skipping second_signature_run_skips_unchanged_files; set LKG_PG_DSN to run this test.");

		return;
	};
	let harness = super::build_service(&test_db, Arc::new(ScriptedLlm::default())).await;
	let pool = &harness.service.db.pool;
	let user_id = Uuid::new_v4();
	let set_id = fixtures::insert_material_set(pool, user_id, None, "Graphs")
		.await
		.expect("Failed to insert material set.");

	for name in ["graphs-1.pdf", "graphs-2.pdf"] {
		let file_id = fixtures::insert_material_file(pool, set_id, name)
			.await
			.expect("Failed to insert material file.");

		fixtures::insert_material_chunk(
			pool,
			file_id,
			0,
			"A graph is a set of vertices joined by edges.",
			Some(1),
		)
		.await
		.expect("Failed to insert material chunk.");
	}

	harness.llm.reply(
		"file_signature_build",
		json!({
			"summary_md": "Introduces graphs and their basic vocabulary.",
			"topics": ["graphs"],
			"concept_keys": ["graph", "vertex", "edge"],
			"difficulty": "intro",
			"language": "eng",
			"intent": "Teach what a graph is.",
		}),
	);

	let input = StageInput::new(user_id, set_id);
	let env = super::test_env(&[]);
	let first = harness
		.service
		.build_file_signatures(&super::ctx(), &input, &env)
		.await
		.expect("First signature run failed.");

	assert_eq!(first.files_total, 2);
	assert_eq!(first.files_processed, 2);
	assert_eq!(harness.llm.calls("file_signature_build"), 2);

	let before = signatures::list_signature_states(pool, set_id)
		.await
		.expect("Failed to load signature states.");
	let second = harness
		.service
		.build_file_signatures(&super::ctx(), &input, &env)
		.await
		.expect("Second signature run failed.");

	assert_eq!(second.files_total, 2);
	assert_eq!(second.files_processed, 0);
	assert_eq!(second.files_skipped, second.files_total);
	assert_eq!(harness.llm.calls("file_signature_build"), 2);

	let after = signatures::list_signature_states(pool, set_id)
		.await
		.expect("Failed to load signature states.");

	assert_eq!(before.len(), 2);

	for state in &before {
		let same = after
			.iter()
			.find(|other| other.material_file_id == state.material_file_id)
			.expect("Signature missing after rerun.");

		assert_eq!(same.updated_at, state.updated_at);
		assert_eq!(same.fingerprint, state.fingerprint);
		assert_eq!(same.fingerprint.len(), 40);
	}

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}
