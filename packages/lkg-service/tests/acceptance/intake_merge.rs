use std::sync::Arc;

use serde_json::{Value, json};
use time::OffsetDateTime;
use uuid::Uuid;

use lkg_domain::intake::{FALLBACK_INTAKE_NOTE, MODE_SINGLE_GOAL};
use lkg_service::{
	IntakeState, IntakeStatus, StageInput,
	path_intake::{KIND_ACK, KIND_QUESTIONS},
};
use lkg_storage::{chat, chat::NewChatMessage, paths};
use lkg_testkit::fixtures;

use super::ScriptedLlm;

fn two_paths(a: Uuid, b: Uuid) -> Value {
	json!({
		"paths": [
			{ "path_id": "p1", "title": "TCP basics", "goal": "Learn TCP", "core_file_ids": [a], "confidence": 0.9 },
			{ "path_id": "p2", "title": "TCP handshakes", "goal": "Learn TCP", "core_file_ids": [b], "confidence": 0.9 },
		],
		"primary_path_id": "p1",
		"material_alignment": { "mode": "multi_goal" },
	})
}

fn merged(a: Uuid, b: Uuid) -> Value {
	json!({
		"paths": [
			{ "path_id": "tcp", "title": "TCP", "goal": "Learn TCP", "core_file_ids": [a, b], "confidence": 0.9 },
		],
		"primary_path_id": "tcp",
		"combined_goal": "Learn TCP",
	})
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set LKG_PG_DSN to run."]
async fn reply_merges_paths_and_locks_intake() {
	let Some(test_db) = super::test_db().await else {
		eprintln!("Skipping reply_merges_paths_and_locks_intake; set LKG_PG_DSN to run this test.");

		return;
	};
	let user_id = Uuid::new_v4();
	let harness = super::build_service(&test_db, Arc::new(ScriptedLlm::default())).await;
	let pool = &harness.service.db.pool;
	let set_id = fixtures::insert_material_set(pool, user_id, None, "Networking")
		.await
		.expect("Failed to insert material set.");
	let file_a = fixtures::insert_material_file(pool, set_id, "tcp-1.pdf")
		.await
		.expect("Failed to insert material file.");
	let file_b = fixtures::insert_material_file(pool, set_id, "tcp-2.pdf")
		.await
		.expect("Failed to insert material file.");

	for file_id in [file_a, file_b] {
		fixtures::insert_material_chunk(
			pool,
			file_id,
			0,
			"TCP opens with a three-way handshake.",
			Some(1),
		)
		.await
		.expect("Failed to insert material chunk.");
	}

	let path_id = fixtures::insert_path(pool, user_id, Some(set_id), &json!({}))
		.await
		.expect("Failed to insert path.");
	let thread_id = fixtures::insert_chat_thread(pool, user_id, Some(path_id))
		.await
		.expect("Failed to insert chat thread.");

	harness.llm.reply("path_intake", two_paths(file_a, file_b));
	harness.llm.reply("path_intake", merged(file_a, file_b));

	let env = super::test_env(&[]);
	let input = StageInput {
		path_id: Some(path_id),
		thread_id: Some(thread_id),
		job_id: Some("job-intake".to_string()),
		..StageInput::new(user_id, set_id)
	};
	let proposed = harness
		.service
		.run_path_intake(&super::ctx(), &input, &env)
		.await
		.expect("Intake proposal failed.");

	assert_eq!(proposed.status, IntakeStatus::WaitingUser);
	assert_eq!(proposed.state, IntakeState::Proposing);
	assert_eq!(proposed.proposal.paths.len(), 2);

	let questions = chat::find_message_by_kind(pool, thread_id, user_id, KIND_QUESTIONS, "job-intake")
		.await
		.expect("Failed to load questions.")
		.expect("Questions message missing.");

	assert_eq!(proposed.message_id, Some(questions.id));
	assert_eq!(questions.metadata["workflow_v1"]["kind"], json!("path_intake"));

	let waiting = harness
		.service
		.run_path_intake(&super::ctx(), &input, &env)
		.await
		.expect("Waiting intake failed.");

	assert_eq!(waiting.status, IntakeStatus::WaitingUser);
	assert_eq!(waiting.message_id, Some(questions.id));
	assert_eq!(harness.llm.calls("path_intake"), 1);

	let mut tx = pool.begin().await.expect("Failed to begin transaction.");
	let lock = chat::lock_thread(&mut *tx, thread_id)
		.await
		.expect("Failed to lock thread.")
		.expect("Thread missing.");

	chat::append_message(
		&mut *tx,
		&lock,
		&NewChatMessage {
			thread_id,
			user_id,
			role: "user".to_string(),
			content: "combine them".to_string(),
			metadata: json!({}),
		},
		OffsetDateTime::now_utc(),
	)
	.await
	.expect("Failed to append reply.");
	tx.commit().await.expect("Failed to commit reply.");

	let resolved = harness
		.service
		.run_path_intake(&super::ctx(), &input, &env)
		.await
		.expect("Intake regeneration failed.");

	assert_eq!(resolved.status, IntakeStatus::Succeeded);
	assert_eq!(resolved.state, IntakeState::Regenerating);
	assert_eq!(resolved.proposal.paths.len(), 1);
	assert_eq!(resolved.proposal.material_alignment.mode, MODE_SINGLE_GOAL);
	assert!(resolved.proposal.paths_confirmed);

	let path = paths::get_path(pool, path_id)
		.await
		.expect("Failed to load path.")
		.expect("Path missing.");

	assert_eq!(path.metadata["intake_locked"], json!(true));
	assert_eq!(path.metadata["paths_confirmed"], json!(true));
	assert_eq!(path.metadata["intake_confirmed_by_user"], json!(true));
	assert!(
		chat::find_message_by_kind(pool, thread_id, user_id, KIND_ACK, "job-intake")
			.await
			.expect("Failed to load ack.")
			.is_some()
	);

	let locked = harness
		.service
		.run_path_intake(&super::ctx(), &input, &env)
		.await
		.expect("Locked intake failed.");

	assert_eq!(locked.status, IntakeStatus::Succeeded);
	assert_eq!(locked.proposal.paths.len(), 1);
	assert_eq!(harness.llm.calls("path_intake"), 2);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set LKG_PG_DSN to run."]
async fn model_outage_without_thread_needs_confirmation() {
	let Some(test_db) = super::test_db().await else {
		eprintln!(
			"Skipping model_outage_without_thread_needs_confirmation; set LKG_PG_DSN to run this test."
		);

		return;
	};
	let user_id = Uuid::new_v4();
	let harness = super::build_service(&test_db, Arc::new(ScriptedLlm::default())).await;
	let pool = &harness.service.db.pool;
	let set_id = fixtures::insert_material_set(pool, user_id, None, "Notes")
		.await
		.expect("Failed to insert material set.");

	fixtures::insert_material_file(pool, set_id, "notes.pdf")
		.await
		.expect("Failed to insert material file.");

	let path_id = fixtures::insert_path(pool, user_id, Some(set_id), &json!({}))
		.await
		.expect("Failed to insert path.");
	let input = StageInput { path_id: Some(path_id), ..StageInput::new(user_id, set_id) };
	let out = harness
		.service
		.run_path_intake(&super::ctx(), &input, &super::test_env(&[]))
		.await
		.expect("Intake failed.");

	assert_eq!(out.status, IntakeStatus::NeedsConfirmation);
	assert_eq!(out.proposal.paths.len(), 1);
	assert!(out.proposal.notes.iter().any(|note| note == FALLBACK_INTAKE_NOTE));
	assert!(!out.trace.warnings.is_empty());
	assert_eq!(harness.notifier.count(), 0);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}
