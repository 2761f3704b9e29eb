use serde_json::json;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use lkg_config::Postgres;
use lkg_storage::{
	artifacts::{self, ArtifactKey},
	chat::{self, NewChatMessage},
	db::Db,
	events,
	models::{MaterialEdge, UserProgressionEvent},
};
use lkg_testkit::{TestDatabase, fixtures};

async fn bootstrap(test_db: &TestDatabase) -> Db {
	let cfg = Postgres { dsn: test_db.dsn().to_string(), pool_max_conns: 2 };
	let db = Db::connect(&cfg).await.expect("Failed to connect to Postgres.");

	db.ensure_schema(8).await.expect("Failed to ensure schema.");

	db
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set LKG_PG_DSN to run."]
async fn schema_bootstrap_is_idempotent() {
	let Some(base_dsn) = lkg_testkit::env_dsn() else {
		eprintln!("Skipping schema_bootstrap_is_idempotent; set LKG_PG_DSN to run this test.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = bootstrap(&test_db).await;

	db.ensure_schema(8).await.expect("Second bootstrap failed.");

	let count: i64 = sqlx::query_scalar(
		"SELECT count(*) FROM information_schema.tables WHERE table_name = 'material_chunk_signals'",
	)
	.fetch_one(&db.pool)
	.await
	.expect("Failed to query schema tables.");

	assert_eq!(count, 1);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set LKG_PG_DSN to run."]
async fn file_edges_reject_self_loops() {
	let Some(base_dsn) = lkg_testkit::env_dsn() else {
		eprintln!("Skipping file_edges_reject_self_loops; set LKG_PG_DSN to run this test.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = bootstrap(&test_db).await;
	let set_id = fixtures::insert_material_set(&db.pool, Uuid::new_v4(), None, "Set")
		.await
		.expect("Failed to insert set.");
	let file_id = fixtures::insert_material_file(&db.pool, set_id, "a.pdf")
		.await
		.expect("Failed to insert file.");
	let edge = MaterialEdge {
		material_set_id: set_id,
		from_material_file_id: file_id,
		to_material_file_id: file_id,
		edge_type: "reinforces".to_string(),
		strength: 0.5,
		bridging_concepts: vec!["x".to_string()],
	};

	assert!(lkg_storage::coverage::upsert_edges(&db.pool, &[edge]).await.is_err());

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set LKG_PG_DSN to run."]
async fn artifact_key_matches_null_path() {
	let Some(base_dsn) = lkg_testkit::env_dsn() else {
		eprintln!("Skipping artifact_key_matches_null_path; set LKG_PG_DSN to run this test.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = bootstrap(&test_db).await;
	let user_id = Uuid::new_v4();
	let set_id = fixtures::insert_material_set(&db.pool, user_id, None, "Set")
		.await
		.expect("Failed to insert set.");
	let key = ArtifactKey {
		owner_user_id: user_id,
		material_set_id: set_id,
		path_id: None,
		artifact_type: "file_signature",
		input_hash: "abc",
	};

	artifacts::upsert_artifact(&db.pool, &key, 1, &json!({ "files": 1 }))
		.await
		.expect("First upsert failed.");
	artifacts::upsert_artifact(&db.pool, &key, 1, &json!({ "files": 2 }))
		.await
		.expect("Second upsert failed.");

	let row = artifacts::get_artifact(&db.pool, &key)
		.await
		.expect("Lookup failed.")
		.expect("Artifact missing.");

	assert_eq!(row.metadata["files"], 2);

	let count: i64 = sqlx::query_scalar("SELECT count(*) FROM learning_artifacts")
		.fetch_one(&db.pool)
		.await
		.expect("Count failed.");

	assert_eq!(count, 1);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set LKG_PG_DSN to run."]
async fn chat_messages_take_consecutive_sequence_numbers() {
	let Some(base_dsn) = lkg_testkit::env_dsn() else {
		eprintln!("Skipping chat_messages_take_consecutive_sequence_numbers; set LKG_PG_DSN to run.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = bootstrap(&test_db).await;
	let user_id = Uuid::new_v4();
	let thread_id = fixtures::insert_chat_thread(&db.pool, user_id, None)
		.await
		.expect("Failed to insert thread.");

	for content in ["one", "two"] {
		let mut tx = db.pool.begin().await.expect("Failed to begin.");
		let lock = chat::lock_thread(&mut *tx, thread_id)
			.await
			.expect("Lock failed.")
			.expect("Thread missing.");
		let message = NewChatMessage {
			thread_id,
			user_id,
			role: "assistant".to_string(),
			content: content.to_string(),
			metadata: json!({ "kind": "path_intake_questions", "job_id": content }),
		};

		chat::append_message(&mut *tx, &lock, &message, OffsetDateTime::now_utc())
			.await
			.expect("Append failed.");
		tx.commit().await.expect("Commit failed.");
	}

	let messages = chat::list_messages_after(&db.pool, thread_id, 0).await.expect("List failed.");

	assert_eq!(messages.iter().map(|m| m.seq).collect::<Vec<_>>(), vec![1, 2]);

	let found =
		chat::find_message_by_kind(&db.pool, thread_id, user_id, "path_intake_questions", "two")
			.await
			.expect("Find failed.");

	assert_eq!(found.map(|m| m.content), Some("two".to_string()));

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set LKG_PG_DSN to run."]
async fn event_paging_and_progression_dedupe() {
	let Some(base_dsn) = lkg_testkit::env_dsn() else {
		eprintln!("Skipping event_paging_and_progression_dedupe; set LKG_PG_DSN to run this test.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = bootstrap(&test_db).await;
	let user_id = Uuid::new_v4();
	let base = OffsetDateTime::now_utc() - Duration::hours(1);
	let ids = [Uuid::from_u128(1), Uuid::from_u128(2), Uuid::from_u128(3)];

	for (i, id) in ids.iter().enumerate() {
		fixtures::insert_user_event(
			&db.pool,
			*id,
			user_id,
			base + Duration::seconds(i as i64),
			"activity_completed",
			&json!({}),
		)
		.await
		.expect("Failed to insert event.");
	}

	let first = events::list_events_after(&db.pool, user_id, None, 2).await.expect("Page failed.");

	assert_eq!(first.iter().map(|e| e.id).collect::<Vec<_>>(), vec![ids[0], ids[1]]);

	let last = &first[1];
	let rest = events::list_events_after(&db.pool, user_id, Some((last.created_at, last.id)), 2)
		.await
		.expect("Page failed.");

	assert_eq!(rest.iter().map(|e| e.id).collect::<Vec<_>>(), vec![ids[2]]);

	let row = UserProgressionEvent {
		user_id,
		source_event_id: ids[0],
		occurred_at: base,
		path_id: None,
		activity_id: None,
		concept_ids: Vec::new(),
		activity_kind: "reading".to_string(),
		variant: String::new(),
		completed: true,
		score: None,
		dwell_ms: None,
		attempts: None,
	};

	assert_eq!(
		events::insert_progression_events(&db.pool, std::slice::from_ref(&row))
			.await
			.expect("Insert failed."),
		1
	);
	assert_eq!(events::insert_progression_events(&db.pool, &[row]).await.expect("Insert failed."), 0);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}
