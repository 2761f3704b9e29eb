use std::sync::Arc;

use serde_json::json;
use time::{Duration, macros::datetime};
use uuid::Uuid;

use lkg_service::StageInput;
use lkg_testkit::fixtures;

use super::ScriptedLlm;

#[tokio::test]
#[ignore = "Requires external Postgres. Set LKG_PG_DSN to run."]
async fn compaction_resumes_from_cursor_and_never_replays() {
	let Some(test_db) = super::test_db().await else {
		eprintln!(
			"Skipping compaction_resumes_from_cursor_and_never_replays; set LKG_PG_DSN to run this test."
		);

		return;
	};
	let harness = super::build_service(&test_db, Arc::new(ScriptedLlm::default())).await;
	let pool = &harness.service.db.pool;
	let user_id = Uuid::new_v4();
	let input = StageInput::new(user_id, Uuid::nil());
	let env = super::test_env(&[("PROGRESSION_PAGE_SIZE", "4")]);
	let base = datetime!(2026-03-01 09:00 UTC);
	let mut ids = Vec::new();

	for i in 0..15_i64 {
		let id = Uuid::new_v4();

		ids.push(id);

		if i < 10 {
			fixtures::insert_user_event(
				pool,
				id,
				user_id,
				base + Duration::seconds(i),
				"activity_completed",
				&json!({ "activity_kind": "quiz", "score": 0.5 }),
			)
			.await
			.expect("Failed to insert user event.");
		}
	}

	let first = harness
		.service
		.compact_progression(&super::ctx(), &input, &env)
		.await
		.expect("First compaction failed.");

	assert_eq!(first.events_read, 10);
	assert_eq!(first.rows_inserted, 10);
	assert_eq!(first.pages, 3);
	assert!(first.exhausted);
	assert_eq!(first.cursor_event_id, Some(ids[9]));

	for (i, id) in ids.iter().enumerate().skip(10) {
		fixtures::insert_user_event(
			pool,
			*id,
			user_id,
			base + Duration::seconds(i as i64),
			"activity_completed",
			&json!({ "activity_kind": "reading" }),
		)
		.await
		.expect("Failed to insert user event.");
	}

	let second = harness
		.service
		.compact_progression(&super::ctx(), &input, &env)
		.await
		.expect("Second compaction failed.");

	assert_eq!(second.events_read, 5);
	assert_eq!(second.rows_inserted, 5);
	assert_eq!(second.cursor_event_id, Some(ids[14]));

	sqlx::query("DELETE FROM user_progression_events WHERE source_event_id = ANY($1)")
		.bind(&ids[10..])
		.execute(pool)
		.await
		.expect("Failed to delete progression rows.");

	let third = harness
		.service
		.compact_progression(&super::ctx(), &input, &env)
		.await
		.expect("Third compaction failed.");
	let total: i64 =
		sqlx::query_scalar("SELECT COUNT(*) FROM user_progression_events WHERE user_id = $1")
			.bind(user_id)
			.fetch_one(pool)
			.await
			.expect("Failed to count progression rows.");

	assert_eq!(third.events_read, 0);
	assert_eq!(third.rows_inserted, 0);
	assert!(third.exhausted);
	assert_eq!(total, 10);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set LKG_PG_DSN to run."]
async fn compaction_stops_at_max_events() {
	let Some(test_db) = super::test_db().await else {
		eprintln!("Skipping compaction_stops_at_max_events; set LKG_PG_DSN to run this test.");

		return;
	};
	let harness = super::build_service(&test_db, Arc::new(ScriptedLlm::default())).await;
	let pool = &harness.service.db.pool;
	let user_id = Uuid::new_v4();
	let input = StageInput::new(user_id, Uuid::nil());
	let env = super::test_env(&[("PROGRESSION_PAGE_SIZE", "2"), ("PROGRESSION_MAX_EVENTS", "3")]);
	let base = datetime!(2026-03-01 09:00 UTC);

	for i in 0..5_i64 {
		fixtures::insert_user_event(
			pool,
			Uuid::new_v4(),
			user_id,
			base + Duration::seconds(i),
			"activity_started",
			&json!({}),
		)
		.await
		.expect("Failed to insert user event.");
	}

	let first = harness
		.service
		.compact_progression(&super::ctx(), &input, &env)
		.await
		.expect("First compaction failed.");

	assert_eq!(first.events_read, 3);
	assert!(!first.exhausted);

	let second = harness
		.service
		.compact_progression(&super::ctx(), &input, &env)
		.await
		.expect("Second compaction failed.");

	assert_eq!(second.events_read, 2);
	assert!(second.exhausted);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}
