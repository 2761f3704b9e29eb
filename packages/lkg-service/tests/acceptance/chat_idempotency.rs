use std::sync::Arc;

use serde_json::{Map, json};
use uuid::Uuid;

use lkg_service::{ChatPost, Error};
use lkg_storage::chat;
use lkg_testkit::fixtures;

use super::ScriptedLlm;

fn post(thread_id: Uuid, user_id: Uuid, content: &str) -> ChatPost<'static> {
	ChatPost {
		thread_id,
		user_id,
		kind: "path_intake_ack",
		job_id: "job-1",
		content: content.to_string(),
		metadata: Map::new(),
	}
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set LKG_PG_DSN to run."]
async fn repeated_post_returns_the_first_message() {
	let Some(test_db) = super::test_db().await else {
		eprintln!("Skipping repeated_post_returns_the_first_message; set LKG_PG_DSN to run this test.");

		return;
	};
	let harness = super::build_service(&test_db, Arc::new(ScriptedLlm::default())).await;
	let pool = &harness.service.db.pool;
	let user_id = Uuid::new_v4();
	let thread_id = fixtures::insert_chat_thread(pool, user_id, None)
		.await
		.expect("Failed to insert chat thread.");
	let first = harness
		.service
		.post_message_once(post(thread_id, user_id, "First."))
		.await
		.expect("First post failed.");
	let second = harness
		.service
		.post_message_once(post(thread_id, user_id, "Second."))
		.await
		.expect("Second post failed.");

	assert_eq!(first.id, second.id);
	assert_eq!(second.content, "First.");
	assert_eq!(first.metadata["kind"], json!("path_intake_ack"));
	assert_eq!(harness.notifier.count(), 1);
	assert_eq!(
		chat::list_messages_after(pool, thread_id, 0).await.expect("Failed to list messages.").len(),
		1
	);

	let stranger = harness.service.post_message_once(post(thread_id, Uuid::new_v4(), "Nope.")).await;

	assert!(matches!(stranger, Err(Error::InvalidRequest { .. })));

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}
