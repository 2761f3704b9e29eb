//! Thread-scoped chat messages with per-thread sequence numbers.

use serde_json::Value;
use sqlx::{PgConnection, PgExecutor};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Result, models::ChatMessage};

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct ThreadLock {
	pub user_id: Uuid,
	pub next_seq: i64,
}

/// A message to append; the sequence number is assigned on insert.
#[derive(Clone, Debug)]
pub struct NewChatMessage {
	pub thread_id: Uuid,
	pub user_id: Uuid,
	pub role: String,
	pub content: String,
	pub metadata: Value,
}

/// Row-locks the thread for the rest of the transaction.
pub async fn lock_thread(conn: &mut PgConnection, thread_id: Uuid) -> Result<Option<ThreadLock>> {
	let row = sqlx::query_as::<_, ThreadLock>(
		"SELECT user_id, next_seq FROM chat_threads WHERE id = $1 FOR UPDATE",
	)
	.bind(thread_id)
	.fetch_optional(conn)
	.await?;

	Ok(row)
}

/// Finds a message by `metadata.kind` and `metadata.job_id`.
pub async fn find_message_by_kind<'e, E>(
	executor: E,
	thread_id: Uuid,
	user_id: Uuid,
	kind: &str,
	job_id: &str,
) -> Result<Option<ChatMessage>>
where
	E: PgExecutor<'e>,
{
	let row = sqlx::query_as::<_, ChatMessage>(
		"\
SELECT id, thread_id, user_id, seq, role, content, metadata, created_at
FROM chat_messages
WHERE thread_id = $1
	AND user_id = $2
	AND metadata->>'kind' = $3
	AND metadata->>'job_id' = $4
ORDER BY seq DESC
LIMIT 1",
	)
	.bind(thread_id)
	.bind(user_id)
	.bind(kind)
	.bind(job_id)
	.fetch_optional(executor)
	.await?;

	Ok(row)
}

/// Appends a message at the thread's next sequence number and advances the thread.
///
/// Must run inside a transaction that already holds [`lock_thread`].
pub async fn append_message(
	conn: &mut PgConnection,
	lock: &ThreadLock,
	message: &NewChatMessage,
	now: OffsetDateTime,
) -> Result<ChatMessage> {
	let row = sqlx::query_as::<_, ChatMessage>(
		"\
INSERT INTO chat_messages (id, thread_id, user_id, seq, role, content, metadata, created_at, updated_at)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
RETURNING id, thread_id, user_id, seq, role, content, metadata, created_at",
	)
	.bind(Uuid::new_v4())
	.bind(message.thread_id)
	.bind(message.user_id)
	.bind(lock.next_seq)
	.bind(message.role.as_str())
	.bind(message.content.as_str())
	.bind(&message.metadata)
	.bind(now)
	.fetch_one(&mut *conn)
	.await?;

	sqlx::query(
		"\
UPDATE chat_threads
SET next_seq = $2, last_message_at = $3, updated_at = $3
WHERE id = $1",
	)
	.bind(message.thread_id)
	.bind(lock.next_seq + 1)
	.bind(now)
	.execute(&mut *conn)
	.await?;

	Ok(row)
}

pub async fn list_messages_after<'e, E>(
	executor: E,
	thread_id: Uuid,
	after_seq: i64,
) -> Result<Vec<ChatMessage>>
where
	E: PgExecutor<'e>,
{
	let rows = sqlx::query_as::<_, ChatMessage>(
		"\
SELECT id, thread_id, user_id, seq, role, content, metadata, created_at
FROM chat_messages
WHERE thread_id = $1 AND seq > $2
ORDER BY seq",
	)
	.bind(thread_id)
	.bind(after_seq)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}
