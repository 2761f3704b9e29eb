use sqlx::{PgExecutor, Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	Result,
	models::{UserEvent, UserEventCursor, UserProgressionEvent},
};

pub async fn get_cursor<'e, E>(
	executor: E,
	user_id: Uuid,
	consumer: &str,
) -> Result<Option<UserEventCursor>>
where
	E: PgExecutor<'e>,
{
	let row = sqlx::query_as::<_, UserEventCursor>(
		"\
SELECT user_id, consumer, last_created_at, last_event_id
FROM user_event_cursors
WHERE user_id = $1 AND consumer = $2",
	)
	.bind(user_id)
	.bind(consumer)
	.fetch_optional(executor)
	.await?;

	Ok(row)
}

/// Events strictly after `(after_created_at, after_id)` in `(created_at, id)` order.
pub async fn list_events_after<'e, E>(
	executor: E,
	user_id: Uuid,
	after: Option<(OffsetDateTime, Uuid)>,
	limit: i64,
) -> Result<Vec<UserEvent>>
where
	E: PgExecutor<'e>,
{
	let (after_created_at, after_id) = after.unzip();
	let rows = sqlx::query_as::<_, UserEvent>(
		"\
SELECT id, user_id, created_at, occurred_at, type, path_id, activity_id, concept_id, data
FROM user_events
WHERE user_id = $1
	AND ($2::timestamptz IS NULL OR (created_at, id) > ($2, $3))
ORDER BY created_at, id
LIMIT $4",
	)
	.bind(user_id)
	.bind(after_created_at)
	.bind(after_id)
	.bind(limit)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}

/// Inserts compacted events, skipping any whose source event was already compacted.
pub async fn insert_progression_events<'e, E>(
	executor: E,
	rows: &[UserProgressionEvent],
) -> Result<u64>
where
	E: PgExecutor<'e>,
{
	if rows.is_empty() {
		return Ok(0);
	}

	let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
		"\
INSERT INTO user_progression_events (
	id,
	user_id,
	source_event_id,
	occurred_at,
	path_id,
	activity_id,
	concept_ids,
	activity_kind,
	variant,
	completed,
	score,
	dwell_ms,
	attempts
) ",
	);

	builder.push_values(rows, |mut b, row| {
		b.push_bind(Uuid::new_v4())
			.push_bind(row.user_id)
			.push_bind(row.source_event_id)
			.push_bind(row.occurred_at)
			.push_bind(row.path_id)
			.push_bind(row.activity_id)
			.push_bind(row.concept_ids.clone())
			.push_bind(row.activity_kind.clone())
			.push_bind(row.variant.clone())
			.push_bind(row.completed)
			.push_bind(row.score)
			.push_bind(row.dwell_ms)
			.push_bind(row.attempts);
	});
	builder.push(" ON CONFLICT (source_event_id) DO NOTHING");

	let result = builder.build().execute(executor).await?;

	Ok(result.rows_affected())
}

pub async fn upsert_cursor<'e, E>(
	executor: E,
	user_id: Uuid,
	consumer: &str,
	last_created_at: OffsetDateTime,
	last_event_id: Uuid,
) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO user_event_cursors (id, user_id, consumer, last_created_at, last_event_id)
VALUES ($1, $2, $3, $4, $5)
ON CONFLICT (user_id, consumer) DO UPDATE
SET
	last_created_at = EXCLUDED.last_created_at,
	last_event_id = EXCLUDED.last_event_id,
	updated_at = now()",
	)
	.bind(Uuid::new_v4())
	.bind(user_id)
	.bind(consumer)
	.bind(last_created_at)
	.bind(last_event_id)
	.execute(executor)
	.await?;

	Ok(())
}
