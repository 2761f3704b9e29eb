//! Minimal rows for the upstream tables the pipeline reads.

use serde_json::Value;
use sqlx::PgExecutor;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::Result;

pub async fn insert_material_set<'e, E>(
	executor: E,
	user_id: Uuid,
	parent_material_set_id: Option<Uuid>,
	title: &str,
) -> Result<Uuid>
where
	E: PgExecutor<'e>,
{
	let id = Uuid::new_v4();

	sqlx::query(
		"INSERT INTO material_sets (id, user_id, parent_material_set_id, title) VALUES ($1, $2, $3, $4)",
	)
	.bind(id)
	.bind(user_id)
	.bind(parent_material_set_id)
	.bind(title)
	.execute(executor)
	.await?;

	Ok(id)
}

pub async fn insert_material_file<'e, E>(
	executor: E,
	material_set_id: Uuid,
	original_name: &str,
) -> Result<Uuid>
where
	E: PgExecutor<'e>,
{
	let id = Uuid::new_v4();

	sqlx::query(
		"\
INSERT INTO material_files (id, material_set_id, original_name, mime_type, extracted_kind)
VALUES ($1, $2, $3, 'application/pdf', 'pdf')",
	)
	.bind(id)
	.bind(material_set_id)
	.bind(original_name)
	.execute(executor)
	.await?;

	Ok(id)
}

pub async fn insert_material_chunk<'e, E>(
	executor: E,
	material_file_id: Uuid,
	chunk_index: i32,
	text: &str,
	page: Option<i32>,
) -> Result<Uuid>
where
	E: PgExecutor<'e>,
{
	let id = Uuid::new_v4();

	sqlx::query(
		"\
INSERT INTO material_chunks (id, material_file_id, chunk_index, text, page)
VALUES ($1, $2, $3, $4, $5)",
	)
	.bind(id)
	.bind(material_file_id)
	.bind(chunk_index)
	.bind(text)
	.bind(page)
	.execute(executor)
	.await?;

	Ok(id)
}

pub async fn insert_path<'e, E>(
	executor: E,
	user_id: Uuid,
	material_set_id: Option<Uuid>,
	metadata: &Value,
) -> Result<Uuid>
where
	E: PgExecutor<'e>,
{
	let id = Uuid::new_v4();

	sqlx::query("INSERT INTO paths (id, user_id, material_set_id, metadata) VALUES ($1, $2, $3, $4)")
		.bind(id)
		.bind(user_id)
		.bind(material_set_id)
		.bind(metadata)
		.execute(executor)
		.await?;

	Ok(id)
}

pub async fn insert_chat_thread<'e, E>(
	executor: E,
	user_id: Uuid,
	path_id: Option<Uuid>,
) -> Result<Uuid>
where
	E: PgExecutor<'e>,
{
	let id = Uuid::new_v4();

	sqlx::query("INSERT INTO chat_threads (id, user_id, path_id) VALUES ($1, $2, $3)")
		.bind(id)
		.bind(user_id)
		.bind(path_id)
		.execute(executor)
		.await?;

	Ok(id)
}

/// Inserts a user event with an explicit `created_at` so tests control cursor order.
pub async fn insert_user_event<'e, E>(
	executor: E,
	id: Uuid,
	user_id: Uuid,
	created_at: OffsetDateTime,
	event_type: &str,
	data: &Value,
) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO user_events (id, user_id, created_at, occurred_at, type, data)
VALUES ($1, $2, $3, $3, $4, $5)",
	)
	.bind(id)
	.bind(user_id)
	.bind(created_at)
	.bind(event_type)
	.bind(data)
	.execute(executor)
	.await?;

	Ok(())
}
