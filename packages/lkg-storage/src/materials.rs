use serde_json::Value;
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::{
	Result,
	models::{MaterialChunk, MaterialFile, MaterialSet, SetProfileRow},
};

pub async fn get_material_set<'e, E>(executor: E, material_set_id: Uuid) -> Result<Option<MaterialSet>>
where
	E: PgExecutor<'e>,
{
	let row = sqlx::query_as::<_, MaterialSet>(
		"\
SELECT id, user_id, parent_material_set_id, title, created_at, updated_at
FROM material_sets
WHERE id = $1",
	)
	.bind(material_set_id)
	.fetch_optional(executor)
	.await?;

	Ok(row)
}

/// Sets without a parent, oldest first.
pub async fn list_source_sets<'e, E>(executor: E, user_id: Uuid) -> Result<Vec<MaterialSet>>
where
	E: PgExecutor<'e>,
{
	let rows = sqlx::query_as::<_, MaterialSet>(
		"\
SELECT id, user_id, parent_material_set_id, title, created_at, updated_at
FROM material_sets
WHERE user_id = $1 AND parent_material_set_id IS NULL
ORDER BY created_at, id",
	)
	.bind(user_id)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}

pub async fn list_set_files<'e, E>(executor: E, material_set_id: Uuid) -> Result<Vec<MaterialFile>>
where
	E: PgExecutor<'e>,
{
	let rows = sqlx::query_as::<_, MaterialFile>(
		"\
SELECT
	id,
	material_set_id,
	original_name,
	mime_type,
	size_bytes,
	extracted_kind,
	ai_type,
	ai_topics,
	extraction_diagnostics,
	created_at,
	updated_at
FROM material_files
WHERE material_set_id = $1
ORDER BY created_at, id",
	)
	.bind(material_set_id)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}

/// All chunks of a set, grouped by file and ordered by index.
pub async fn list_set_chunks<'e, E>(executor: E, material_set_id: Uuid) -> Result<Vec<MaterialChunk>>
where
	E: PgExecutor<'e>,
{
	let rows = sqlx::query_as::<_, MaterialChunk>(
		"\
SELECT
	c.id,
	c.material_file_id,
	c.chunk_index,
	c.text,
	c.page,
	c.start_sec,
	c.end_sec,
	c.metadata
FROM material_chunks c
JOIN material_files f ON f.id = c.material_file_id
WHERE f.material_set_id = $1
ORDER BY c.material_file_id, c.chunk_index",
	)
	.bind(material_set_id)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}

/// Page count is the sum of each file's highest page number.
pub async fn load_set_profile<'e, E>(executor: E, material_set_id: Uuid) -> Result<SetProfileRow>
where
	E: PgExecutor<'e>,
{
	let row = sqlx::query_as::<_, SetProfileRow>(
		"\
SELECT
	COALESCE((
		SELECT SUM(max_page)
		FROM (
			SELECT MAX(c.page) AS max_page
			FROM material_chunks c
			JOIN material_files f ON f.id = c.material_file_id
			WHERE f.material_set_id = $1
			GROUP BY c.material_file_id
		) pages
	), 0)::int8 AS page_count,
	(
		SELECT COUNT(*)
		FROM material_file_sections s
		JOIN material_files f ON f.id = s.material_file_id
		WHERE f.material_set_id = $1
	)::int8 AS section_count,
	(SELECT COUNT(*) FROM material_files WHERE material_set_id = $1)::int8 AS file_count",
	)
	.bind(material_set_id)
	.fetch_one(executor)
	.await?;

	Ok(row)
}

/// Shallow-merges `patch` into the chunk's metadata.
pub async fn merge_chunk_metadata<'e, E>(executor: E, chunk_id: Uuid, patch: &Value) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
UPDATE material_chunks
SET metadata = COALESCE(metadata, '{}'::jsonb) || $2, updated_at = now()
WHERE id = $1",
	)
	.bind(chunk_id)
	.bind(patch)
	.execute(executor)
	.await?;

	Ok(())
}
