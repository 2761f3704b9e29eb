use serde_json::Value;
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::{Result, models::Path};

pub async fn get_path<'e, E>(executor: E, path_id: Uuid) -> Result<Option<Path>>
where
	E: PgExecutor<'e>,
{
	let row = sqlx::query_as::<_, Path>(
		"SELECT id, user_id, material_set_id, title, metadata FROM paths WHERE id = $1",
	)
	.bind(path_id)
	.fetch_optional(executor)
	.await?;

	Ok(row)
}

/// Shallow-merges `patch` into the path's metadata and returns the merged document.
pub async fn merge_path_metadata<'e, E>(
	executor: E,
	path_id: Uuid,
	patch: &Value,
) -> Result<Option<Value>>
where
	E: PgExecutor<'e>,
{
	let merged = sqlx::query_scalar::<_, Value>(
		"\
UPDATE paths
SET metadata = COALESCE(metadata, '{}'::jsonb) || $2, updated_at = now()
WHERE id = $1
RETURNING metadata",
	)
	.bind(path_id)
	.bind(patch)
	.fetch_optional(executor)
	.await?;

	Ok(merged)
}
