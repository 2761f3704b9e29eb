use sqlx::PgExecutor;
use uuid::Uuid;

use crate::{Result, models::LearningArtifact};

/// Identity of a cached stage output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactKey<'a> {
	pub owner_user_id: Uuid,
	pub material_set_id: Uuid,
	pub path_id: Option<Uuid>,
	pub artifact_type: &'a str,
	pub input_hash: &'a str,
}

pub async fn get_artifact<'e, E>(
	executor: E,
	key: &ArtifactKey<'_>,
) -> Result<Option<LearningArtifact>>
where
	E: PgExecutor<'e>,
{
	let row = sqlx::query_as::<_, LearningArtifact>(
		"\
SELECT id, owner_user_id, material_set_id, path_id, artifact_type, input_hash, version, metadata, updated_at
FROM learning_artifacts
WHERE owner_user_id = $1
	AND material_set_id = $2
	AND path_id IS NOT DISTINCT FROM $3
	AND artifact_type = $4
	AND input_hash = $5",
	)
	.bind(key.owner_user_id)
	.bind(key.material_set_id)
	.bind(key.path_id)
	.bind(key.artifact_type)
	.bind(key.input_hash)
	.fetch_optional(executor)
	.await?;

	Ok(row)
}

pub async fn upsert_artifact<'e, E>(
	executor: E,
	key: &ArtifactKey<'_>,
	version: i32,
	metadata: &serde_json::Value,
) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO learning_artifacts (
	id,
	owner_user_id,
	material_set_id,
	path_id,
	artifact_type,
	input_hash,
	version,
	metadata
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
ON CONFLICT (owner_user_id, material_set_id, path_id, artifact_type, input_hash) DO UPDATE
SET version = EXCLUDED.version, metadata = EXCLUDED.metadata, updated_at = now()",
	)
	.bind(Uuid::new_v4())
	.bind(key.owner_user_id)
	.bind(key.material_set_id)
	.bind(key.path_id)
	.bind(key.artifact_type)
	.bind(key.input_hash)
	.bind(version)
	.bind(metadata)
	.execute(executor)
	.await?;

	Ok(())
}
