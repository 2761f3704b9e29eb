//! Best-effort idempotency records keyed by a stage's input hash.

use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use lkg_domain::fingerprint::stage_input_hash;
use lkg_storage::artifacts::{self, ArtifactKey};

use crate::stage::{StageInput, StageTrace};

pub(crate) const ARTIFACT_VERSION: i32 = 1;

pub(crate) struct CacheKey {
	owner_user_id: Uuid,
	material_set_id: Uuid,
	path_id: Option<Uuid>,
	stage: &'static str,
	input_hash: String,
}
impl CacheKey {
	pub(crate) fn new(
		input: &StageInput,
		stage: &'static str,
		path_id: Option<Uuid>,
		payload: &Value,
	) -> Self {
		Self {
			owner_user_id: input.owner_user_id,
			material_set_id: input.material_set_id,
			path_id,
			stage,
			input_hash: stage_input_hash(stage, input.material_set_id, path_id, payload),
		}
	}

	fn as_key(&self) -> ArtifactKey<'_> {
		ArtifactKey {
			owner_user_id: self.owner_user_id,
			material_set_id: self.material_set_id,
			path_id: self.path_id,
			artifact_type: self.stage,
			input_hash: &self.input_hash,
		}
	}
}

/// Stored metadata on a hit; lookup failures count as a miss.
pub(crate) async fn lookup(pool: &PgPool, key: &CacheKey, trace: &mut StageTrace) -> Option<Value> {
	match artifacts::get_artifact(pool, &key.as_key()).await {
		Ok(row) => row.filter(|row| row.version == ARTIFACT_VERSION).map(|row| row.metadata),
		Err(err) => {
			trace.warn(key.stage, format!("Artifact cache lookup failed: {err}."));

			None
		},
	}
}

pub(crate) async fn store(pool: &PgPool, key: &CacheKey, metadata: &Value, trace: &mut StageTrace) {
	if let Err(err) =
		artifacts::upsert_artifact(pool, &key.as_key(), ARTIFACT_VERSION, metadata).await
	{
		trace.warn(key.stage, format!("Artifact cache write failed: {err}."));
	}
}
