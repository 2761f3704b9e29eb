use sqlx::{PgExecutor, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{Result, models::MaterialChunkSignal};

/// Largest number of rows written per signal upsert statement.
pub const SIGNAL_BATCH_SIZE: usize = 200;

pub async fn list_signals<'e, E>(
	executor: E,
	material_set_id: Uuid,
) -> Result<Vec<MaterialChunkSignal>>
where
	E: PgExecutor<'e>,
{
	let rows = sqlx::query_as::<_, MaterialChunkSignal>(
		"\
SELECT
	id,
	material_chunk_id,
	material_file_id,
	material_set_id,
	role,
	signal_strength,
	floor_signal,
	intent_alignment_score,
	set_position_score,
	novelty_score,
	density_score,
	complexity_score,
	load_bearing_score,
	compound_weight,
	trajectory,
	metadata
FROM material_chunk_signals
WHERE material_set_id = $1
ORDER BY material_chunk_id",
	)
	.bind(material_set_id)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}

/// Writes one batch of signals keyed on `material_chunk_id`.
///
/// Callers split larger inputs into [`SIGNAL_BATCH_SIZE`] slices.
pub async fn upsert_signals<'e, E>(executor: E, signals: &[MaterialChunkSignal]) -> Result<u64>
where
	E: PgExecutor<'e>,
{
	if signals.is_empty() {
		return Ok(0);
	}

	let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
		"\
INSERT INTO material_chunk_signals (
	id,
	material_chunk_id,
	material_file_id,
	material_set_id,
	role,
	signal_strength,
	floor_signal,
	intent_alignment_score,
	set_position_score,
	novelty_score,
	density_score,
	complexity_score,
	load_bearing_score,
	compound_weight,
	trajectory,
	metadata
) ",
	);

	builder.push_values(signals, |mut b, signal| {
		b.push_bind(signal.id)
			.push_bind(signal.material_chunk_id)
			.push_bind(signal.material_file_id)
			.push_bind(signal.material_set_id)
			.push_bind(signal.role.clone())
			.push_bind(signal.signal_strength)
			.push_bind(signal.floor_signal)
			.push_bind(signal.intent_alignment_score)
			.push_bind(signal.set_position_score)
			.push_bind(signal.novelty_score)
			.push_bind(signal.density_score)
			.push_bind(signal.complexity_score)
			.push_bind(signal.load_bearing_score)
			.push_bind(signal.compound_weight)
			.push_bind(signal.trajectory.clone())
			.push_bind(signal.metadata.clone());
	});
	builder.push(
		"
ON CONFLICT (material_chunk_id) DO UPDATE
SET
	material_file_id = EXCLUDED.material_file_id,
	material_set_id = EXCLUDED.material_set_id,
	role = EXCLUDED.role,
	signal_strength = EXCLUDED.signal_strength,
	floor_signal = EXCLUDED.floor_signal,
	intent_alignment_score = EXCLUDED.intent_alignment_score,
	novelty_score = EXCLUDED.novelty_score,
	density_score = EXCLUDED.density_score,
	complexity_score = EXCLUDED.complexity_score,
	load_bearing_score = EXCLUDED.load_bearing_score,
	trajectory = EXCLUDED.trajectory,
	metadata = EXCLUDED.metadata,
	updated_at = now()",
	);

	let result = builder.build().execute(executor).await?;

	Ok(result.rows_affected())
}

/// Sets `set_position_score` for each `(chunk_id, score)` pair.
pub async fn update_set_positions<'e, E>(executor: E, chunk_ids: &[Uuid], scores: &[f64]) -> Result<u64>
where
	E: PgExecutor<'e>,
{
	let result = sqlx::query(
		"\
UPDATE material_chunk_signals s
SET set_position_score = u.score, updated_at = now()
FROM unnest($1::uuid[], $2::float8[]) AS u(chunk_id, score)
WHERE s.material_chunk_id = u.chunk_id",
	)
	.bind(chunk_ids)
	.bind(scores)
	.execute(executor)
	.await?;

	Ok(result.rows_affected())
}

/// Sets `compound_weight` for each `(chunk_id, weight)` pair.
pub async fn update_compound_weights<'e, E>(
	executor: E,
	chunk_ids: &[Uuid],
	weights: &[f64],
) -> Result<u64>
where
	E: PgExecutor<'e>,
{
	let result = sqlx::query(
		"\
UPDATE material_chunk_signals s
SET compound_weight = u.weight, updated_at = now()
FROM unnest($1::uuid[], $2::float8[]) AS u(chunk_id, weight)
WHERE s.material_chunk_id = u.chunk_id",
	)
	.bind(chunk_ids)
	.bind(weights)
	.execute(executor)
	.await?;

	Ok(result.rows_affected())
}
