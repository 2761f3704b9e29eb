//! Set-level concept coverage, file edges, chunk links, set intents and concepts.

use serde_json::Value;
use sqlx::{PgExecutor, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
	Result,
	models::{
		Concept, ConceptCoverage, MaterialChunkLink, MaterialEdge, MaterialSetIntent,
		SetCoverageRow,
	},
};

pub const SCOPE_MATERIAL_SET: &str = "material_set";
pub const SCOPE_USER: &str = "user";

/// A concept to register under a scope.
#[derive(Clone, Debug)]
pub struct ConceptInput {
	pub key: String,
	pub name: String,
	pub summary: String,
	pub metadata: Value,
}

pub async fn upsert_coverage<'e, E>(executor: E, rows: &[ConceptCoverage]) -> Result<()>
where
	E: PgExecutor<'e>,
{
	if rows.is_empty() {
		return Ok(());
	}

	let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
		"\
INSERT INTO material_set_concept_coverage (
	id,
	material_set_id,
	concept_key,
	path_id,
	canonical_concept_id,
	coverage_type,
	depth,
	score,
	source_material_file_ids
) ",
	);

	builder.push_values(rows, |mut b, row| {
		b.push_bind(Uuid::new_v4())
			.push_bind(row.material_set_id)
			.push_bind(row.concept_key.clone())
			.push_bind(row.path_id)
			.push_bind(row.canonical_concept_id)
			.push_bind(row.coverage_type.clone())
			.push_bind(row.depth.clone())
			.push_bind(row.score)
			.push_bind(row.source_material_file_ids.clone());
	});
	builder.push(
		"
ON CONFLICT (material_set_id, concept_key) DO UPDATE
SET
	path_id = EXCLUDED.path_id,
	canonical_concept_id = COALESCE(EXCLUDED.canonical_concept_id, material_set_concept_coverage.canonical_concept_id),
	coverage_type = EXCLUDED.coverage_type,
	depth = EXCLUDED.depth,
	score = EXCLUDED.score,
	source_material_file_ids = EXCLUDED.source_material_file_ids,
	updated_at = now()",
	);
	builder.build().execute(executor).await?;

	Ok(())
}

pub async fn list_set_coverage<'e, E>(
	executor: E,
	material_set_ids: &[Uuid],
) -> Result<Vec<SetCoverageRow>>
where
	E: PgExecutor<'e>,
{
	let rows = sqlx::query_as::<_, SetCoverageRow>(
		"\
SELECT material_set_id, concept_key, coverage_type, depth, score
FROM material_set_concept_coverage
WHERE material_set_id = ANY($1)
ORDER BY material_set_id, concept_key",
	)
	.bind(material_set_ids)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}

pub async fn upsert_edges<'e, E>(executor: E, edges: &[MaterialEdge]) -> Result<()>
where
	E: PgExecutor<'e>,
{
	if edges.is_empty() {
		return Ok(());
	}

	let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
		"\
INSERT INTO material_edges (
	id,
	material_set_id,
	from_material_file_id,
	to_material_file_id,
	edge_type,
	strength,
	bridging_concepts
) ",
	);

	builder.push_values(edges, |mut b, edge| {
		b.push_bind(Uuid::new_v4())
			.push_bind(edge.material_set_id)
			.push_bind(edge.from_material_file_id)
			.push_bind(edge.to_material_file_id)
			.push_bind(edge.edge_type.clone())
			.push_bind(edge.strength)
			.push_bind(edge.bridging_concepts.clone());
	});
	builder.push(
		"
ON CONFLICT (material_set_id, from_material_file_id, to_material_file_id, edge_type) DO UPDATE
SET
	strength = EXCLUDED.strength,
	bridging_concepts = EXCLUDED.bridging_concepts,
	updated_at = now()",
	);
	builder.build().execute(executor).await?;

	Ok(())
}

pub async fn upsert_chunk_links<'e, E>(executor: E, links: &[MaterialChunkLink]) -> Result<()>
where
	E: PgExecutor<'e>,
{
	if links.is_empty() {
		return Ok(());
	}

	let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
		"\
INSERT INTO material_chunk_links (
	id,
	material_set_id,
	from_material_chunk_id,
	to_material_chunk_id,
	relation,
	strength,
	concept_key
) ",
	);

	builder.push_values(links, |mut b, link| {
		b.push_bind(Uuid::new_v4())
			.push_bind(link.material_set_id)
			.push_bind(link.from_material_chunk_id)
			.push_bind(link.to_material_chunk_id)
			.push_bind(link.relation.clone())
			.push_bind(link.strength)
			.push_bind(link.concept_key.clone());
	});
	builder.push(
		"
ON CONFLICT (material_set_id, from_material_chunk_id, to_material_chunk_id) DO UPDATE
SET
	relation = EXCLUDED.relation,
	strength = EXCLUDED.strength,
	concept_key = EXCLUDED.concept_key,
	updated_at = now()",
	);
	builder.build().execute(executor).await?;

	Ok(())
}

pub async fn get_set_intent<'e, E>(
	executor: E,
	material_set_id: Uuid,
) -> Result<Option<MaterialSetIntent>>
where
	E: PgExecutor<'e>,
{
	let row = sqlx::query_as::<_, MaterialSetIntent>(
		"\
SELECT
	material_set_id,
	from_state,
	to_state,
	core_thread,
	spine_material_file_ids,
	satellite_material_file_ids,
	gaps_concept_keys,
	redundancy_notes,
	conflict_notes,
	metadata
FROM material_set_intents
WHERE material_set_id = $1",
	)
	.bind(material_set_id)
	.fetch_optional(executor)
	.await?;

	Ok(row)
}

pub async fn list_set_intents<'e, E>(
	executor: E,
	material_set_ids: &[Uuid],
) -> Result<Vec<MaterialSetIntent>>
where
	E: PgExecutor<'e>,
{
	let rows = sqlx::query_as::<_, MaterialSetIntent>(
		"\
SELECT
	material_set_id,
	from_state,
	to_state,
	core_thread,
	spine_material_file_ids,
	satellite_material_file_ids,
	gaps_concept_keys,
	redundancy_notes,
	conflict_notes,
	metadata
FROM material_set_intents
WHERE material_set_id = ANY($1)",
	)
	.bind(material_set_ids)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}

pub async fn upsert_set_intent<'e, E>(executor: E, intent: &MaterialSetIntent) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO material_set_intents (
	id,
	material_set_id,
	from_state,
	to_state,
	core_thread,
	spine_material_file_ids,
	satellite_material_file_ids,
	gaps_concept_keys,
	redundancy_notes,
	conflict_notes,
	metadata
)
VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
ON CONFLICT (material_set_id) DO UPDATE
SET
	from_state = EXCLUDED.from_state,
	to_state = EXCLUDED.to_state,
	core_thread = EXCLUDED.core_thread,
	spine_material_file_ids = EXCLUDED.spine_material_file_ids,
	satellite_material_file_ids = EXCLUDED.satellite_material_file_ids,
	gaps_concept_keys = EXCLUDED.gaps_concept_keys,
	redundancy_notes = EXCLUDED.redundancy_notes,
	conflict_notes = EXCLUDED.conflict_notes,
	metadata = EXCLUDED.metadata,
	updated_at = now()",
	)
	.bind(Uuid::new_v4())
	.bind(intent.material_set_id)
	.bind(intent.from_state.as_str())
	.bind(intent.to_state.as_str())
	.bind(intent.core_thread.as_str())
	.bind(&intent.spine_material_file_ids)
	.bind(&intent.satellite_material_file_ids)
	.bind(&intent.gaps_concept_keys)
	.bind(&intent.redundancy_notes)
	.bind(&intent.conflict_notes)
	.bind(&intent.metadata)
	.execute(executor)
	.await?;

	Ok(())
}

/// Registers concepts under `(scope, scope_id)` and returns the stored rows.
///
/// Existing keys keep their id; metadata is shallow-merged.
pub async fn upsert_concepts<'e, E>(
	executor: E,
	scope: &str,
	scope_id: Uuid,
	concepts: &[ConceptInput],
) -> Result<Vec<Concept>>
where
	E: PgExecutor<'e>,
{
	if concepts.is_empty() {
		return Ok(Vec::new());
	}

	let mut builder: QueryBuilder<Postgres> =
		QueryBuilder::new("INSERT INTO concepts (id, scope, scope_id, key, name, summary, metadata) ");

	builder.push_values(concepts, |mut b, concept| {
		b.push_bind(Uuid::new_v4())
			.push_bind(scope.to_string())
			.push_bind(scope_id)
			.push_bind(concept.key.clone())
			.push_bind(concept.name.clone())
			.push_bind(concept.summary.clone())
			.push_bind(concept.metadata.clone());
	});
	builder.push(
		"
ON CONFLICT (scope, scope_id, key) DO UPDATE
SET
	name = EXCLUDED.name,
	summary = CASE WHEN EXCLUDED.summary = '' THEN concepts.summary ELSE EXCLUDED.summary END,
	metadata = concepts.metadata || EXCLUDED.metadata,
	updated_at = now()
RETURNING id, scope, scope_id, key, name",
	);

	let rows = builder.build_query_as::<Concept>().fetch_all(executor).await?;

	Ok(rows)
}

pub async fn list_concepts<'e, E>(executor: E, scope: &str, scope_id: Uuid) -> Result<Vec<Concept>>
where
	E: PgExecutor<'e>,
{
	let rows = sqlx::query_as::<_, Concept>(
		"\
SELECT id, scope, scope_id, key, name
FROM concepts
WHERE scope = $1 AND scope_id = $2
ORDER BY key",
	)
	.bind(scope)
	.bind(scope_id)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}

/// Points each coverage row of `material_set_ids` at the user-scope concept with the same key.
pub async fn link_canonical_concepts<'e, E>(
	executor: E,
	user_id: Uuid,
	material_set_ids: &[Uuid],
) -> Result<u64>
where
	E: PgExecutor<'e>,
{
	let result = sqlx::query(
		"\
UPDATE material_set_concept_coverage cov
SET canonical_concept_id = c.id, updated_at = now()
FROM concepts c
WHERE cov.material_set_id = ANY($2)
	AND c.scope = 'user'
	AND c.scope_id = $1
	AND c.key = cov.concept_key
	AND cov.canonical_concept_id IS DISTINCT FROM c.id",
	)
	.bind(user_id)
	.bind(material_set_ids)
	.execute(executor)
	.await?;

	Ok(result.rows_affected())
}

#[derive(Clone, Copy, Debug, Default, sqlx::FromRow)]
pub struct CoverageCounts {
	pub concept_count: i64,
	pub assumed_count: i64,
}

/// Concept keys covered by the set, and how many of them are only assumed.
pub async fn count_set_coverage<'e, E>(executor: E, material_set_id: Uuid) -> Result<CoverageCounts>
where
	E: PgExecutor<'e>,
{
	let row = sqlx::query_as::<_, CoverageCounts>(
		"\
SELECT
	COUNT(*)::int8 AS concept_count,
	COUNT(*) FILTER (WHERE coverage_type = 'assumes')::int8 AS assumed_count
FROM material_set_concept_coverage
WHERE material_set_id = $1",
	)
	.bind(material_set_id)
	.fetch_one(executor)
	.await?;

	Ok(row)
}
