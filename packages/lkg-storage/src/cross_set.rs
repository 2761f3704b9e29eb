//! User-scoped rows that span several material sets.

use sqlx::{PgExecutor, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
	Result,
	models::{EmergentConcept, GlobalConceptCoverage, MaterialSetEdge},
};

/// Cross-set relevance of a user-scope concept, by key.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct ConceptRelevance {
	pub key: String,
	pub cross_set_relevance: f64,
}

pub async fn upsert_set_edges<'e, E>(executor: E, edges: &[MaterialSetEdge]) -> Result<()>
where
	E: PgExecutor<'e>,
{
	if edges.is_empty() {
		return Ok(());
	}

	let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
		"\
INSERT INTO material_set_edges (
	id,
	user_id,
	from_material_set_id,
	to_material_set_id,
	relation,
	strength,
	bridging_concept_ids,
	metadata
) ",
	);

	builder.push_values(edges, |mut b, edge| {
		b.push_bind(Uuid::new_v4())
			.push_bind(edge.user_id)
			.push_bind(edge.from_material_set_id)
			.push_bind(edge.to_material_set_id)
			.push_bind(edge.relation.clone())
			.push_bind(edge.strength)
			.push_bind(edge.bridging_concept_ids.clone())
			.push_bind(edge.metadata.clone());
	});
	builder.push(
		"
ON CONFLICT (user_id, from_material_set_id, to_material_set_id, relation) DO UPDATE
SET
	strength = EXCLUDED.strength,
	bridging_concept_ids = EXCLUDED.bridging_concept_ids,
	metadata = EXCLUDED.metadata,
	updated_at = now()",
	);
	builder.build().execute(executor).await?;

	Ok(())
}

pub async fn upsert_global_coverage<'e, E>(executor: E, rows: &[GlobalConceptCoverage]) -> Result<()>
where
	E: PgExecutor<'e>,
{
	if rows.is_empty() {
		return Ok(());
	}

	let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
		"\
INSERT INTO global_concept_coverage (
	id,
	user_id,
	global_concept_id,
	material_set_ids,
	coverage_depth,
	exposure_score,
	cross_set_relevance
) ",
	);

	builder.push_values(rows, |mut b, row| {
		b.push_bind(Uuid::new_v4())
			.push_bind(row.user_id)
			.push_bind(row.global_concept_id)
			.push_bind(row.material_set_ids.clone())
			.push_bind(row.coverage_depth.clone())
			.push_bind(row.exposure_score)
			.push_bind(row.cross_set_relevance);
	});
	builder.push(
		"
ON CONFLICT (user_id, global_concept_id) DO UPDATE
SET
	material_set_ids = EXCLUDED.material_set_ids,
	coverage_depth = EXCLUDED.coverage_depth,
	exposure_score = EXCLUDED.exposure_score,
	cross_set_relevance = EXCLUDED.cross_set_relevance,
	updated_at = now()",
	);
	builder.build().execute(executor).await?;

	Ok(())
}

pub async fn upsert_emergent_concepts<'e, E>(executor: E, rows: &[EmergentConcept]) -> Result<()>
where
	E: PgExecutor<'e>,
{
	if rows.is_empty() {
		return Ok(());
	}

	let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
		"\
INSERT INTO emergent_concepts (
	id,
	user_id,
	key,
	name,
	summary,
	source_material_set_ids,
	prereq_concept_ids
) ",
	);

	builder.push_values(rows, |mut b, row| {
		b.push_bind(Uuid::new_v4())
			.push_bind(row.user_id)
			.push_bind(row.key.clone())
			.push_bind(row.name.clone())
			.push_bind(row.summary.clone())
			.push_bind(row.source_material_set_ids.clone())
			.push_bind(row.prereq_concept_ids.clone());
	});
	builder.push(
		"
ON CONFLICT (user_id, key) DO UPDATE
SET
	name = EXCLUDED.name,
	summary = EXCLUDED.summary,
	source_material_set_ids = EXCLUDED.source_material_set_ids,
	prereq_concept_ids = EXCLUDED.prereq_concept_ids,
	updated_at = now()",
	);
	builder.build().execute(executor).await?;

	Ok(())
}

/// Relevance of every user-scope concept with a global coverage row.
pub async fn list_concept_relevance<'e, E>(
	executor: E,
	user_id: Uuid,
) -> Result<Vec<ConceptRelevance>>
where
	E: PgExecutor<'e>,
{
	let rows = sqlx::query_as::<_, ConceptRelevance>(
		"\
SELECT c.key, g.cross_set_relevance
FROM global_concept_coverage g
JOIN concepts c ON c.id = g.global_concept_id
WHERE g.user_id = $1 AND c.scope = 'user' AND c.scope_id = $1",
	)
	.bind(user_id)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}
