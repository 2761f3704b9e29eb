//! File signatures, outline sections and per-file intents.

use sqlx::{PgExecutor, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
	Result,
	models::{
		MaterialFileSection, MaterialFileSignature, MaterialIntent, SectionSpanRow, SignatureState,
	},
	vector_to_pg,
};

pub async fn list_signature_states<'e, E>(
	executor: E,
	material_set_id: Uuid,
) -> Result<Vec<SignatureState>>
where
	E: PgExecutor<'e>,
{
	let rows = sqlx::query_as::<_, SignatureState>(
		"\
SELECT
	material_file_id,
	version,
	fingerprint,
	topics,
	concept_keys,
	summary_md,
	difficulty,
	language,
	summary_embedding::text AS summary_embedding,
	updated_at
FROM material_file_signatures
WHERE material_set_id = $1",
	)
	.bind(material_set_id)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}

pub async fn upsert_signature<'e, E>(executor: E, sig: &MaterialFileSignature) -> Result<()>
where
	E: PgExecutor<'e>,
{
	let embedding = sig.summary_embedding.as_deref().map(vector_to_pg);

	sqlx::query(
		"\
INSERT INTO material_file_signatures (
	id,
	material_file_id,
	material_set_id,
	version,
	language,
	quality,
	difficulty,
	domain_tags,
	topics,
	concept_keys,
	summary_md,
	summary_embedding,
	outline_json,
	outline_confidence,
	citations,
	fingerprint
)
VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12::text::vector,$13,$14,$15,$16)
ON CONFLICT (material_file_id) DO UPDATE
SET
	material_set_id = EXCLUDED.material_set_id,
	version = EXCLUDED.version,
	language = EXCLUDED.language,
	quality = EXCLUDED.quality,
	difficulty = EXCLUDED.difficulty,
	domain_tags = EXCLUDED.domain_tags,
	topics = EXCLUDED.topics,
	concept_keys = EXCLUDED.concept_keys,
	summary_md = EXCLUDED.summary_md,
	summary_embedding = EXCLUDED.summary_embedding,
	outline_json = EXCLUDED.outline_json,
	outline_confidence = EXCLUDED.outline_confidence,
	citations = EXCLUDED.citations,
	fingerprint = EXCLUDED.fingerprint,
	updated_at = now()",
	)
	.bind(sig.id)
	.bind(sig.material_file_id)
	.bind(sig.material_set_id)
	.bind(sig.version)
	.bind(sig.language.as_str())
	.bind(&sig.quality)
	.bind(sig.difficulty.as_str())
	.bind(&sig.domain_tags)
	.bind(&sig.topics)
	.bind(&sig.concept_keys)
	.bind(sig.summary_md.as_str())
	.bind(embedding)
	.bind(&sig.outline_json)
	.bind(sig.outline_confidence)
	.bind(&sig.citations)
	.bind(sig.fingerprint.as_str())
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn delete_sections<'e, E>(executor: E, material_file_id: Uuid) -> Result<u64>
where
	E: PgExecutor<'e>,
{
	let result = sqlx::query("DELETE FROM material_file_sections WHERE material_file_id = $1")
		.bind(material_file_id)
		.execute(executor)
		.await?;

	Ok(result.rows_affected())
}

pub async fn insert_sections<'e, E>(executor: E, sections: &[MaterialFileSection]) -> Result<()>
where
	E: PgExecutor<'e>,
{
	if sections.is_empty() {
		return Ok(());
	}

	let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
		"\
INSERT INTO material_file_sections (
	id,
	material_file_id,
	section_index,
	title,
	path,
	start_page,
	end_page,
	start_sec,
	end_sec,
	text_excerpt,
	embedding,
	metadata
) ",
	);

	builder.push_values(sections, |mut b, section| {
		b.push_bind(section.id)
			.push_bind(section.material_file_id)
			.push_bind(section.section_index)
			.push_bind(section.title.clone())
			.push_bind(section.path.clone())
			.push_bind(section.start_page)
			.push_bind(section.end_page)
			.push_bind(section.start_sec)
			.push_bind(section.end_sec)
			.push_bind(section.text_excerpt.clone())
			.push_bind(section.embedding.as_deref().map(vector_to_pg))
			.push_unseparated("::text::vector")
			.push_bind(section.metadata.clone());
	});
	builder.build().execute(executor).await?;

	Ok(())
}

pub async fn list_section_spans<'e, E>(
	executor: E,
	material_set_id: Uuid,
) -> Result<Vec<SectionSpanRow>>
where
	E: PgExecutor<'e>,
{
	let rows = sqlx::query_as::<_, SectionSpanRow>(
		"\
SELECT s.material_file_id, s.path, s.start_page, s.end_page, s.start_sec, s.end_sec
FROM material_file_sections s
JOIN material_files f ON f.id = s.material_file_id
WHERE f.material_set_id = $1
ORDER BY s.material_file_id, s.section_index",
	)
	.bind(material_set_id)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}

pub async fn list_intents<'e, E>(executor: E, material_set_id: Uuid) -> Result<Vec<MaterialIntent>>
where
	E: PgExecutor<'e>,
{
	let rows = sqlx::query_as::<_, MaterialIntent>(
		"\
SELECT
	id,
	material_file_id,
	material_set_id,
	from_state,
	to_state,
	core_thread,
	destination_concepts,
	prerequisite_concepts,
	assumed_knowledge,
	metadata,
	updated_at
FROM material_intents
WHERE material_set_id = $1",
	)
	.bind(material_set_id)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}

/// Upserts intents keyed on `material_file_id`.
pub async fn upsert_intents<'e, E>(executor: E, intents: &[MaterialIntent]) -> Result<()>
where
	E: PgExecutor<'e>,
{
	if intents.is_empty() {
		return Ok(());
	}

	let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
		"\
INSERT INTO material_intents (
	id,
	material_file_id,
	material_set_id,
	from_state,
	to_state,
	core_thread,
	destination_concepts,
	prerequisite_concepts,
	assumed_knowledge,
	metadata
) ",
	);

	builder.push_values(intents, |mut b, intent| {
		b.push_bind(intent.id)
			.push_bind(intent.material_file_id)
			.push_bind(intent.material_set_id)
			.push_bind(intent.from_state.clone())
			.push_bind(intent.to_state.clone())
			.push_bind(intent.core_thread.clone())
			.push_bind(intent.destination_concepts.clone())
			.push_bind(intent.prerequisite_concepts.clone())
			.push_bind(intent.assumed_knowledge.clone())
			.push_bind(intent.metadata.clone());
	});
	builder.push(
		"
ON CONFLICT (material_file_id) DO UPDATE
SET
	material_set_id = EXCLUDED.material_set_id,
	from_state = EXCLUDED.from_state,
	to_state = EXCLUDED.to_state,
	core_thread = EXCLUDED.core_thread,
	destination_concepts = EXCLUDED.destination_concepts,
	prerequisite_concepts = EXCLUDED.prerequisite_concepts,
	assumed_knowledge = EXCLUDED.assumed_knowledge,
	metadata = EXCLUDED.metadata,
	updated_at = now()",
	);
	builder.build().execute(executor).await?;

	Ok(())
}
