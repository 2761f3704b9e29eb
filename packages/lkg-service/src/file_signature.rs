//! Per-file signatures: summary, topics, outline sections, intent, and the summary embedding.

use std::{
	collections::{BTreeMap, HashSet},
	sync::Arc,
};

use serde::Serialize;
use serde_json::{Map, Value, json};
use time::OffsetDateTime;
use tokio::{
	sync::{Mutex, Semaphore},
	task::JoinSet,
};
use uuid::Uuid;

use lkg_config::PipelineEnv;
use lkg_domain::{
	adaptive::{self, FileSignatureParams},
	citations, concept,
	excerpt::{self, Excerpt},
	intent::{self, IntentDraft},
	language, outline, quality,
};
use lkg_storage::{
	models::{MaterialChunk, MaterialFile, MaterialFileSection, MaterialFileSignature, MaterialIntent},
	qdrant::VectorPoint,
	signatures,
};

use crate::{
	Error, LkgService, Result, StageDeps, artifact_cache,
	artifact_cache::CacheKey,
	materials::SetMaterials,
	prompts,
	stage::{self, StageContext, StageInput, StageTrace},
};

pub const STAGE: &str = "file_signature";
/// Signatures below this version are rebuilt even when the fingerprint matches.
pub const SIGNATURE_VERSION: i32 = 2;

#[derive(Clone, Debug, Default, Serialize)]
pub struct FileSignatureOutput {
	pub files_total: usize,
	pub files_processed: usize,
	pub files_skipped: usize,
	pub sections_written: usize,
	pub vectors_upserted: usize,
	#[serde(flatten)]
	pub trace: StageTrace,
}

pub fn vector_namespace(material_set_id: Uuid) -> String {
	format!("file_signatures:material_set:{material_set_id}")
}

struct FileJob {
	material_set_id: Uuid,
	file: MaterialFile,
	chunks: Vec<MaterialChunk>,
	fingerprint: String,
	params: FileSignatureParams,
	min_text_chars: usize,
	section_batch_size: usize,
	section_concurrency: usize,
}

#[derive(Default)]
struct Tally {
	processed: usize,
	sections: usize,
	vectors: usize,
	warnings: Vec<String>,
}

/// The parsed model answer plus deterministic enrichments.
struct SignatureDraft {
	summary_md: String,
	topics: Vec<String>,
	concept_keys: Vec<String>,
	difficulty: String,
	domain_tags: Vec<String>,
	citations: Vec<String>,
	outline_json: Value,
	outline_confidence: f64,
	language: String,
	intent: IntentDraft,
	model_quality: Value,
}
impl SignatureDraft {
	fn from_llm(value: &Value, file: &MaterialFile, excerpts: &[Excerpt]) -> Self {
		let texts: Vec<&str> = excerpts.iter().map(|excerpt| excerpt.text.as_str()).collect();
		let summary_md = lkg_domain::string_field(value, "summary_md");
		let topics = lkg_domain::string_list(value.get("topics"));
		let mut concept_keys =
			concept::normalize_concept_keys(lkg_domain::string_list(value.get("concept_keys")));

		if concept_keys.is_empty() {
			concept_keys = concept::normalize_concept_keys(&topics);
		}

		let mut intent = IntentDraft::from_llm(value);

		if intent.is_empty() {
			intent = intent::fallback_intent(&file.original_name, &summary_md, &topics, &concept_keys);
		}

		let outline_json = match value.get("outline_json") {
			Some(outline) if outline.is_object() => outline.clone(),
			_ => json!({ "sections": [] }),
		};

		Self {
			citations: citations::merge_citations(
				citations::extract_citations(&texts),
				lkg_domain::string_list(value.get("citations")),
			),
			language: language::resolve_language(&lkg_domain::string_field(value, "language"), &texts),
			difficulty: lkg_domain::string_field(value, "difficulty"),
			domain_tags: lkg_domain::string_list(value.get("domain_tags")),
			outline_confidence: lkg_domain::normalize_score(value.get("outline_confidence"), 0.5),
			model_quality: value.get("quality").cloned().unwrap_or(Value::Null),
			summary_md,
			topics,
			concept_keys,
			outline_json,
			intent,
		}
	}

	fn embedding_text(&self, file: &MaterialFile) -> String {
		if !self.summary_md.is_empty() {
			return self.summary_md.clone();
		}
		if !self.topics.is_empty() {
			return self.topics.join(", ");
		}

		file.original_name.clone()
	}
}

impl LkgService {
	/// Builds signatures for every file whose content changed since its last signature.
	pub async fn build_file_signatures(
		&self,
		ctx: &StageContext,
		input: &StageInput,
		env: &PipelineEnv,
	) -> Result<FileSignatureOutput> {
		input.require_set()?;
		ctx.check()?;

		let mut output = FileSignatureOutput::default();

		if !env.file_signature.enabled {
			output.trace.disabled = true;

			return Ok(output);
		}

		let deps = self.deps();
		let set_id = input.material_set_id;
		let materials = SetMaterials::load(&deps.pool, set_id).await?;
		let profile = materials.profile(&deps.pool, set_id).await?;
		let (params, trace) =
			adaptive::resolve_file_signature(&profile, &env.file_signature, env.adaptive_enabled);

		output.files_total = materials.files.len();
		output.trace.adaptive = trace;

		let cache_key = CacheKey::new(
			input,
			STAGE,
			None,
			&json!({
				"files": materials.fingerprint_payload(),
				"env": env.snapshot("FILE_SIGNATURE_"),
				"version": SIGNATURE_VERSION,
			}),
		);

		if env.cache.file_signature
			&& artifact_cache::lookup(&deps.pool, &cache_key, &mut output.trace).await.is_some()
		{
			output.trace.cache_hit = true;
			output.files_skipped = output.files_total;

			return Ok(output);
		}

		let states: BTreeMap<Uuid, _> = signatures::list_signature_states(&deps.pool, set_id)
			.await?
			.into_iter()
			.map(|state| (state.material_file_id, state))
			.collect();
		let with_intent: HashSet<Uuid> = signatures::list_intents(&deps.pool, set_id)
			.await?
			.into_iter()
			.map(|intent| intent.material_file_id)
			.collect();
		let fingerprints = materials.fingerprints();
		let mut jobs = Vec::new();
		let mut all_fresh = true;

		for file in &materials.files {
			let fingerprint = fingerprints.get(&file.id).cloned().unwrap_or_default();
			let state = states.get(&file.id);
			let current = state.is_some_and(|state| {
				state.fingerprint == fingerprint && state.version >= SIGNATURE_VERSION
			}) && with_intent.contains(&file.id);

			if current {
				all_fresh &= state.is_some_and(|state| state.updated_at >= file.updated_at);
				output.files_skipped += 1;

				continue;
			}

			jobs.push(FileJob {
				material_set_id: set_id,
				file: file.clone(),
				chunks: materials.chunks_of(file.id).to_vec(),
				fingerprint,
				params: params.clone(),
				min_text_chars: env.file_signature.min_text_chars,
				section_batch_size: env.file_signature.section_embed_batch_size.max(1),
				section_concurrency: env.file_signature.section_embed_concurrency.max(1),
			});
		}

		if jobs.is_empty() {
			if env.cache.file_signature && all_fresh {
				artifact_cache::store(&deps.pool, &cache_key, &counts(&output), &mut output.trace)
					.await;

				output.trace.seeded = true;
			}

			return Ok(output);
		}

		let tally = Arc::new(Mutex::new(Tally::default()));

		run_jobs(&deps, ctx, jobs, params.concurrency, tally.clone()).await?;

		let tally = std::mem::take(&mut *tally.lock().await);

		output.files_processed = tally.processed;
		output.sections_written = tally.sections;
		output.vectors_upserted = tally.vectors;
		output.trace.extend(STAGE, tally.warnings);

		if env.cache.file_signature {
			artifact_cache::store(&deps.pool, &cache_key, &counts(&output), &mut output.trace).await;
		}

		tracing::info!(
			material_set_id = %set_id,
			files_processed = output.files_processed,
			files_skipped = output.files_skipped,
			sections = output.sections_written,
			"File signatures built."
		);

		Ok(output)
	}
}

fn counts(output: &FileSignatureOutput) -> Value {
	json!({
		"files_total": output.files_total,
		"files_processed": output.files_processed,
		"sections_written": output.sections_written,
	})
}

/// Runs jobs under a semaphore; the first failure aborts the remaining workers.
async fn run_jobs(
	deps: &StageDeps,
	ctx: &StageContext,
	jobs: Vec<FileJob>,
	concurrency: usize,
	tally: Arc<Mutex<Tally>>,
) -> Result<()> {
	let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
	let mut workers = JoinSet::new();

	for job in jobs {
		let deps = deps.clone();
		let ctx = ctx.clone();
		let semaphore = semaphore.clone();
		let tally = tally.clone();

		workers.spawn(async move {
			let _permit = semaphore.acquire_owned().await.map_err(stage::permit_error)?;

			ctx.check()?;

			let file_id = job.file.id;
			let outcome = process_file(&deps, &ctx, job).await.inspect_err(|err| {
				tracing::error!(file_id = %file_id, error = %err, "File signature failed.");
			})?;
			let mut tally = tally.lock().await;

			tally.processed += 1;
			tally.sections += outcome.sections;
			tally.vectors += outcome.vectors;
			tally.warnings.extend(outcome.warnings);

			Ok::<_, Error>(())
		});
	}

	let mut first_err = None;

	while let Some(joined) = workers.join_next().await {
		let result = joined.map_err(stage::join_error).and_then(|result| result);

		if let Err(err) = result
			&& first_err.is_none()
		{
			first_err = Some(err);

			workers.abort_all();
		}
	}

	match first_err {
		Some(err) => Err(err),
		None => Ok(()),
	}
}

struct FileOutcome {
	sections: usize,
	vectors: usize,
	warnings: Vec<String>,
}

async fn process_file(deps: &StageDeps, ctx: &StageContext, job: FileJob) -> Result<FileOutcome> {
	let FileJob {
		material_set_id,
		file,
		chunks,
		fingerprint,
		params,
		min_text_chars,
		section_batch_size,
		section_concurrency,
	} = job;
	let texts: Vec<&str> = chunks.iter().map(|chunk| chunk.text.as_str()).collect();
	let excerpts = excerpt::select_excerpts(
		&texts,
		params.excerpts_per_file,
		params.excerpt_max_chars,
		params.excerpt_max_total_chars,
	);
	let excerpt_chars = excerpts.iter().map(|excerpt| excerpt::char_len(&excerpt.text)).sum();
	let hint = outline::outline_hint_from_diagnostics(&file.extraction_diagnostics, params.max_sections)
		.unwrap_or_else(|| outline::infer_outline_hint(&texts, params.max_sections));
	let chunk_pairs: Vec<(&str, &Value)> =
		chunks.iter().map(|chunk| (chunk.text.as_str(), &chunk.metadata)).collect();
	let signals = quality::quality_signals(&chunk_pairs, excerpt_chars, min_text_chars);
	let user = prompts::user_prompt(&[
		(
			"FILE",
			json!({
				"file_id": file.id,
				"name": file.original_name,
				"mime_type": file.mime_type,
				"extracted_kind": file.extracted_kind,
				"ai_type": file.ai_type,
				"ai_topics": file.ai_topics,
			}),
		),
		("OUTLINE_HINT", json!(hint)),
		("MAX_SECTIONS", json!(params.max_sections)),
		("QUALITY", serde_json::to_value(&signals).unwrap_or(Value::Null)),
		(
			"EXCERPTS",
			Value::Array(
				excerpts
					.iter()
					.map(|excerpt| json!({ "position": excerpt.position, "text": excerpt.text }))
					.collect(),
			),
		),
	]);
	let value = deps
		.generate_json(
			ctx,
			prompts::FILE_SIGNATURE_SYSTEM,
			&user,
			prompts::FILE_SIGNATURE_SCHEMA,
			&prompts::file_signature_schema(),
		)
		.await?;
	let draft = SignatureDraft::from_llm(&value, &file, &excerpts);
	let summary_vector = deps
		.embed(ctx, &[draft.embedding_text(&file)])
		.await?
		.into_iter()
		.next()
		.ok_or_else(|| Error::Integrity { message: "Missing summary embedding.".to_string() })?;
	let drafts = outline::flatten_outline(&draft.outline_json, params.max_sections);
	let section_texts: Vec<String> = drafts
		.iter()
		.map(|section| {
			if section.text_excerpt.is_empty() {
				section.path.clone()
			} else {
				format!("{}\n{}", section.path, section.text_excerpt)
			}
		})
		.collect();
	let section_vectors =
		embed_sections(deps, ctx, section_texts, section_batch_size, section_concurrency).await?;
	let sections: Vec<MaterialFileSection> = drafts
		.into_iter()
		.zip(section_vectors)
		.map(|(section, embedding)| MaterialFileSection {
			id: Uuid::new_v4(),
			material_file_id: file.id,
			section_index: section.section_index,
			title: section.title,
			path: section.path,
			start_page: section.start_page,
			end_page: section.end_page,
			start_sec: section.start_sec,
			end_sec: section.end_sec,
			text_excerpt: section.text_excerpt,
			embedding: Some(embedding),
			metadata: section.metadata,
		})
		.collect();
	let mut quality_json = serde_json::to_value(&signals).unwrap_or_else(|_| json!({}));

	if let Some(map) = quality_json.as_object_mut()
		&& !draft.model_quality.is_null()
	{
		map.insert("model".to_string(), draft.model_quality.clone());
	}

	let signature = MaterialFileSignature {
		id: Uuid::new_v4(),
		material_file_id: file.id,
		material_set_id,
		version: SIGNATURE_VERSION,
		language: draft.language.clone(),
		quality: quality_json,
		difficulty: draft.difficulty.clone(),
		domain_tags: draft.domain_tags.clone(),
		topics: draft.topics.clone(),
		concept_keys: draft.concept_keys.clone(),
		summary_md: draft.summary_md.clone(),
		summary_embedding: Some(summary_vector.clone()),
		outline_json: draft.outline_json.clone(),
		outline_confidence: draft.outline_confidence,
		citations: draft.citations.clone(),
		fingerprint,
	};
	let intent_row = intent_row(material_set_id, file.id, &draft.intent);

	ctx.check()?;

	let mut tx = deps.pool.begin().await?;

	signatures::upsert_signature(&mut *tx, &signature).await?;
	signatures::upsert_intents(&mut *tx, std::slice::from_ref(&intent_row)).await?;
	signatures::delete_sections(&mut *tx, file.id).await?;
	signatures::insert_sections(&mut *tx, &sections).await?;
	tx.commit().await?;

	let mut outcome = FileOutcome { sections: sections.len(), vectors: 0, warnings: Vec::new() };
	let mut payload = Map::new();

	payload.insert("material_set_id".to_string(), json!(material_set_id));
	payload.insert("file_id".to_string(), json!(file.id));
	payload.insert("topics".to_string(), json!(draft.topics));
	payload.insert("difficulty".to_string(), json!(draft.difficulty));
	payload.insert("language".to_string(), json!(draft.language));

	let point = VectorPoint { key: file.id, vector: summary_vector, payload };

	match deps.providers.vectors.upsert(&vector_namespace(material_set_id), vec![point]).await {
		Ok(count) => outcome.vectors = count,
		Err(err) => outcome
			.warnings
			.push(format!("Summary vector upsert failed for file {}: {err}.", file.id)),
	}

	tracing::debug!(file_id = %file.id, sections = outcome.sections, "File signature written.");

	Ok(outcome)
}

pub(crate) fn intent_row(material_set_id: Uuid, file_id: Uuid, draft: &IntentDraft) -> MaterialIntent {
	MaterialIntent {
		id: Uuid::new_v4(),
		material_file_id: file_id,
		material_set_id,
		from_state: draft.from_state.clone(),
		to_state: draft.to_state.clone(),
		core_thread: draft.core_thread.clone(),
		destination_concepts: draft.destination_concepts.clone(),
		prerequisite_concepts: draft.prerequisite_concepts.clone(),
		assumed_knowledge: draft.assumed_knowledge.clone(),
		metadata: draft.metadata(),
		updated_at: OffsetDateTime::now_utc(),
	}
}

/// Embeds section texts in batches under a nested concurrency bound, preserving order.
async fn embed_sections(
	deps: &StageDeps,
	ctx: &StageContext,
	texts: Vec<String>,
	batch_size: usize,
	concurrency: usize,
) -> Result<Vec<Vec<f32>>> {
	if texts.is_empty() {
		return Ok(Vec::new());
	}

	let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
	let mut workers = JoinSet::new();

	for (index, batch) in texts.chunks(batch_size.max(1)).enumerate() {
		let batch = batch.to_vec();
		let deps = deps.clone();
		let ctx = ctx.clone();
		let semaphore = semaphore.clone();

		workers.spawn(async move {
			let _permit = semaphore.acquire_owned().await.map_err(stage::permit_error)?;
			let vectors = deps.embed(&ctx, &batch).await?;

			Ok::<_, Error>((index, vectors))
		});
	}

	let mut batches = BTreeMap::new();

	while let Some(joined) = workers.join_next().await {
		match joined.map_err(stage::join_error).and_then(|result| result) {
			Ok((index, vectors)) => {
				batches.insert(index, vectors);
			},
			Err(err) => {
				workers.abort_all();

				return Err(err);
			},
		}
	}

	let vectors: Vec<Vec<f32>> = batches.into_values().flatten().collect();

	if vectors.len() != texts.len() {
		return Err(Error::Integrity {
			message: format!("Embedded {} sections, expected {}.", vectors.len(), texts.len()),
		});
	}

	Ok(vectors)
}

/// Reads a stored intent row back into a draft.
pub(crate) fn intent_from_row(row: &MaterialIntent) -> IntentDraft {
	IntentDraft {
		from_state: row.from_state.clone(),
		to_state: row.to_state.clone(),
		core_thread: row.core_thread.clone(),
		destination_concepts: row.destination_concepts.clone(),
		prerequisite_concepts: row.prerequisite_concepts.clone(),
		assumed_knowledge: row.assumed_knowledge.clone(),
		notes: lkg_domain::string_list(row.metadata.get("notes")),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn file() -> MaterialFile {
		MaterialFile {
			id: Uuid::from_u128(1),
			material_set_id: Uuid::from_u128(2),
			original_name: "networks.pdf".to_string(),
			mime_type: "application/pdf".to_string(),
			size_bytes: 10,
			extracted_kind: "pdf".to_string(),
			ai_type: String::new(),
			ai_topics: Vec::new(),
			extraction_diagnostics: json!({}),
			created_at: OffsetDateTime::UNIX_EPOCH,
			updated_at: OffsetDateTime::UNIX_EPOCH,
		}
	}

	#[test]
	fn empty_intent_falls_back_and_citations_merge() {
		let excerpts = vec![Excerpt {
			position: 0,
			text: "See RFC 9293 and https://example.org/tcp for details.".to_string(),
		}];
		let value = json!({
			"summary_md": "TCP basics. Handshakes and windows.",
			"topics": ["TCP"],
			"concept_keys": ["Three-way handshake"],
			"citations": ["rfc 9293", "Stevens 1994"],
			"language": "",
		});
		let draft = SignatureDraft::from_llm(&value, &file(), &excerpts);

		assert_eq!(draft.concept_keys, vec!["three_way_handshake".to_string()]);
		assert!(draft.intent.is_fallback());
		assert_eq!(draft.intent.core_thread, "TCP basics");
		assert!(draft.citations.iter().any(|c| c == "RFC 9293"));
		assert!(draft.citations.iter().any(|c| c == "Stevens 1994"));
		assert_eq!(draft.citations.iter().filter(|c| c.eq_ignore_ascii_case("rfc 9293")).count(), 1);
		assert_eq!(draft.outline_json, json!({ "sections": [] }));
	}

	#[test]
	fn embedding_text_prefers_summary_then_topics() {
		let value = json!({ "topics": ["routing", "switching"] });
		let draft = SignatureDraft::from_llm(&value, &file(), &[]);

		assert_eq!(draft.embedding_text(&file()), "routing, switching");
		assert_eq!(
			SignatureDraft::from_llm(&json!({}), &file(), &[]).embedding_text(&file()),
			"networks.pdf"
		);
	}

	#[test]
	fn namespace_names_the_set() {
		assert_eq!(
			vector_namespace(Uuid::from_u128(2)),
			"file_signatures:material_set:00000000-0000-0000-0000-000000000002"
		);
	}
}
