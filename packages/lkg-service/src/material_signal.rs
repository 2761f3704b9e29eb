//! Material signals: file intents, chunk signals, set coverage, and the weights derived from them.

use std::{
	collections::{BTreeMap, BTreeSet, HashSet},
	sync::Arc,
};

use serde::Serialize;
use serde_json::{Value, json};
use sqlx::PgPool;
use tokio::{
	sync::{Mutex, Semaphore},
	task::JoinSet,
};
use uuid::Uuid;

use lkg_config::PipelineEnv;
use lkg_domain::{
	adaptive::{self, MaterialSignalParams},
	clamp01,
	concept::key_phrase,
	coverage::{self, CoverageRow, FileEdge, SignalView},
	excerpt,
	intent::{self, IntentDraft},
	set_intent::{self, SetIntentDraft},
	signal::{self, ChunkRole, ChunkSignalDraft, SectionSpan, Trajectory},
	weights::{self, SetPositionContext},
};
use lkg_storage::{
	coverage as coverage_store,
	coverage::ConceptInput,
	materials,
	models::{
		ConceptCoverage, MaterialChunkLink, MaterialChunkSignal, MaterialEdge, MaterialSetIntent,
		SignatureState,
	},
	signals as signal_store,
	signatures,
};

use crate::{
	Error, LkgService, Result, StageDeps, artifact_cache,
	artifact_cache::CacheKey,
	cross_set,
	file_signature::{intent_from_row, intent_row},
	materials::SetMaterials,
	prompts,
	stage::{self, StageContext, StageInput, StageTrace},
};

pub const STAGE: &str = "material_signal";
/// Set-position score a fresh signal carries until the set intent is known.
pub const INITIAL_SET_POSITION: f64 = 0.8;
const INTENT_EXCERPTS: usize = 3;
const SET_DIGEST_COVERAGE: usize = 40;
const SET_DIGEST_EDGES: usize = 30;

#[derive(Clone, Debug, Default, Serialize)]
pub struct MaterialSignalOutput {
	pub files: usize,
	pub intents_written: usize,
	pub intents_fallback: usize,
	pub chunks_considered: usize,
	pub signals_written: u64,
	pub signals_fallback: usize,
	pub metadata_updates: usize,
	pub coverage_rows: usize,
	pub concepts_written: usize,
	pub file_edges: usize,
	pub chunk_links: usize,
	pub set_intent_fallback: bool,
	pub set_positions: u64,
	pub compound_weights: u64,
	#[serde(flatten)]
	pub trace: StageTrace,
}

struct IntentJob {
	file_id: Uuid,
	file_name: String,
	signature: Option<SignatureState>,
	excerpts: Vec<String>,
}

struct BatchChunk {
	chunk_id: Uuid,
	excerpt: String,
	section_path: Option<String>,
	page: Option<i32>,
}

struct SignalBatch {
	file_id: Uuid,
	file_name: String,
	intent: IntentDraft,
	chunks: Vec<BatchChunk>,
}

struct BatchOutcome {
	file_id: Uuid,
	drafts: Vec<ChunkSignalDraft>,
	sections: BTreeMap<Uuid, Option<String>>,
	warning: Option<String>,
}

impl LkgService {
	pub async fn build_material_signals(
		&self,
		ctx: &StageContext,
		input: &StageInput,
		env: &PipelineEnv,
	) -> Result<MaterialSignalOutput> {
		input.require_set()?;
		ctx.check()?;

		let mut output = MaterialSignalOutput::default();

		if !env.material_signal.enabled {
			output.trace.disabled = true;

			return Ok(output);
		}

		let deps = self.deps();
		let set_id = input.material_set_id;
		let materials = SetMaterials::load(&deps.pool, set_id).await?;
		let profile = materials.profile(&deps.pool, set_id).await?;
		let (params, trace) =
			adaptive::resolve_material_signal(&profile, &env.material_signal, env.adaptive_enabled);

		output.files = materials.files.len();
		output.trace.adaptive = trace;

		let cache_key = CacheKey::new(
			input,
			STAGE,
			input.path_id,
			&json!({
				"files": materials.fingerprint_payload(),
				"env": env.snapshot("MATERIAL_SIGNAL_"),
			}),
		);
		let use_cache = env.cache.material_signal && !env.material_signal.force_rebuild;

		if use_cache
			&& artifact_cache::lookup(&deps.pool, &cache_key, &mut output.trace).await.is_some()
		{
			output.trace.cache_hit = true;

			return Ok(output);
		}

		let states: BTreeMap<Uuid, SignatureState> =
			signatures::list_signature_states(&deps.pool, set_id)
				.await?
				.into_iter()
				.map(|state| (state.material_file_id, state))
				.collect();
		let intents = resolve_intents(&deps, ctx, &materials, &states, &params, &mut output).await?;
		let rows =
			build_signals(&deps, ctx, &materials, &intents.drafts, &params, env, &mut output).await?;
		let mut tx = deps.pool.begin().await?;

		signatures::upsert_intents(&mut *tx, &intents.written).await?;

		for batch in rows.signals.chunks(signal_store::SIGNAL_BATCH_SIZE) {
			output.signals_written += signal_store::upsert_signals(&mut *tx, batch).await?;
		}

		tx.commit().await?;

		if env.material_signal.write_chunk_metadata {
			output.metadata_updates = merge_chunk_metadata(
				&deps.pool,
				rows.metadata,
				env.material_signal.metadata_update_concurrency,
				&mut output.trace,
			)
			.await;
		}

		ctx.check()?;

		let stored = signal_store::list_signals(&deps.pool, set_id).await?;
		let views: Vec<SignalView> = stored.iter().map(signal_view).collect();
		let signature_keys: Vec<(Uuid, Vec<String>)> = states
			.values()
			.map(|state| (state.material_file_id, state.concept_keys.clone()))
			.collect();
		let aggregation = coverage::aggregate_coverage(&views, &signature_keys);
		let edges = coverage::derive_file_edges(&aggregation.file_stats);
		let links = coverage::derive_chunk_links(
			&views,
			params.max_links_per_concept,
			params.max_chunk_links,
		);

		write_set_coverage(&deps.pool, set_id, input.path_id, &aggregation.rows, &edges, &links)
			.await?;

		output.coverage_rows = aggregation.rows.len();
		output.file_edges = edges.len();
		output.chunk_links = links.len();

		match upsert_set_concepts(&deps.pool, set_id, &aggregation.rows).await {
			Ok(count) => output.concepts_written = count,
			Err(err) => output.trace.warn(STAGE, format!("Concept weights were not written: {err}.")),
		}

		let file_ids: BTreeSet<Uuid> = materials.files.iter().map(|file| file.id).collect();
		let position = if env.material_signal.set_enabled {
			let draft = build_set_intent(
				&deps,
				ctx,
				&materials,
				&intents.drafts,
				&aggregation.rows,
				&edges,
				&file_ids,
				&mut output.trace,
			)
			.await?;

			output.set_intent_fallback = draft.is_fallback();

			if let Err(err) =
				coverage_store::upsert_set_intent(&deps.pool, &set_intent_row(set_id, &draft)).await
			{
				output.trace.warn(STAGE, format!("Set intent was not written: {err}."));
			}

			SetPositionContext::new(&draft)
		} else {
			match coverage_store::get_set_intent(&deps.pool, set_id).await {
				Ok(Some(row)) => SetPositionContext::new(&set_intent_from_row(&row)),
				Ok(None) => SetPositionContext::default(),
				Err(err) => {
					output.trace.warn(STAGE, format!("Stored set intent unavailable: {err}."));

					SetPositionContext::default()
				},
			}
		};
		let (chunk_ids, scores): (Vec<Uuid>, Vec<f64>) = stored
			.iter()
			.map(|row| {
				let keys = Trajectory::from_value(Some(&row.trajectory)).all_keys();

				(row.material_chunk_id, position.score(row.material_file_id, &keys))
			})
			.unzip();

		output.set_positions =
			signal_store::update_set_positions(&deps.pool, &chunk_ids, &scores).await?;

		let relevance = if env.material_signal.global_enabled {
			load_relevance(&deps.pool, input.owner_user_id, &mut output.trace).await
		} else {
			BTreeMap::new()
		};

		output.compound_weights = write_compound_weights(&deps.pool, set_id, &relevance).await?;

		if use_cache {
			artifact_cache::store(&deps.pool, &cache_key, &counts(&output), &mut output.trace).await;
		}

		tracing::info!(
			material_set_id = %set_id,
			signals = output.signals_written,
			coverage = output.coverage_rows,
			edges = output.file_edges,
			links = output.chunk_links,
			"Material signals built."
		);

		Ok(output)
	}
}

fn counts(output: &MaterialSignalOutput) -> Value {
	json!({
		"signals_written": output.signals_written,
		"coverage_rows": output.coverage_rows,
		"file_edges": output.file_edges,
		"chunk_links": output.chunk_links,
	})
}

struct ResolvedIntents {
	drafts: BTreeMap<Uuid, IntentDraft>,
	written: Vec<lkg_storage::models::MaterialIntent>,
}

/// Stage 1: reuse stored model intents, generate the rest, and fall back when generation fails.
async fn resolve_intents(
	deps: &StageDeps,
	ctx: &StageContext,
	materials: &SetMaterials,
	states: &BTreeMap<Uuid, SignatureState>,
	params: &MaterialSignalParams,
	output: &mut MaterialSignalOutput,
) -> Result<ResolvedIntents> {
	let set_id = materials.files.first().map(|file| file.material_set_id).unwrap_or_default();
	let stored: BTreeMap<Uuid, IntentDraft> = signatures::list_intents(&deps.pool, set_id)
		.await?
		.iter()
		.map(|row| (row.material_file_id, intent_from_row(row)))
		.filter(|(_, draft)| !draft.is_fallback() && !draft.is_empty())
		.collect();
	let drafts = Arc::new(Mutex::new(stored));
	let semaphore = Arc::new(Semaphore::new(params.intent_concurrency.max(1)));
	let mut workers = JoinSet::new();

	for file in &materials.files {
		if drafts.lock().await.contains_key(&file.id) {
			continue;
		}

		let job = IntentJob {
			file_id: file.id,
			file_name: file.original_name.clone(),
			signature: states.get(&file.id).cloned(),
			excerpts: materials
				.excerpts(
					file.id,
					INTENT_EXCERPTS,
					params.chunk_excerpt_chars,
					params.chunk_excerpt_chars * INTENT_EXCERPTS,
				)
				.into_iter()
				.map(|excerpt| excerpt.text)
				.collect(),
		};
		let deps = deps.clone();
		let ctx = ctx.clone();
		let semaphore = semaphore.clone();
		let drafts = drafts.clone();

		workers.spawn(async move {
			let _permit = semaphore.acquire_owned().await.map_err(stage::permit_error)?;
			let file_id = job.file_id;
			let (draft, warning) = match generate_intent(&deps, &ctx, &job).await {
				Ok(draft) if !draft.is_empty() => (draft, None),
				Ok(_) => (fallback_for(&job), Some(format!("Empty intent for file {file_id}."))),
				Err(Error::Cancelled) => return Err(Error::Cancelled),
				Err(err) => (
					fallback_for(&job),
					Some(format!("Intent generation failed for file {file_id}: {err}.")),
				),
			};

			drafts.lock().await.insert(file_id, draft.clone());

			Ok::<_, Error>((file_id, draft, warning))
		});
	}

	let mut written = Vec::new();

	while let Some(joined) = workers.join_next().await {
		let (file_id, draft, warning) = match joined.map_err(stage::join_error).and_then(|r| r) {
			Ok(result) => result,
			Err(err) => {
				workers.abort_all();

				return Err(err);
			},
		};

		if let Some(warning) = warning {
			output.intents_fallback += 1;
			output.trace.warn(STAGE, warning);
		}

		written.push(intent_row(set_id, file_id, &draft));
	}

	written.sort_by_key(|row| row.material_file_id);

	output.intents_written = written.len();

	let drafts = std::mem::take(&mut *drafts.lock().await);

	Ok(ResolvedIntents { drafts, written })
}

async fn generate_intent(deps: &StageDeps, ctx: &StageContext, job: &IntentJob) -> Result<IntentDraft> {
	let signature = job.signature.as_ref().map(|state| {
		json!({
			"summary_md": state.summary_md,
			"topics": state.topics,
			"concept_keys": state.concept_keys,
			"difficulty": state.difficulty,
		})
	});
	let user = prompts::user_prompt(&[
		("FILE", json!({ "file_id": job.file_id, "name": job.file_name })),
		("SIGNATURE", signature.unwrap_or(Value::Null)),
		("EXCERPTS", json!(job.excerpts)),
	]);
	let value = deps
		.generate_json(
			ctx,
			prompts::MATERIAL_INTENT_SYSTEM,
			&user,
			prompts::MATERIAL_INTENT_SCHEMA,
			&prompts::material_intent_schema(),
		)
		.await?;

	Ok(IntentDraft::from_llm(&value))
}

fn fallback_for(job: &IntentJob) -> IntentDraft {
	match &job.signature {
		Some(state) => intent::fallback_intent(
			&job.file_name,
			&state.summary_md,
			&state.topics,
			&state.concept_keys,
		),
		None => intent::fallback_intent(&job.file_name, "", &[], &[]),
	}
}

struct SignalRows {
	signals: Vec<MaterialChunkSignal>,
	metadata: Vec<(Uuid, Value)>,
}

/// Stage 1b: batches pending chunks per file and scores them.
async fn build_signals(
	deps: &StageDeps,
	ctx: &StageContext,
	materials: &SetMaterials,
	intents: &BTreeMap<Uuid, IntentDraft>,
	params: &MaterialSignalParams,
	env: &PipelineEnv,
	output: &mut MaterialSignalOutput,
) -> Result<SignalRows> {
	let set_id = materials.files.first().map(|file| file.material_set_id).unwrap_or_default();
	let mut spans: BTreeMap<Uuid, Vec<SectionSpan>> = BTreeMap::new();

	for row in signatures::list_section_spans(&deps.pool, set_id).await? {
		spans.entry(row.material_file_id).or_default().push(SectionSpan {
			path: row.path,
			start_page: row.start_page,
			end_page: row.end_page,
			start_sec: row.start_sec,
			end_sec: row.end_sec,
		});
	}

	let existing: HashSet<Uuid> = if env.material_signal.force_rebuild {
		HashSet::new()
	} else {
		signal_store::list_signals(&deps.pool, set_id)
			.await?
			.into_iter()
			.map(|row| row.material_chunk_id)
			.collect()
	};
	let mut batches = Vec::new();

	for file in &materials.files {
		let file_spans = spans.get(&file.id).map(Vec::as_slice).unwrap_or_default();
		let pending: Vec<BatchChunk> = materials
			.chunks_of(file.id)
			.iter()
			.filter(|chunk| !existing.contains(&chunk.id) && !chunk.text.trim().is_empty())
			.take(params.max_chunks_per_file)
			.map(|chunk| BatchChunk {
				chunk_id: chunk.id,
				excerpt: excerpt::truncate_chars(chunk.text.trim(), params.chunk_excerpt_chars),
				section_path: signal::map_chunk_section(
					chunk.page,
					chunk.start_sec,
					chunk.end_sec,
					file_spans,
				),
				page: chunk.page,
			})
			.collect();

		output.chunks_considered += pending.len();

		let intent = intents.get(&file.id).cloned().unwrap_or_default();
		let mut pending = pending.into_iter().peekable();

		while pending.peek().is_some() {
			batches.push(SignalBatch {
				file_id: file.id,
				file_name: file.original_name.clone(),
				intent: intent.clone(),
				chunks: pending.by_ref().take(params.chunk_batch_size.max(1)).collect(),
			});
		}
	}

	let semaphore = Arc::new(Semaphore::new(params.concurrency.max(1)));
	let mut workers = JoinSet::new();

	for batch in batches {
		let deps = deps.clone();
		let ctx = ctx.clone();
		let semaphore = semaphore.clone();

		workers.spawn(async move {
			let _permit = semaphore.acquire_owned().await.map_err(stage::permit_error)?;

			score_batch(&deps, &ctx, batch).await
		});
	}

	let mut drafts = Vec::new();
	let mut files_of = BTreeMap::new();
	let mut sections = BTreeMap::new();

	while let Some(joined) = workers.join_next().await {
		let outcome = match joined.map_err(stage::join_error).and_then(|r| r) {
			Ok(outcome) => outcome,
			Err(err) => {
				workers.abort_all();

				return Err(err);
			},
		};

		if let Some(warning) = outcome.warning {
			output.trace.warn(STAGE, warning);
		}

		for draft in &outcome.drafts {
			files_of.insert(draft.chunk_id, outcome.file_id);
		}

		sections.extend(outcome.sections);
		drafts.extend(outcome.drafts);
	}

	let drafts = signal::dedupe_signals(drafts);
	let mut rows = SignalRows { signals: Vec::with_capacity(drafts.len()), metadata: Vec::new() };

	for draft in drafts {
		let Some(file_id) = files_of.get(&draft.chunk_id).copied() else {
			continue;
		};
		let section_path = sections.get(&draft.chunk_id).cloned().flatten();

		if draft.is_fallback() {
			output.signals_fallback += 1;
		}

		rows.metadata.push((
			draft.chunk_id,
			json!({
				"material_signal": {
					"role": draft.role.as_str(),
					"signal_strength": draft.scores.signal_strength,
					"section_path": section_path,
				}
			}),
		));
		rows.signals.push(signal_row(set_id, file_id, &draft, section_path));
	}

	Ok(rows)
}

async fn score_batch(deps: &StageDeps, ctx: &StageContext, batch: SignalBatch) -> Result<BatchOutcome> {
	let ids: HashSet<Uuid> = batch.chunks.iter().map(|chunk| chunk.chunk_id).collect();
	let sections = batch.chunks.iter().map(|chunk| (chunk.chunk_id, chunk.section_path.clone())).collect();
	let user = prompts::user_prompt(&[
		("FILE", json!({ "file_id": batch.file_id, "name": batch.file_name })),
		(
			"INTENT",
			json!({
				"from_state": batch.intent.from_state,
				"to_state": batch.intent.to_state,
				"core_thread": batch.intent.core_thread,
				"destination_concepts": batch.intent.destination_concepts,
				"prerequisite_concepts": batch.intent.prerequisite_concepts,
			}),
		),
		(
			"CHUNKS",
			Value::Array(
				batch
					.chunks
					.iter()
					.map(|chunk| {
						json!({
							"chunk_id": chunk.chunk_id,
							"section_path": chunk.section_path,
							"page": chunk.page,
							"excerpt": chunk.excerpt,
						})
					})
					.collect(),
			),
		),
	]);
	let response = deps
		.generate_json(
			ctx,
			prompts::CHUNK_SIGNAL_SYSTEM,
			&user,
			prompts::CHUNK_SIGNAL_SCHEMA,
			&prompts::chunk_signal_schema(),
		)
		.await;
	let (mut drafts, warning) = match response {
		Ok(value) => (signal::parse_signal_items(&value, &ids), None),
		Err(Error::Cancelled) => return Err(Error::Cancelled),
		Err(err) => (
			Vec::new(),
			Some(format!(
				"Chunk signals fell back for {} chunks of file {}: {err}.",
				batch.chunks.len(),
				batch.file_id
			)),
		),
	};
	let answered: HashSet<Uuid> = drafts.iter().map(|draft| draft.chunk_id).collect();
	let terms = batch.intent.alignment_terms();

	for chunk in batch.chunks.iter().filter(|chunk| !answered.contains(&chunk.chunk_id)) {
		drafts.push(signal::fallback_signal(chunk.chunk_id, &chunk.excerpt, &terms));
	}

	Ok(BatchOutcome { file_id: batch.file_id, drafts, sections, warning })
}

fn signal_row(
	material_set_id: Uuid,
	material_file_id: Uuid,
	draft: &ChunkSignalDraft,
	section_path: Option<String>,
) -> MaterialChunkSignal {
	let scores = &draft.scores;

	MaterialChunkSignal {
		id: Uuid::new_v4(),
		material_chunk_id: draft.chunk_id,
		material_file_id,
		material_set_id,
		role: draft.role.as_str().to_string(),
		signal_strength: clamp01(scores.signal_strength),
		floor_signal: clamp01(scores.floor_signal),
		intent_alignment_score: clamp01(scores.intent_alignment_score),
		set_position_score: INITIAL_SET_POSITION,
		novelty_score: clamp01(scores.novelty_score),
		density_score: clamp01(scores.density_score),
		complexity_score: clamp01(scores.complexity_score),
		load_bearing_score: clamp01(scores.load_bearing_score),
		compound_weight: 0.0,
		trajectory: draft.trajectory.to_value(),
		metadata: json!({ "notes": draft.notes, "section_path": section_path }),
	}
}

fn signal_view(row: &MaterialChunkSignal) -> SignalView {
	SignalView {
		chunk_id: row.material_chunk_id,
		file_id: row.material_file_id,
		role: ChunkRole::parse(&row.role),
		signal_strength: row.signal_strength,
		trajectory: Trajectory::from_value(Some(&row.trajectory)),
	}
}

/// Best-effort read-modify-write of chunk metadata; returns how many chunks were updated.
async fn merge_chunk_metadata(
	pool: &PgPool,
	updates: Vec<(Uuid, Value)>,
	concurrency: usize,
	trace: &mut StageTrace,
) -> usize {
	let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
	let mut workers = JoinSet::new();

	for (chunk_id, patch) in updates {
		let pool = pool.clone();
		let semaphore = semaphore.clone();

		workers.spawn(async move {
			let _permit = semaphore.acquire_owned().await.map_err(stage::permit_error)?;

			materials::merge_chunk_metadata(&pool, chunk_id, &patch).await?;

			Ok::<_, Error>(())
		});
	}

	let mut updated = 0;
	let mut failed = 0;

	while let Some(joined) = workers.join_next().await {
		match joined.map_err(stage::join_error).and_then(|r| r) {
			Ok(()) => updated += 1,
			Err(err) => {
				failed += 1;

				tracing::debug!(error = %err, "Chunk metadata merge failed.");
			},
		}
	}

	if failed > 0 {
		trace.warn(STAGE, format!("{failed} chunk metadata updates failed."));
	}

	updated
}

/// Coverage, file edges, and chunk links land together or not at all.
async fn write_set_coverage(
	pool: &PgPool,
	material_set_id: Uuid,
	path_id: Option<Uuid>,
	rows: &[CoverageRow],
	edges: &[FileEdge],
	links: &[coverage::ChunkLink],
) -> Result<()> {
	let coverage: Vec<ConceptCoverage> = rows
		.iter()
		.map(|row| ConceptCoverage {
			material_set_id,
			concept_key: row.concept_key.clone(),
			path_id,
			canonical_concept_id: None,
			coverage_type: row.coverage_type.as_str().to_string(),
			depth: row.depth.as_str().to_string(),
			score: row.score,
			source_material_file_ids: row.source_material_file_ids.clone(),
		})
		.collect();
	let edges: Vec<MaterialEdge> = edges
		.iter()
		.map(|edge| MaterialEdge {
			material_set_id,
			from_material_file_id: edge.from_file_id,
			to_material_file_id: edge.to_file_id,
			edge_type: edge.edge_type.as_str().to_string(),
			strength: edge.strength,
			bridging_concepts: edge.bridging_concepts.clone(),
		})
		.collect();
	let links: Vec<MaterialChunkLink> = links
		.iter()
		.map(|link| MaterialChunkLink {
			material_set_id,
			from_material_chunk_id: link.from_chunk_id,
			to_material_chunk_id: link.to_chunk_id,
			relation: link.relation.as_str().to_string(),
			strength: link.strength,
			concept_key: link.concept_key.clone(),
		})
		.collect();
	let mut tx = pool.begin().await?;

	coverage_store::upsert_coverage(&mut *tx, &coverage).await?;
	coverage_store::upsert_edges(&mut *tx, &edges).await?;
	coverage_store::upsert_chunk_links(&mut *tx, &links).await?;
	tx.commit().await?;

	Ok(())
}

async fn upsert_set_concepts(pool: &PgPool, material_set_id: Uuid, rows: &[CoverageRow]) -> Result<usize> {
	let inputs: Vec<ConceptInput> = rows
		.iter()
		.map(|row| ConceptInput {
			key: row.concept_key.clone(),
			name: key_phrase(&row.concept_key),
			summary: String::new(),
			metadata: json!({
				"weight": clamp01(row.score),
				"coverage_type": row.coverage_type.as_str(),
				"depth": row.depth.as_str(),
			}),
		})
		.collect();
	let concepts = coverage_store::upsert_concepts(
		pool,
		coverage_store::SCOPE_MATERIAL_SET,
		material_set_id,
		&inputs,
	)
	.await?;

	Ok(concepts.len())
}

/// Stage 2d: the model's view of the set, or a derivation from intents, coverage, and edges.
#[allow(clippy::too_many_arguments)]
async fn build_set_intent(
	deps: &StageDeps,
	ctx: &StageContext,
	materials: &SetMaterials,
	intents: &BTreeMap<Uuid, IntentDraft>,
	rows: &[CoverageRow],
	edges: &[FileEdge],
	file_ids: &BTreeSet<Uuid>,
	trace: &mut StageTrace,
) -> Result<SetIntentDraft> {
	let mut top: Vec<&CoverageRow> = rows.iter().collect();

	top.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.concept_key.cmp(&b.concept_key)));
	top.truncate(SET_DIGEST_COVERAGE);

	let files: Vec<Value> = materials
		.files
		.iter()
		.map(|file| {
			let intent = intents.get(&file.id);

			json!({
				"file_id": file.id,
				"name": file.original_name,
				"from_state": intent.map(|i| i.from_state.as_str()),
				"to_state": intent.map(|i| i.to_state.as_str()),
				"core_thread": intent.map(|i| i.core_thread.as_str()),
			})
		})
		.collect();
	let coverage: Vec<Value> = top
		.iter()
		.map(|row| {
			json!({
				"concept_key": row.concept_key,
				"coverage_type": row.coverage_type.as_str(),
				"depth": row.depth.as_str(),
				"score": row.score,
			})
		})
		.collect();
	let edge_hints: Vec<Value> = edges
		.iter()
		.take(SET_DIGEST_EDGES)
		.map(|edge| {
			json!({
				"from_file_id": edge.from_file_id,
				"to_file_id": edge.to_file_id,
				"edge_type": edge.edge_type.as_str(),
				"strength": edge.strength,
			})
		})
		.collect();
	let user = prompts::user_prompt(&[
		("FILE_INTENTS", Value::Array(files)),
		("TOP_COVERAGE", Value::Array(coverage)),
		("EDGE_HINTS", Value::Array(edge_hints)),
		("CONTEXT", json!({ "file_count": file_ids.len(), "concept_count": rows.len() })),
	]);
	let response = deps
		.generate_json(
			ctx,
			prompts::SET_SIGNAL_SYSTEM,
			&user,
			prompts::SET_SIGNAL_SCHEMA,
			&prompts::set_signal_schema(),
		)
		.await;

	match response {
		Ok(value) => {
			let draft = SetIntentDraft::from_llm(&value, file_ids);

			if draft.spine_material_file_ids.is_empty() && draft.core_thread.is_empty() {
				trace.warn(STAGE, "Set intent response was empty; derived it instead.".to_string());

				return Ok(set_intent::fallback_set_intent(intents, rows, edges, file_ids));
			}

			Ok(draft)
		},
		Err(Error::Cancelled) => Err(Error::Cancelled),
		Err(err) => {
			trace.warn(STAGE, format!("Set intent generation failed: {err}."));

			Ok(set_intent::fallback_set_intent(intents, rows, edges, file_ids))
		},
	}
}

fn set_intent_row(material_set_id: Uuid, draft: &SetIntentDraft) -> MaterialSetIntent {
	MaterialSetIntent {
		material_set_id,
		from_state: draft.from_state.clone(),
		to_state: draft.to_state.clone(),
		core_thread: draft.core_thread.clone(),
		spine_material_file_ids: draft.spine_material_file_ids.clone(),
		satellite_material_file_ids: draft.satellite_material_file_ids.clone(),
		gaps_concept_keys: draft.gaps_concept_keys.clone(),
		redundancy_notes: draft.redundancy_notes.clone(),
		conflict_notes: draft.conflict_notes.clone(),
		metadata: draft.metadata(),
	}
}

fn set_intent_from_row(row: &MaterialSetIntent) -> SetIntentDraft {
	SetIntentDraft {
		from_state: row.from_state.clone(),
		to_state: row.to_state.clone(),
		core_thread: row.core_thread.clone(),
		spine_material_file_ids: row.spine_material_file_ids.clone(),
		satellite_material_file_ids: row.satellite_material_file_ids.clone(),
		gaps_concept_keys: row.gaps_concept_keys.clone(),
		redundancy_notes: row.redundancy_notes.clone(),
		conflict_notes: row.conflict_notes.clone(),
		notes: lkg_domain::string_list(row.metadata.get("notes")),
	}
}

/// Persisted global relevance first, then a fresh deterministic compute; empty means the default.
async fn load_relevance(pool: &PgPool, user_id: Uuid, trace: &mut StageTrace) -> BTreeMap<String, f64> {
	match lkg_storage::cross_set::list_concept_relevance(pool, user_id).await {
		Ok(rows) if !rows.is_empty() =>
			return rows.into_iter().map(|row| (row.key, row.cross_set_relevance)).collect(),
		Ok(_) => {},
		Err(err) => trace.warn(STAGE, format!("Stored cross-set relevance unavailable: {err}.")),
	}

	match cross_set::deterministic_relevance(pool, user_id).await {
		Ok(map) => map,
		Err(err) => {
			trace.warn(STAGE, format!("Cross-set relevance could not be computed: {err}."));

			BTreeMap::new()
		},
	}
}

/// Recomputes every chunk's compound weight in the set from its stored factors.
pub(crate) async fn write_compound_weights(
	pool: &PgPool,
	material_set_id: Uuid,
	relevance: &BTreeMap<String, f64>,
) -> Result<u64> {
	let signals = signal_store::list_signals(pool, material_set_id).await?;
	let (chunk_ids, weights): (Vec<Uuid>, Vec<f64>) = signals
		.iter()
		.map(|row| {
			let keys = Trajectory::from_value(Some(&row.trajectory)).all_keys();
			let weight = weights::compound_weight(
				row.signal_strength,
				row.intent_alignment_score,
				row.set_position_score,
				weights::cross_set_relevance(&keys, relevance),
			);

			(row.material_chunk_id, weight)
		})
		.unzip();

	if chunk_ids.is_empty() {
		return Ok(0);
	}

	Ok(signal_store::update_compound_weights(pool, &chunk_ids, &weights).await?)
}
