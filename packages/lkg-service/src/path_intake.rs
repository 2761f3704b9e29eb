//! Path intake: propose how a set's files group into learning paths and confirm it with the user.
//!
//! Every invocation inspects the path metadata and the chat thread, advances the intake by at
//! most one step, and returns. Re-invoking the stage is how a waiting intake resumes.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use lkg_config::PipelineEnv;
use lkg_domain::{
	adaptive,
	intake::{self, IntakeFile, IntakeMaterialFilter, IntakeProposal},
	soft_split::{self, PathEvidence},
};
use lkg_storage::{
	chat as chat_store,
	models::{ChatMessage, Path, SignatureState},
	parse_pg_vector, paths, signatures,
};

use crate::{
	Error, LkgService, Result, StageDeps, artifact_cache,
	artifact_cache::CacheKey,
	chat::{self, ChatPost, ROLE_ASSISTANT, ROLE_USER},
	materials::SetMaterials,
	prompts,
	stage::{StageContext, StageInput, StageTrace},
};

pub const STAGE: &str = "path_intake";
pub const KIND_QUESTIONS: &str = "path_intake_questions";
pub const KIND_REVIEW: &str = "path_intake_review";
pub const KIND_ACK: &str = "path_intake_ack";
/// Action token a reply carries to accept the proposal unchanged.
pub const CONFIRM_TOKEN: &str = "confirm";
pub const CHANGE_TOKEN: &str = "change";

const META_INTAKE: &str = "intake";
const META_LOCKED: &str = "intake_locked";
const META_JOB_ID: &str = "intake_job_id";
const META_CONFIRMED_BY_USER: &str = "intake_confirmed_by_user";
const META_FILTER: &str = "intake_material_filter";
const META_PATHS_CONFIRMED: &str = "paths_confirmed";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntakeState {
	Fresh,
	Generating,
	Proposing,
	WaitingUser,
	Regenerating,
	Final,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntakeStatus {
	Succeeded,
	WaitingUser,
	NeedsConfirmation,
}

#[derive(Clone, Debug, Serialize)]
pub struct PathIntakeOutput {
	pub status: IntakeStatus,
	/// The step this invocation took.
	pub state: IntakeState,
	pub proposal: IntakeProposal,
	pub message_id: Option<Uuid>,
	#[serde(flatten)]
	pub trace: StageTrace,
}

/// Intake fields persisted on the path.
#[derive(Debug, Default)]
struct StoredIntake {
	proposal: Option<IntakeProposal>,
	locked: bool,
}
impl StoredIntake {
	fn from_metadata(metadata: &Value) -> Self {
		Self {
			proposal: metadata
				.get(META_INTAKE)
				.filter(|value| value.is_object())
				.and_then(|value| serde_json::from_value(value.clone()).ok()),
			locked: metadata.get(META_LOCKED).and_then(Value::as_bool).unwrap_or(false),
		}
	}
}

struct IntakeRun<'a> {
	deps: StageDeps,
	ctx: &'a StageContext,
	input: &'a StageInput,
	path_id: Uuid,
	job_key: String,
	trace: StageTrace,
}

impl LkgService {
	pub async fn run_path_intake(
		&self,
		ctx: &StageContext,
		input: &StageInput,
		env: &PipelineEnv,
	) -> Result<PathIntakeOutput> {
		let path_id = input.require_path()?;

		ctx.check()?;

		let deps = self.deps();
		let path = paths::get_path(&deps.pool, path_id)
			.await?
			.ok_or_else(|| Error::UpstreamData { message: format!("Path {path_id} does not exist.") })?;

		if path.user_id != input.owner_user_id {
			return Err(Error::InvalidRequest {
				message: format!("Path {path_id} belongs to another user."),
			});
		}

		let stored = StoredIntake::from_metadata(&path.metadata);
		let run = IntakeRun {
			deps,
			ctx,
			input,
			path_id,
			job_key: input.job_key(),
			trace: StageTrace::default(),
		};

		if stored.locked
			&& let Some(proposal) = stored.proposal
		{
			return Ok(run.finish(IntakeStatus::Succeeded, IntakeState::Fresh, proposal, None));
		}

		let materials = SetMaterials::load(&run.deps.pool, input.material_set_id).await?;
		let files = materials.intake_files();

		if let (Some(thread_id), Some(proposal)) = (input.thread_id, stored.proposal)
			&& let Some(questions) = chat_store::find_message_by_kind(
				&run.deps.pool,
				thread_id,
				input.owner_user_id,
				KIND_QUESTIONS,
				&run.job_key,
			)
			.await?
		{
			return run.resume(thread_id, &questions, proposal, &files).await;
		}

		run.generate(env, &path, &materials, &files).await
	}
}

impl IntakeRun<'_> {
	fn finish(
		self,
		status: IntakeStatus,
		state: IntakeState,
		proposal: IntakeProposal,
		message_id: Option<Uuid>,
	) -> PathIntakeOutput {
		tracing::info!(
			path_id = %self.path_id,
			status = ?status,
			state = ?state,
			paths = proposal.paths.len(),
			"Path intake step finished."
		);

		PathIntakeOutput { status, state, proposal, message_id, trace: self.trace }
	}

	/// Waiting on the user: either nothing new arrived, or a reply finalizes the proposal.
	async fn resume(
		mut self,
		thread_id: Uuid,
		questions: &ChatMessage,
		stored: IntakeProposal,
		files: &[IntakeFile],
	) -> Result<PathIntakeOutput> {
		let later = chat_store::list_messages_after(&self.deps.pool, thread_id, questions.seq).await?;
		let replies: Vec<&ChatMessage> = later
			.iter()
			.filter(|message| message.role == ROLE_USER && message.user_id == self.input.owner_user_id)
			.collect();

		if replies.is_empty() {
			return Ok(self.finish(
				IntakeStatus::WaitingUser,
				IntakeState::WaitingUser,
				stored,
				Some(questions.id),
			));
		}

		let confirmed = replies.last().is_some_and(|reply| is_confirm(reply));
		let (proposal, state) = if confirmed {
			(stored, IntakeState::Final)
		} else {
			let assistant: Vec<&str> = later
				.iter()
				.filter(|message| message.role == ROLE_ASSISTANT)
				.map(|message| message.content.as_str())
				.collect();
			let reply: Vec<&str> = replies.iter().map(|message| message.content.as_str()).collect();

			(self.regenerate(files, &stored, &reply, &assistant).await?, IntakeState::Regenerating)
		};
		let mut proposal = intake::normalize_proposal(proposal, files);

		proposal.paths_confirmed = true;
		proposal.needs_clarification = false;

		self.persist(&proposal, true, true).await?;
		self.post(thread_id, KIND_REVIEW, intake::render_questions(&proposal, files), Map::new())
			.await?;

		let ack = self.post(thread_id, KIND_ACK, ack_text(&proposal), Map::new()).await?;

		Ok(self.finish(IntakeStatus::Succeeded, state, proposal, Some(ack.id)))
	}

	async fn regenerate(
		&mut self,
		files: &[IntakeFile],
		stored: &IntakeProposal,
		replies: &[&str],
		assistant: &[&str],
	) -> Result<IntakeProposal> {
		let user = prompts::user_prompt(&[
			("FILES", files_json(files)),
			("EXISTING_PATHS_JSON", serde_json::to_value(stored).unwrap_or(Value::Null)),
			("USER_REPLY", json!(replies.join("\n\n"))),
			("ASSISTANT_MESSAGES", json!(assistant)),
		]);
		let response = self
			.deps
			.generate_json(
				self.ctx,
				prompts::PATH_INTAKE_SYSTEM,
				&user,
				prompts::PATH_INTAKE_SCHEMA,
				&prompts::path_intake_schema(),
			)
			.await;

		match response.and_then(parse_proposal) {
			Ok(proposal) => Ok(proposal),
			Err(Error::Cancelled) => Err(Error::Cancelled),
			Err(err) => {
				self.trace.warn(
					STAGE,
					format!("Intake regeneration failed; keeping the stored proposal: {err}."),
				);

				Ok(stored.clone())
			},
		}
	}

	async fn generate(
		mut self,
		env: &PipelineEnv,
		path: &Path,
		materials: &SetMaterials,
		files: &[IntakeFile],
	) -> Result<PathIntakeOutput> {
		let set_id = self.input.material_set_id;
		let profile = materials.profile(&self.deps.pool, set_id).await?;
		let (params, adaptive_trace) =
			adaptive::resolve_path_intake(&profile, &env.path_intake, env.adaptive_enabled);

		self.trace.adaptive = adaptive_trace;

		let states: BTreeMap<Uuid, SignatureState> =
			signatures::list_signature_states(&self.deps.pool, set_id)
				.await?
				.into_iter()
				.map(|state| (state.material_file_id, state))
				.collect();
		let cache_key = CacheKey::new(
			self.input,
			STAGE,
			Some(self.path_id),
			&json!({
				"files": materials.fingerprint_payload(),
				"env": env.snapshot("PATH_INTAKE_"),
				"job": self.job_key,
			}),
		);
		let cached = if env.cache.path_intake {
			artifact_cache::lookup(&self.deps.pool, &cache_key, &mut self.trace)
				.await
				.and_then(|value| serde_json::from_value::<IntakeProposal>(value).ok())
		} else {
			None
		};
		let proposal = match cached {
			Some(proposal) => {
				self.trace.cache_hit = true;

				proposal
			},
			None => {
				let file_context: Vec<Value> = materials
					.files
					.iter()
					.map(|file| {
						let state = states.get(&file.id);
						let excerpts: Vec<String> = materials
							.excerpts(
								file.id,
								params.excerpts_per_file,
								params.excerpt_max_chars,
								params.excerpt_max_total_chars / files.len().max(1),
							)
							.into_iter()
							.map(|excerpt| excerpt.text)
							.collect();

						json!({
							"file_id": file.id,
							"name": file.original_name,
							"mime_type": file.mime_type,
							"summary_md": state.map(|s| s.summary_md.as_str()),
							"topics": state.map(|s| s.topics.clone()),
							"excerpts": excerpts,
						})
					})
					.collect();
				let mut proposal = self.propose(path, file_context, files).await?;

				if proposal.paths.len() > 1 {
					self.soft_split(env, &mut proposal, files, &states).await?;
				}

				if env.cache.path_intake {
					let value = serde_json::to_value(&proposal).unwrap_or(Value::Null);

					artifact_cache::store(&self.deps.pool, &cache_key, &value, &mut self.trace).await;
				}

				proposal
			},
		};

		if env.path_intake.wait_for_user || proposal.needs_clarification {
			self.persist(&proposal, false, false).await?;

			let Some(thread_id) = self.input.thread_id else {
				return Ok(self.finish(
					IntakeStatus::NeedsConfirmation,
					IntakeState::Proposing,
					proposal,
					None,
				));
			};
			let mut extra = Map::new();

			extra.insert("workflow_v1".to_string(), workflow_payload());

			let message = self
				.post(thread_id, KIND_QUESTIONS, intake::render_questions(&proposal, files), extra)
				.await?;

			return Ok(self.finish(
				IntakeStatus::WaitingUser,
				IntakeState::Proposing,
				proposal,
				Some(message.id),
			));
		}

		let mut proposal = proposal;

		proposal.paths_confirmed = true;

		self.persist(&proposal, true, false).await?;

		let message_id = match self.input.thread_id {
			Some(thread_id) => Some(self.post(thread_id, KIND_ACK, ack_text(&proposal), Map::new()).await?.id),
			None => None,
		};

		Ok(self.finish(IntakeStatus::Succeeded, IntakeState::Final, proposal, message_id))
	}

	async fn propose(
		&mut self,
		path: &Path,
		file_context: Vec<Value>,
		files: &[IntakeFile],
	) -> Result<IntakeProposal> {
		let user = prompts::user_prompt(&[
			("FILES", Value::Array(file_context)),
			(
				"PATH",
				json!({
					"title": path.title,
					"preferences": path.metadata.get("preferences"),
					"user_context": path.metadata.get("user_context"),
				}),
			),
		]);
		let response = self
			.deps
			.generate_json(
				self.ctx,
				prompts::PATH_INTAKE_SYSTEM,
				&user,
				prompts::PATH_INTAKE_SCHEMA,
				&prompts::path_intake_schema(),
			)
			.await;

		match response.and_then(parse_proposal) {
			Ok(mut proposal) => {
				proposal.needs_clarification = !proposal.clarifying_questions.is_empty();

				Ok(intake::normalize_proposal(proposal, files))
			},
			Err(Error::Cancelled) => Err(Error::Cancelled),
			Err(err) => {
				self.trace.warn(STAGE, format!("Intake generation failed; using one path: {err}."));

				Ok(intake::fallback_proposal(files))
			},
		}
	}

	/// Flags multi-path proposals whose paths look like one subject.
	async fn soft_split(
		&mut self,
		env: &PipelineEnv,
		proposal: &mut IntakeProposal,
		files: &[IntakeFile],
		states: &BTreeMap<Uuid, SignatureState>,
	) -> Result<()> {
		let evidence = path_evidence(proposal, files, states);
		let mut pair_scores = HashMap::new();

		if env.path_intake.pair_score && files.len() <= env.path_intake.pair_score_max_files {
			let pairs = (0..evidence.len())
				.flat_map(|i| ((i + 1)..evidence.len()).map(move |j| (i, j)))
				.take(env.path_intake.pair_score_max_pairs);

			for (i, j) in pairs {
				let (a, b) = (&evidence[i], &evidence[j]);

				match self.pair_score(a, b).await {
					Ok(score) => {
						pair_scores.insert((a.path_id.clone(), b.path_id.clone()), score);
					},
					Err(Error::Cancelled) => return Err(Error::Cancelled),
					Err(err) => self.trace.warn(STAGE, format!("Pair score failed: {err}.")),
				}
			}
		}

		let report = soft_split::evaluate_soft_split(proposal, &evidence, &pair_scores);

		if report.triggered {
			tracing::info!(
				path_id = %self.path_id,
				reasons = ?report.reasons,
				"Multi-path proposal needs confirmation."
			);
		}

		soft_split::apply_soft_split(proposal, &report);

		Ok(())
	}

	async fn pair_score(&self, a: &PathEvidence, b: &PathEvidence) -> Result<f64> {
		let user = prompts::user_prompt(&[
			("PATH_A", json!({ "path_id": a.path_id, "text": a.text })),
			("PATH_B", json!({ "path_id": b.path_id, "text": b.text })),
		]);
		let value = self
			.deps
			.generate_json(
				self.ctx,
				prompts::PAIR_SCORE_SYSTEM,
				&user,
				prompts::PAIR_SCORE_SCHEMA,
				&prompts::pair_score_schema(),
			)
			.await?;

		Ok(lkg_domain::normalize_score(value.get("score"), 0.0))
	}

	async fn persist(&self, proposal: &IntakeProposal, locked: bool, by_user: bool) -> Result<()> {
		let mut patch = json!({
			META_INTAKE: proposal,
			META_LOCKED: locked,
			META_JOB_ID: self.job_key,
			META_PATHS_CONFIRMED: proposal.paths_confirmed,
		});

		if locked && let Some(map) = patch.as_object_mut() {
			map.insert(
				META_FILTER.to_string(),
				serde_json::to_value(IntakeMaterialFilter::from(proposal)).unwrap_or(Value::Null),
			);
			map.insert(META_CONFIRMED_BY_USER.to_string(), Value::Bool(by_user));
		}

		paths::merge_path_metadata(&self.deps.pool, self.path_id, &patch).await?.ok_or_else(|| {
			Error::UpstreamData { message: format!("Path {} does not exist.", self.path_id) }
		})?;

		Ok(())
	}

	async fn post(
		&self,
		thread_id: Uuid,
		kind: &str,
		content: String,
		mut metadata: Map<String, Value>,
	) -> Result<ChatMessage> {
		metadata.insert("path_id".to_string(), json!(self.path_id));
		metadata.insert("material_set_id".to_string(), json!(self.input.material_set_id));

		chat::post_message_once(&self.deps.pool, self.deps.providers.notifier.as_ref(), ChatPost {
			thread_id,
			user_id: self.input.owner_user_id,
			kind,
			job_id: &self.job_key,
			content,
			metadata,
		})
		.await
	}
}

fn parse_proposal(value: Value) -> Result<IntakeProposal> {
	serde_json::from_value(value).map_err(|err| Error::Provider {
		message: format!("{} response did not decode: {err}", prompts::PATH_INTAKE_SCHEMA),
	})
}

fn files_json(files: &[IntakeFile]) -> Value {
	Value::Array(files.iter().map(|file| json!({ "file_id": file.id, "name": file.name })).collect())
}

fn is_confirm(reply: &ChatMessage) -> bool {
	let token = reply.metadata.get("action_token").and_then(Value::as_str).unwrap_or_default();

	token == CONFIRM_TOKEN || reply.content.trim().eq_ignore_ascii_case(CONFIRM_TOKEN)
}

fn ack_text(proposal: &IntakeProposal) -> String {
	match proposal.paths.as_slice() {
		[single] => format!("Great, I'll build one path: {}.", display_title(single)),
		paths => format!(
			"Great, I'll build {} paths: {}.",
			paths.len(),
			paths.iter().map(display_title).collect::<Vec<_>>().join(", ")
		),
	}
}

fn display_title(path: &intake::IntakePath) -> &str {
	if path.title.is_empty() { &path.path_id } else { &path.title }
}

fn workflow_payload() -> Value {
	json!({
		"version": 1,
		"kind": "path_intake",
		"step": "confirm_paths",
		"blocking": true,
		"actions": [
			{ "id": CONFIRM_TOKEN, "label": "Looks good", "token": CONFIRM_TOKEN, "variant": "primary" },
			{ "id": CHANGE_TOKEN, "label": "Change grouping", "token": CHANGE_TOKEN, "variant": "secondary" },
		],
	})
}

/// Text and summary embeddings per proposed path, from its files' signatures.
fn path_evidence(
	proposal: &IntakeProposal,
	files: &[IntakeFile],
	states: &BTreeMap<Uuid, SignatureState>,
) -> Vec<PathEvidence> {
	let names: HashMap<String, &str> =
		files.iter().map(|file| (file.id.to_string(), file.name.as_str())).collect();

	proposal
		.paths
		.iter()
		.map(|path| {
			let mut text = vec![path.title.clone(), path.goal.clone()];
			let mut embeddings = Vec::new();

			for id in path.file_ids() {
				if let Some(name) = names.get(id) {
					text.push((*name).to_string());
				}

				let Some(state) = Uuid::parse_str(id).ok().and_then(|id| states.get(&id)) else {
					continue;
				};

				text.extend(state.topics.iter().cloned());

				if let Some(vector) =
					state.summary_embedding.as_deref().and_then(|raw| parse_pg_vector(raw).ok())
				{
					embeddings.push(vector);
				}
			}

			PathEvidence {
				path_id: path.path_id.clone(),
				text: text.join(" "),
				confidence: path.confidence,
				embeddings,
			}
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	use time::OffsetDateTime;

	use lkg_domain::intake::IntakePath;

	fn state(file_id: Uuid, topics: &[&str], embedding: &str) -> SignatureState {
		SignatureState {
			material_file_id: file_id,
			version: 2,
			fingerprint: String::new(),
			topics: topics.iter().map(|t| t.to_string()).collect(),
			concept_keys: Vec::new(),
			summary_md: String::new(),
			difficulty: String::new(),
			language: "eng".to_string(),
			summary_embedding: Some(embedding.to_string()),
			updated_at: OffsetDateTime::UNIX_EPOCH,
		}
	}

	fn message(role: &str, content: &str, metadata: Value) -> ChatMessage {
		ChatMessage {
			id: Uuid::from_u128(99),
			thread_id: Uuid::from_u128(1),
			user_id: Uuid::from_u128(2),
			seq: 3,
			role: role.to_string(),
			content: content.to_string(),
			metadata,
			created_at: OffsetDateTime::UNIX_EPOCH,
		}
	}

	#[test]
	fn evidence_gathers_names_topics_and_embeddings() {
		let a = Uuid::from_u128(10);
		let b = Uuid::from_u128(11);
		let files = vec![
			IntakeFile { id: a, name: "tcp.pdf".to_string() },
			IntakeFile { id: b, name: "udp.pdf".to_string() },
		];
		let proposal = IntakeProposal {
			paths: vec![
				IntakePath {
					path_id: "p1".into(),
					title: "TCP".into(),
					core_file_ids: vec![a.to_string()],
					..Default::default()
				},
				IntakePath {
					path_id: "p2".into(),
					title: "UDP".into(),
					core_file_ids: vec![b.to_string()],
					..Default::default()
				},
			],
			..Default::default()
		};
		let states = BTreeMap::from([
			(a, state(a, &["transport"], "[1,0,0]")),
			(b, state(b, &["transport"], "[1,0,0]")),
		]);
		let evidence = path_evidence(&proposal, &files, &states);

		assert_eq!(evidence.len(), 2);
		assert!(evidence[0].text.contains("tcp.pdf"));
		assert!(evidence[0].text.contains("transport"));
		assert_eq!(evidence[1].embeddings, vec![vec![1.0, 0.0, 0.0]]);

		let report = soft_split::evaluate_soft_split(&proposal, &evidence, &HashMap::new());

		assert!(report.triggered);
	}

	#[test]
	fn confirm_accepts_token_or_text() {
		assert!(is_confirm(&message(ROLE_USER, " Confirm ", json!({}))));
		assert!(is_confirm(&message(ROLE_USER, "ok", json!({ "action_token": "confirm" }))));
		assert!(!is_confirm(&message(ROLE_USER, "combine them", json!({}))));
	}

	#[test]
	fn stored_intake_reads_lock_and_proposal() {
		let metadata = json!({
			"intake": { "paths": [{ "path_id": "main", "core_file_ids": [] }], "primary_path_id": "main" },
			"intake_locked": true,
		});
		let stored = StoredIntake::from_metadata(&metadata);

		assert!(stored.locked);
		assert_eq!(stored.proposal.map(|p| p.primary_path_id), Some("main".to_string()));
		assert!(StoredIntake::from_metadata(&json!({})).proposal.is_none());
	}

	#[test]
	fn workflow_offers_confirm_and_change() {
		let payload = workflow_payload();
		let tokens: Vec<&str> = payload["actions"]
			.as_array()
			.map(|actions| actions.iter().filter_map(|a| a["token"].as_str()).collect())
			.unwrap_or_default();

		assert_eq!(payload["version"], json!(1));
		assert_eq!(tokens, vec![CONFIRM_TOKEN, CHANGE_TOKEN]);
	}
}
