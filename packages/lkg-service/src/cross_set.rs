//! User-level aggregation across source material sets.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::{Value, json};
use sqlx::PgPool;
use uuid::Uuid;

use lkg_config::PipelineEnv;
use lkg_domain::{
	concept::key_phrase,
	coverage::CoverageType,
	cross_set::{
		self, EmergentConceptDraft, GlobalCoverageDraft, RelevanceBoosts, SetCoverage, SetEdgeDraft,
	},
};
use lkg_storage::{
	coverage::{self as coverage_store, ConceptInput},
	cross_set as cross_set_store, materials,
	models::{EmergentConcept, GlobalConceptCoverage, MaterialSetEdge},
};

use crate::{
	Error, LkgService, Result, artifact_cache,
	artifact_cache::CacheKey,
	material_signal, prompts,
	stage::{StageContext, StageInput, StageTrace},
};

pub const STAGE: &str = "cross_set";
const PROMPT_CONCEPTS_PER_SET: usize = 25;

#[derive(Clone, Debug, Default, Serialize)]
pub struct CrossSetOutput {
	pub source_sets: usize,
	pub global_concepts: usize,
	pub set_edges: usize,
	pub emergent_concepts: usize,
	pub canonical_links: u64,
	pub weights_updated: u64,
	#[serde(flatten)]
	pub trace: StageTrace,
}

/// Coverage and intents of every source set a user owns.
struct CrossSetInputs {
	set_ids: Vec<Uuid>,
	titles: BTreeMap<Uuid, String>,
	coverage: Vec<SetCoverage>,
	core_threads: BTreeMap<Uuid, String>,
	gaps: BTreeSet<String>,
}
impl CrossSetInputs {
	async fn load(pool: &PgPool, user_id: Uuid) -> Result<Self> {
		let sets = materials::list_source_sets(pool, user_id).await?;
		let set_ids: Vec<Uuid> = sets.iter().map(|set| set.id).collect();
		let titles = sets.into_iter().map(|set| (set.id, set.title)).collect();
		let coverage = coverage_store::list_set_coverage(pool, &set_ids)
			.await?
			.into_iter()
			.filter_map(|row| {
				Some(SetCoverage {
					coverage_type: CoverageType::parse(&row.coverage_type)?,
					material_set_id: row.material_set_id,
					concept_key: row.concept_key,
					score: row.score,
				})
			})
			.collect();
		let intents = coverage_store::list_set_intents(pool, &set_ids).await?;
		let gaps = intents.iter().flat_map(|intent| intent.gaps_concept_keys.iter().cloned()).collect();
		let core_threads =
			intents.into_iter().map(|intent| (intent.material_set_id, intent.core_thread)).collect();

		Ok(Self { set_ids, titles, coverage, core_threads, gaps })
	}

	fn known_sets(&self) -> BTreeSet<Uuid> {
		self.set_ids.iter().copied().collect()
	}

	fn cache_payload(&self) -> Value {
		let coverage: Vec<Value> = self
			.coverage
			.iter()
			.map(|row| {
				json!([row.material_set_id, row.concept_key, row.coverage_type.as_str(), row.score])
			})
			.collect();

		json!({ "sets": self.set_ids, "coverage": coverage, "gaps": self.gaps })
	}

	fn prompt(&self, edges: &[SetEdgeDraft]) -> String {
		let sets: Vec<Value> = self
			.set_ids
			.iter()
			.map(|set_id| {
				let mut concepts: Vec<&SetCoverage> = self
					.coverage
					.iter()
					.filter(|row| row.material_set_id == *set_id)
					.collect();

				concepts.sort_by(|a, b| {
					b.score.total_cmp(&a.score).then_with(|| a.concept_key.cmp(&b.concept_key))
				});
				concepts.truncate(PROMPT_CONCEPTS_PER_SET);

				json!({
					"material_set_id": set_id,
					"title": self.titles.get(set_id),
					"core_thread": self.core_threads.get(set_id),
					"concepts": concepts
						.iter()
						.map(|row| json!({
							"key": row.concept_key,
							"coverage_type": row.coverage_type.as_str(),
							"score": row.score,
						}))
						.collect::<Vec<_>>(),
				})
			})
			.collect();
		let edges: Vec<Value> = edges
			.iter()
			.map(|edge| {
				json!({
					"from_material_set_id": edge.from_set_id,
					"to_material_set_id": edge.to_set_id,
					"relation": edge.relation.as_str(),
					"strength": edge.strength,
					"bridging_concept_keys": edge.bridging_concept_keys,
				})
			})
			.collect();

		prompts::user_prompt(&[
			("MATERIAL_SETS", Value::Array(sets)),
			("DERIVED_SET_EDGES", Value::Array(edges)),
			("GAP_CONCEPT_KEYS", json!(self.gaps)),
		])
	}

	fn boosts(&self, edges: &[SetEdgeDraft], emergent: &[EmergentConceptDraft]) -> RelevanceBoosts {
		RelevanceBoosts {
			bridging: RelevanceBoosts::from_edges(edges),
			emergent_prereqs: emergent
				.iter()
				.flat_map(|concept| concept.prereq_concept_keys.iter().cloned())
				.collect(),
			gaps: self.gaps.clone(),
		}
	}
}

impl LkgService {
	/// Builds global coverage, set edges, and emergent concepts, then reweights every source set.
	pub async fn build_cross_set(
		&self,
		ctx: &StageContext,
		input: &StageInput,
		env: &PipelineEnv,
	) -> Result<CrossSetOutput> {
		input.require_owner()?;
		ctx.check()?;

		let mut output = CrossSetOutput::default();

		if !env.material_signal.global_enabled {
			output.trace.disabled = true;

			return Ok(output);
		}

		let deps = self.deps();
		let user_id = input.owner_user_id;
		let inputs = CrossSetInputs::load(&deps.pool, user_id).await?;

		output.source_sets = inputs.set_ids.len();

		if inputs.set_ids.is_empty() {
			return Ok(output);
		}

		let cache_key = CacheKey::new(input, STAGE, None, &inputs.cache_payload());

		if env.cache.cross_set
			&& artifact_cache::lookup(&deps.pool, &cache_key, &mut output.trace).await.is_some()
		{
			output.trace.cache_hit = true;

			return Ok(output);
		}

		let mut edges = cross_set::derive_set_edges(&inputs.coverage);
		let mut emergent = Vec::new();

		if inputs.set_ids.len() >= 2 {
			let known = inputs.known_sets();
			let response = deps
				.generate_json(
					ctx,
					prompts::CROSS_SET_SYSTEM,
					&inputs.prompt(&edges),
					prompts::CROSS_SET_SCHEMA,
					&prompts::cross_set_schema(),
				)
				.await;

			match response {
				Ok(value) => {
					emergent = cross_set::parse_emergent_concepts(&value, &known);

					edges.extend(cross_set::parse_proposed_set_edges(&value, &known));
				},
				Err(Error::Cancelled) => return Err(Error::Cancelled),
				Err(err) => output
					.trace
					.warn(STAGE, format!("Emergent concepts were not proposed: {err}.")),
			}
		}

		let edges = cross_set::merge_set_edges(edges);
		let global = cross_set::aggregate_global_coverage(&inputs.coverage, &inputs.boosts(&edges, &emergent));

		ctx.check()?;

		output.canonical_links =
			write_cross_set(&deps.pool, user_id, &inputs.set_ids, &global, &edges, &emergent).await?;
		output.global_concepts = global.len();
		output.set_edges = edges.len();
		output.emergent_concepts = emergent.len();

		let relevance = relevance_by_key(&global);

		for set_id in &inputs.set_ids {
			match material_signal::write_compound_weights(&deps.pool, *set_id, &relevance).await {
				Ok(count) => output.weights_updated += count,
				Err(err) => output.trace.warn(
					STAGE,
					format!("Compound weights were not refreshed for set {set_id}: {err}."),
				),
			}
		}

		if env.cache.cross_set {
			let counts = json!({
				"global_concepts": output.global_concepts,
				"set_edges": output.set_edges,
				"emergent_concepts": output.emergent_concepts,
			});

			artifact_cache::store(&deps.pool, &cache_key, &counts, &mut output.trace).await;
		}

		tracing::info!(
			%user_id,
			sets = output.source_sets,
			global_concepts = output.global_concepts,
			set_edges = output.set_edges,
			emergent = output.emergent_concepts,
			"Cross-set coverage built."
		);

		Ok(output)
	}
}

/// One transaction: user-scope concepts first, so every row below can reference their ids.
async fn write_cross_set(
	pool: &PgPool,
	user_id: Uuid,
	set_ids: &[Uuid],
	global: &[GlobalCoverageDraft],
	edges: &[SetEdgeDraft],
	emergent: &[EmergentConceptDraft],
) -> Result<u64> {
	let mut concepts: BTreeMap<String, ConceptInput> = BTreeMap::new();
	let plain = |key: &str| ConceptInput {
		key: key.to_string(),
		name: key_phrase(key),
		summary: String::new(),
		metadata: json!({}),
	};

	for row in global {
		concepts.insert(row.concept_key.clone(), ConceptInput {
			metadata: json!({ "cross_set_relevance": row.cross_set_relevance }),
			..plain(&row.concept_key)
		});
	}
	for key in edges.iter().flat_map(|edge| &edge.bridging_concept_keys) {
		concepts.entry(key.clone()).or_insert_with(|| plain(key));
	}
	for concept in emergent {
		for key in &concept.prereq_concept_keys {
			concepts.entry(key.clone()).or_insert_with(|| plain(key));
		}

		concepts.insert(concept.key.clone(), ConceptInput {
			key: concept.key.clone(),
			name: concept.name.clone(),
			summary: concept.summary.clone(),
			metadata: json!({ "emergent": true }),
		});
	}

	let inputs: Vec<ConceptInput> = concepts.into_values().collect();
	let mut tx = pool.begin().await?;
	let ids: BTreeMap<String, Uuid> =
		coverage_store::upsert_concepts(&mut *tx, coverage_store::SCOPE_USER, user_id, &inputs)
			.await?
			.into_iter()
			.map(|concept| (concept.key, concept.id))
			.collect();
	let ids_of = |keys: &[String]| -> Vec<Uuid> {
		keys.iter().filter_map(|key| ids.get(key).copied()).collect()
	};
	let global_rows: Vec<GlobalConceptCoverage> = global
		.iter()
		.filter_map(|row| {
			Some(GlobalConceptCoverage {
				user_id,
				global_concept_id: *ids.get(&row.concept_key)?,
				material_set_ids: row.material_set_ids.clone(),
				coverage_depth: row.coverage_depth.as_str().to_string(),
				exposure_score: row.exposure_score,
				cross_set_relevance: row.cross_set_relevance,
			})
		})
		.collect();
	let edge_rows: Vec<MaterialSetEdge> = edges
		.iter()
		.map(|edge| MaterialSetEdge {
			user_id,
			from_material_set_id: edge.from_set_id,
			to_material_set_id: edge.to_set_id,
			relation: edge.relation.as_str().to_string(),
			strength: edge.strength,
			bridging_concept_ids: ids_of(&edge.bridging_concept_keys),
			metadata: json!({ "bridging_concept_keys": edge.bridging_concept_keys }),
		})
		.collect();
	let emergent_rows: Vec<EmergentConcept> = emergent
		.iter()
		.map(|concept| EmergentConcept {
			user_id,
			key: concept.key.clone(),
			name: concept.name.clone(),
			summary: concept.summary.clone(),
			source_material_set_ids: concept.source_material_set_ids.clone(),
			prereq_concept_ids: ids_of(&concept.prereq_concept_keys),
		})
		.collect();

	cross_set_store::upsert_global_coverage(&mut *tx, &global_rows).await?;
	cross_set_store::upsert_set_edges(&mut *tx, &edge_rows).await?;
	cross_set_store::upsert_emergent_concepts(&mut *tx, &emergent_rows).await?;

	let linked = coverage_store::link_canonical_concepts(&mut *tx, user_id, set_ids).await?;

	tx.commit().await?;

	Ok(linked)
}

fn relevance_by_key(global: &[GlobalCoverageDraft]) -> BTreeMap<String, f64> {
	global.iter().map(|row| (row.concept_key.clone(), row.cross_set_relevance)).collect()
}

/// Relevance computed from current set coverage alone, without model proposals or writes.
pub(crate) async fn deterministic_relevance(
	pool: &PgPool,
	user_id: Uuid,
) -> Result<BTreeMap<String, f64>> {
	let inputs = CrossSetInputs::load(pool, user_id).await?;
	let edges = cross_set::derive_set_edges(&inputs.coverage);
	let global = cross_set::aggregate_global_coverage(&inputs.coverage, &inputs.boosts(&edges, &[]));

	Ok(relevance_by_key(&global))
}

#[cfg(test)]
mod tests {
	use super::*;

	use lkg_domain::coverage::CoverageDepth;

	#[test]
	fn relevance_map_is_keyed_by_concept() {
		let global = vec![GlobalCoverageDraft {
			concept_key: "tcp".to_string(),
			material_set_ids: vec![Uuid::from_u128(1)],
			coverage_depth: CoverageDepth::Moderate,
			mean_score: 0.6,
			exposure_score: 0.2,
			cross_set_relevance: 0.3,
		}];

		assert_eq!(relevance_by_key(&global).get("tcp"), Some(&0.3));
	}

	#[test]
	fn boosts_collect_bridging_prereqs_and_gaps() {
		let inputs = CrossSetInputs {
			set_ids: vec![Uuid::from_u128(1), Uuid::from_u128(2)],
			titles: BTreeMap::new(),
			coverage: Vec::new(),
			core_threads: BTreeMap::new(),
			gaps: BTreeSet::from(["subnetting".to_string()]),
		};
		let edges = vec![SetEdgeDraft {
			from_set_id: Uuid::from_u128(1),
			to_set_id: Uuid::from_u128(2),
			relation: cross_set::SetRelation::Prerequisite,
			strength: 0.5,
			bridging_concept_keys: vec!["ip_addressing".to_string()],
		}];
		let emergent = vec![EmergentConceptDraft {
			key: "network_layering".to_string(),
			name: "Network layering".to_string(),
			summary: String::new(),
			source_material_set_ids: vec![Uuid::from_u128(1), Uuid::from_u128(2)],
			prereq_concept_keys: vec!["osi_model".to_string()],
		}];
		let boosts = inputs.boosts(&edges, &emergent);

		assert!(boosts.bridging.contains("ip_addressing"));
		assert!(boosts.emergent_prereqs.contains("osi_model"));
		assert!(boosts.gaps.contains("subnetting"));
	}
}
