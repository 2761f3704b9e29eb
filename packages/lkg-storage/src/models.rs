use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct MaterialSet {
	pub id: Uuid,
	pub user_id: Uuid,
	pub parent_material_set_id: Option<Uuid>,
	pub title: String,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct MaterialFile {
	pub id: Uuid,
	pub material_set_id: Uuid,
	pub original_name: String,
	pub mime_type: String,
	pub size_bytes: i64,
	pub extracted_kind: String,
	pub ai_type: String,
	pub ai_topics: Vec<String>,
	pub extraction_diagnostics: Value,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct MaterialChunk {
	pub id: Uuid,
	pub material_file_id: Uuid,
	pub chunk_index: i32,
	pub text: String,
	pub page: Option<i32>,
	pub start_sec: Option<f64>,
	pub end_sec: Option<f64>,
	pub metadata: Value,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct SetProfileRow {
	pub page_count: i64,
	pub section_count: i64,
	pub file_count: i64,
}

/// Signature row as written; the embedding travels as pgvector text.
#[derive(Clone, Debug)]
pub struct MaterialFileSignature {
	pub id: Uuid,
	pub material_file_id: Uuid,
	pub material_set_id: Uuid,
	pub version: i32,
	pub language: String,
	pub quality: Value,
	pub difficulty: String,
	pub domain_tags: Vec<String>,
	pub topics: Vec<String>,
	pub concept_keys: Vec<String>,
	pub summary_md: String,
	pub summary_embedding: Option<Vec<f32>>,
	pub outline_json: Value,
	pub outline_confidence: f64,
	pub citations: Vec<String>,
	pub fingerprint: String,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct SignatureState {
	pub material_file_id: Uuid,
	pub version: i32,
	pub fingerprint: String,
	pub topics: Vec<String>,
	pub concept_keys: Vec<String>,
	pub summary_md: String,
	pub difficulty: String,
	pub language: String,
	pub summary_embedding: Option<String>,
	pub updated_at: OffsetDateTime,
}

#[derive(Clone, Debug)]
pub struct MaterialFileSection {
	pub id: Uuid,
	pub material_file_id: Uuid,
	pub section_index: i32,
	pub title: String,
	pub path: String,
	pub start_page: Option<i32>,
	pub end_page: Option<i32>,
	pub start_sec: Option<f64>,
	pub end_sec: Option<f64>,
	pub text_excerpt: String,
	pub embedding: Option<Vec<f32>>,
	pub metadata: Value,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct SectionSpanRow {
	pub material_file_id: Uuid,
	pub path: String,
	pub start_page: Option<i32>,
	pub end_page: Option<i32>,
	pub start_sec: Option<f64>,
	pub end_sec: Option<f64>,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct MaterialIntent {
	pub id: Uuid,
	pub material_file_id: Uuid,
	pub material_set_id: Uuid,
	pub from_state: String,
	pub to_state: String,
	pub core_thread: String,
	pub destination_concepts: Vec<String>,
	pub prerequisite_concepts: Vec<String>,
	pub assumed_knowledge: Vec<String>,
	pub metadata: Value,
	pub updated_at: OffsetDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct MaterialChunkSignal {
	pub id: Uuid,
	pub material_chunk_id: Uuid,
	pub material_file_id: Uuid,
	pub material_set_id: Uuid,
	pub role: String,
	pub signal_strength: f64,
	pub floor_signal: f64,
	pub intent_alignment_score: f64,
	pub set_position_score: f64,
	pub novelty_score: f64,
	pub density_score: f64,
	pub complexity_score: f64,
	pub load_bearing_score: f64,
	pub compound_weight: f64,
	pub trajectory: Value,
	pub metadata: Value,
}

#[derive(Clone, Debug)]
pub struct ConceptCoverage {
	pub material_set_id: Uuid,
	pub concept_key: String,
	pub path_id: Option<Uuid>,
	pub canonical_concept_id: Option<Uuid>,
	pub coverage_type: String,
	pub depth: String,
	pub score: f64,
	pub source_material_file_ids: Vec<Uuid>,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct SetCoverageRow {
	pub material_set_id: Uuid,
	pub concept_key: String,
	pub coverage_type: String,
	pub depth: String,
	pub score: f64,
}

#[derive(Clone, Debug)]
pub struct MaterialEdge {
	pub material_set_id: Uuid,
	pub from_material_file_id: Uuid,
	pub to_material_file_id: Uuid,
	pub edge_type: String,
	pub strength: f64,
	pub bridging_concepts: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct MaterialChunkLink {
	pub material_set_id: Uuid,
	pub from_material_chunk_id: Uuid,
	pub to_material_chunk_id: Uuid,
	pub relation: String,
	pub strength: f64,
	pub concept_key: String,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct MaterialSetIntent {
	pub material_set_id: Uuid,
	pub from_state: String,
	pub to_state: String,
	pub core_thread: String,
	pub spine_material_file_ids: Vec<Uuid>,
	pub satellite_material_file_ids: Vec<Uuid>,
	pub gaps_concept_keys: Vec<String>,
	pub redundancy_notes: Vec<String>,
	pub conflict_notes: Vec<String>,
	pub metadata: Value,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Concept {
	pub id: Uuid,
	pub scope: String,
	pub scope_id: Uuid,
	pub key: String,
	pub name: String,
}

#[derive(Clone, Debug)]
pub struct MaterialSetEdge {
	pub user_id: Uuid,
	pub from_material_set_id: Uuid,
	pub to_material_set_id: Uuid,
	pub relation: String,
	pub strength: f64,
	pub bridging_concept_ids: Vec<Uuid>,
	pub metadata: Value,
}

#[derive(Clone, Debug)]
pub struct GlobalConceptCoverage {
	pub user_id: Uuid,
	pub global_concept_id: Uuid,
	pub material_set_ids: Vec<Uuid>,
	pub coverage_depth: String,
	pub exposure_score: f64,
	pub cross_set_relevance: f64,
}

#[derive(Clone, Debug)]
pub struct EmergentConcept {
	pub user_id: Uuid,
	pub key: String,
	pub name: String,
	pub summary: String,
	pub source_material_set_ids: Vec<Uuid>,
	pub prereq_concept_ids: Vec<Uuid>,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Path {
	pub id: Uuid,
	pub user_id: Uuid,
	pub material_set_id: Option<Uuid>,
	pub title: String,
	pub metadata: Value,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct ChatMessage {
	pub id: Uuid,
	pub thread_id: Uuid,
	pub user_id: Uuid,
	pub seq: i64,
	pub role: String,
	pub content: String,
	pub metadata: Value,
	pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct LearningArtifact {
	pub id: Uuid,
	pub owner_user_id: Uuid,
	pub material_set_id: Uuid,
	pub path_id: Option<Uuid>,
	pub artifact_type: String,
	pub input_hash: String,
	pub version: i32,
	pub metadata: Value,
	pub updated_at: OffsetDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct UserEvent {
	pub id: Uuid,
	pub user_id: Uuid,
	pub created_at: OffsetDateTime,
	pub occurred_at: OffsetDateTime,
	pub r#type: String,
	pub path_id: Option<Uuid>,
	pub activity_id: Option<Uuid>,
	pub concept_id: Option<Uuid>,
	pub data: Value,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct UserEventCursor {
	pub user_id: Uuid,
	pub consumer: String,
	pub last_created_at: OffsetDateTime,
	pub last_event_id: Uuid,
}

#[derive(Clone, Debug)]
pub struct UserProgressionEvent {
	pub user_id: Uuid,
	pub source_event_id: Uuid,
	pub occurred_at: OffsetDateTime,
	pub path_id: Option<Uuid>,
	pub activity_id: Option<Uuid>,
	pub concept_ids: Vec<Uuid>,
	pub activity_kind: String,
	pub variant: String,
	pub completed: bool,
	pub score: Option<f64>,
	pub dwell_ms: Option<i64>,
	pub attempts: Option<i32>,
}
