//! Files and chunks of one set, loaded once per stage.

use std::collections::BTreeMap;

use serde_json::{Value, json};
use sqlx::PgPool;
use uuid::Uuid;

use lkg_domain::{
	adaptive::{ContentType, SetProfile},
	excerpt::{self, Excerpt},
	fingerprint::file_fingerprint,
	intake::IntakeFile,
};
use lkg_storage::{
	materials,
	models::{MaterialChunk, MaterialFile},
};

use crate::{Error, Result};

pub(crate) struct SetMaterials {
	pub(crate) files: Vec<MaterialFile>,
	pub(crate) chunks: BTreeMap<Uuid, Vec<MaterialChunk>>,
}
impl SetMaterials {
	/// Fails with `UpstreamData` when the set has no files.
	pub(crate) async fn load(pool: &PgPool, material_set_id: Uuid) -> Result<Self> {
		let files = materials::list_set_files(pool, material_set_id).await?;

		if files.is_empty() {
			return Err(Error::UpstreamData {
				message: format!("No files for set {material_set_id}."),
			});
		}

		let mut chunks: BTreeMap<Uuid, Vec<MaterialChunk>> = BTreeMap::new();

		for chunk in materials::list_set_chunks(pool, material_set_id).await? {
			chunks.entry(chunk.material_file_id).or_default().push(chunk);
		}

		Ok(Self { files, chunks })
	}

	pub(crate) fn chunks_of(&self, file_id: Uuid) -> &[MaterialChunk] {
		self.chunks.get(&file_id).map(Vec::as_slice).unwrap_or_default()
	}

	pub(crate) fn fingerprint(&self, file: &MaterialFile) -> String {
		let chunks = self.chunks_of(file.id);
		let ids: Vec<Uuid> = chunks.iter().map(|chunk| chunk.id).collect();
		let total_chars = chunks.iter().map(|chunk| chunk.text.chars().count()).sum();

		file_fingerprint(&file.original_name, file.size_bytes, &file.mime_type, &ids, total_chars)
	}

	pub(crate) fn fingerprints(&self) -> BTreeMap<Uuid, String> {
		self.files.iter().map(|file| (file.id, self.fingerprint(file))).collect()
	}

	/// Deterministic cache payload fragment: `[{file_id, fingerprint}]` in file-id order.
	pub(crate) fn fingerprint_payload(&self) -> Value {
		let files: Vec<Value> = self
			.fingerprints()
			.into_iter()
			.map(|(file_id, fingerprint)| json!({ "file_id": file_id, "fingerprint": fingerprint }))
			.collect();

		Value::Array(files)
	}

	pub(crate) async fn profile(&self, pool: &PgPool, material_set_id: Uuid) -> Result<SetProfile> {
		let row = materials::load_set_profile(pool, material_set_id).await?;
		let content_type = ContentType::majority(
			self.files.iter().map(|file| ContentType::classify(&file.mime_type, &file.extracted_kind)),
		);

		Ok(SetProfile::new(
			clamp_count(row.page_count),
			clamp_count(row.section_count),
			clamp_count(row.file_count),
			content_type,
		))
	}

	pub(crate) fn excerpts(
		&self,
		file_id: Uuid,
		per_file: usize,
		max_chars: usize,
		max_total_chars: usize,
	) -> Vec<Excerpt> {
		let texts: Vec<&str> = self.chunks_of(file_id).iter().map(|chunk| chunk.text.as_str()).collect();

		excerpt::select_excerpts(&texts, per_file, max_chars, max_total_chars)
	}

	pub(crate) fn intake_files(&self) -> Vec<IntakeFile> {
		self.files
			.iter()
			.map(|file| IntakeFile { id: file.id, name: file.original_name.clone() })
			.collect()
	}
}

fn clamp_count(value: i64) -> u32 {
	u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}
