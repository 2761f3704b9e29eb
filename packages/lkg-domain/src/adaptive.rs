//! Per-stage parameters derived from material-set size and shape.
//!
//! Every knob has an environment ceiling. With adaptive mode on, the resolved value is
//! `clamp(computed, floor, ceiling)`; with it off, the ceiling is used as-is.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use lkg_config::{FileSignatureEnv, MaterialSignalEnv, PathIntakeEnv};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
	Pdf,
	Slides,
	Transcript,
	Notes,
	#[default]
	Mixed,
}
impl ContentType {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Pdf => "pdf",
			Self::Slides => "slides",
			Self::Transcript => "transcript",
			Self::Notes => "notes",
			Self::Mixed => "mixed",
		}
	}

	/// Classifies one file from its MIME type and extraction kind.
	pub fn classify(mime_type: &str, extracted_kind: &str) -> Self {
		let mime = mime_type.to_ascii_lowercase();
		let kind = extracted_kind.to_ascii_lowercase();

		if kind.contains("transcript") || mime.starts_with("audio/") || mime.starts_with("video/")
		{
			return Self::Transcript;
		}
		if kind.contains("slide") || mime.contains("presentation") || mime.contains("powerpoint") {
			return Self::Slides;
		}
		if mime == "application/pdf" || kind == "pdf" {
			return Self::Pdf;
		}
		if mime.starts_with("text/") || kind.contains("note") || mime.contains("markdown") {
			return Self::Notes;
		}

		Self::Mixed
	}

	/// The strict-majority type of the given files, or `Mixed`.
	pub fn majority<I>(types: I) -> Self
	where
		I: IntoIterator<Item = Self>,
	{
		let mut counts: BTreeMap<&'static str, (Self, usize)> = BTreeMap::new();
		let mut total = 0;

		for ty in types {
			counts.entry(ty.as_str()).or_insert((ty, 0)).1 += 1;

			total += 1;
		}

		counts
			.into_values()
			.find(|(_, count)| count * 2 > total)
			.map(|(ty, _)| ty)
			.unwrap_or(Self::Mixed)
	}
}

/// Size and shape signals of a material set.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SetProfile {
	pub page_count: u32,
	pub section_count: u32,
	pub file_count: u32,
	pub content_type: ContentType,
	pub avg_pages_per_file: f64,
}
impl SetProfile {
	pub fn new(
		page_count: u32,
		section_count: u32,
		file_count: u32,
		content_type: ContentType,
	) -> Self {
		let avg_pages_per_file =
			if file_count == 0 { 0.0 } else { page_count as f64 / file_count as f64 };

		Self { page_count, section_count, file_count, content_type, avg_pages_per_file }
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdaptiveValue {
	pub actual: usize,
	pub ceiling: usize,
}

/// Machine-readable `{param: {actual, ceiling}}` record emitted with stage outputs.
pub type AdaptiveTrace = BTreeMap<String, AdaptiveValue>;

struct Resolver {
	adaptive: bool,
	trace: AdaptiveTrace,
}
impl Resolver {
	fn new(adaptive: bool) -> Self {
		Self { adaptive, trace: AdaptiveTrace::new() }
	}

	fn knob(&mut self, name: &str, computed: usize, floor: usize, ceiling: usize) -> usize {
		let floor = floor.min(ceiling);
		let actual = if self.adaptive { computed.clamp(floor, ceiling) } else { ceiling };

		self.trace.insert(name.to_string(), AdaptiveValue { actual, ceiling });

		actual
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileSignatureParams {
	pub excerpts_per_file: usize,
	pub excerpt_max_chars: usize,
	pub excerpt_max_total_chars: usize,
	pub max_sections: usize,
	pub concurrency: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MaterialSignalParams {
	pub intent_concurrency: usize,
	pub concurrency: usize,
	pub chunk_batch_size: usize,
	pub chunk_excerpt_chars: usize,
	pub max_chunks_per_file: usize,
	pub max_links_per_concept: usize,
	pub max_chunk_links: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathIntakeParams {
	pub excerpts_per_file: usize,
	pub excerpt_max_chars: usize,
	pub excerpt_max_total_chars: usize,
}

pub fn resolve_file_signature(
	profile: &SetProfile,
	env: &FileSignatureEnv,
	adaptive: bool,
) -> (FileSignatureParams, AdaptiveTrace) {
	let mut r = Resolver::new(adaptive);
	let avg_pages = profile.avg_pages_per_file.max(0.0);
	let excerpts_per_file =
		r.knob("excerpts_per_file", 4 + (avg_pages / 8.0).round() as usize, 3, env.excerpts_per_file);
	let per_excerpt = match profile.content_type {
		ContentType::Slides => 400,
		ContentType::Transcript => 1_000,
		_ => 700,
	};
	let excerpt_max_chars = r.knob("excerpt_max_chars", per_excerpt, 200, env.excerpt_max_chars);
	let excerpt_max_total_chars = r.knob(
		"excerpt_max_total_chars",
		excerpts_per_file * excerpt_max_chars,
		1_500,
		env.excerpt_max_total_chars,
	);
	let sections_per_file = if profile.file_count == 0 {
		0
	} else {
		(profile.section_count as f64 / profile.file_count as f64 * 1.5).ceil() as usize
	};
	let max_sections = r.knob("max_sections", sections_per_file.max(12), 8, env.max_sections);
	let concurrency =
		r.knob("concurrency", profile.file_count as usize, 1, env.concurrency.max(1));

	(
		FileSignatureParams {
			excerpts_per_file,
			excerpt_max_chars,
			excerpt_max_total_chars,
			max_sections,
			concurrency,
		},
		r.trace,
	)
}

pub fn resolve_material_signal(
	profile: &SetProfile,
	env: &MaterialSignalEnv,
	adaptive: bool,
) -> (MaterialSignalParams, AdaptiveTrace) {
	let mut r = Resolver::new(adaptive);
	let files = profile.file_count as usize;
	let intent_concurrency = r.knob("intent_concurrency", files, 1, env.intent_concurrency.max(1));
	let concurrency = r.knob("concurrency", files * 2, 1, env.concurrency.max(1));
	let batch = if profile.page_count > 300 { env.chunk_batch_size } else { 8 };
	let chunk_batch_size = r.knob("chunk_batch_size", batch, 4, env.chunk_batch_size.max(1));
	let excerpt = match profile.content_type {
		ContentType::Slides => 400,
		ContentType::Transcript => 800,
		_ => 600,
	};
	let chunk_excerpt_chars = r.knob("chunk_excerpt_chars", excerpt, 200, env.chunk_excerpt_chars);
	let max_chunks_per_file = r.knob(
		"max_chunks_per_file",
		((profile.avg_pages_per_file.max(0.0) * 6.0).ceil() as usize).max(60),
		40,
		env.max_chunks_per_file,
	);
	let max_links_per_concept =
		r.knob("max_links_per_concept", 4 + files / 4, 2, env.max_links_per_concept);
	let max_chunk_links = r.knob(
		"max_chunk_links",
		(profile.page_count as usize * 4).max(200),
		100,
		env.max_chunk_links,
	);

	(
		MaterialSignalParams {
			intent_concurrency,
			concurrency,
			chunk_batch_size,
			chunk_excerpt_chars,
			max_chunks_per_file,
			max_links_per_concept,
			max_chunk_links,
		},
		r.trace,
	)
}

pub fn resolve_path_intake(
	profile: &SetProfile,
	env: &PathIntakeEnv,
	adaptive: bool,
) -> (PathIntakeParams, AdaptiveTrace) {
	let mut r = Resolver::new(adaptive);
	let files = profile.file_count as usize;
	let wanted = if files <= 3 { env.excerpts_per_file } else { (12 / files.max(1)).max(2) };
	let excerpts_per_file = r.knob("excerpts_per_file", wanted, 1, env.excerpts_per_file);
	let excerpt_max_chars = r.knob(
		"excerpt_max_chars",
		if files > 12 { 300 } else { 600 },
		200,
		env.excerpt_max_chars,
	);
	let excerpt_max_total_chars = r.knob(
		"excerpt_max_total_chars",
		files.max(1) * excerpts_per_file * excerpt_max_chars,
		1_000,
		env.excerpt_max_total_chars,
	);

	(PathIntakeParams { excerpts_per_file, excerpt_max_chars, excerpt_max_total_chars }, r.trace)
}

#[cfg(test)]
mod tests {
	use super::*;

	use lkg_config::PipelineEnv;

	#[test]
	fn disabled_adaptive_uses_ceilings() {
		let env = PipelineEnv::default();
		let profile = SetProfile::new(10, 2, 1, ContentType::Pdf);
		let (params, trace) = resolve_file_signature(&profile, &env.file_signature, false);

		assert_eq!(params.excerpts_per_file, env.file_signature.excerpts_per_file);
		assert_eq!(params.max_sections, env.file_signature.max_sections);
		assert!(trace.values().all(|value| value.actual == value.ceiling));
	}

	#[test]
	fn adaptive_values_never_exceed_ceilings() {
		let env = PipelineEnv::default();
		let profile = SetProfile::new(5_000, 900, 3, ContentType::Transcript);
		let (_, trace) = resolve_material_signal(&profile, &env.material_signal, true);

		for (name, value) in trace {
			assert!(value.actual <= value.ceiling, "{name} exceeded its ceiling");
		}
	}

	#[test]
	fn floor_above_ceiling_collapses_to_ceiling() {
		let mut env = PipelineEnv::default();

		env.file_signature.excerpt_max_total_chars = 100;

		let profile = SetProfile::new(10, 2, 1, ContentType::Pdf);
		let (params, _) = resolve_file_signature(&profile, &env.file_signature, true);

		assert_eq!(params.excerpt_max_total_chars, 100);
	}

	#[test]
	fn majority_requires_strict_majority() {
		assert_eq!(
			ContentType::majority([ContentType::Pdf, ContentType::Pdf, ContentType::Slides]),
			ContentType::Pdf
		);
		assert_eq!(ContentType::majority([ContentType::Pdf, ContentType::Slides]), ContentType::Mixed);
		assert_eq!(ContentType::majority(std::iter::empty()), ContentType::Mixed);
	}
}
