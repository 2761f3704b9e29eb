//! Stage knobs read from the process environment.
//!
//! Each stage invocation reads the environment once into a [`PipelineEnv`] and passes it down
//! explicitly. The raw variables under the known prefixes are kept so stages can fold them into
//! their cache fingerprints.

use std::collections::BTreeMap;

use crate::{Error, Result};

/// Prefixes whose variables are captured into [`PipelineEnv::raw`].
pub const ENV_PREFIXES: [&str; 6] = [
	"FILE_SIGNATURE_",
	"MATERIAL_SIGNAL_",
	"PATH_INTAKE_",
	"PROGRESSION_",
	"LEARNING_ARTIFACT_CACHE_",
	"ADAPTIVE_PARAMS_",
];

#[derive(Clone, Debug)]
pub struct PipelineEnv {
	pub adaptive_enabled: bool,
	pub cache: CacheEnv,
	pub file_signature: FileSignatureEnv,
	pub material_signal: MaterialSignalEnv,
	pub path_intake: PathIntakeEnv,
	pub progression: ProgressionEnv,
	pub raw: BTreeMap<String, String>,
}

#[derive(Clone, Debug)]
pub struct CacheEnv {
	pub file_signature: bool,
	pub material_signal: bool,
	pub cross_set: bool,
	pub path_intake: bool,
}

#[derive(Clone, Debug)]
pub struct FileSignatureEnv {
	pub enabled: bool,
	pub excerpts_per_file: usize,
	pub excerpt_max_chars: usize,
	pub excerpt_max_total_chars: usize,
	pub max_sections: usize,
	pub concurrency: usize,
	pub min_text_chars: usize,
	pub section_embed_batch_size: usize,
	pub section_embed_concurrency: usize,
}

#[derive(Clone, Debug)]
pub struct MaterialSignalEnv {
	pub enabled: bool,
	pub set_enabled: bool,
	pub global_enabled: bool,
	pub intent_concurrency: usize,
	pub concurrency: usize,
	pub chunk_batch_size: usize,
	pub chunk_excerpt_chars: usize,
	pub max_chunks_per_file: usize,
	pub write_chunk_metadata: bool,
	pub metadata_update_concurrency: usize,
	pub max_links_per_concept: usize,
	pub max_chunk_links: usize,
	pub force_rebuild: bool,
}

#[derive(Clone, Debug)]
pub struct PathIntakeEnv {
	pub excerpts_per_file: usize,
	pub excerpt_max_chars: usize,
	pub excerpt_max_total_chars: usize,
	pub pair_score: bool,
	pub pair_score_max_files: usize,
	pub pair_score_max_pairs: usize,
	pub wait_for_user: bool,
}

#[derive(Clone, Debug)]
pub struct ProgressionEnv {
	pub page_size: usize,
	pub max_events: usize,
	pub max_wall_ms: u64,
}

struct Reader<'a> {
	vars: &'a BTreeMap<String, String>,
}
impl Reader<'_> {
	fn raw(&self, name: &str) -> Option<&str> {
		self.vars.get(name).map(|value| value.trim()).filter(|value| !value.is_empty())
	}

	fn bool(&self, name: &str, default: bool) -> Result<bool> {
		let Some(value) = self.raw(name) else {
			return Ok(default);
		};

		match value.to_ascii_lowercase().as_str() {
			"1" | "true" | "yes" | "on" => Ok(true),
			"0" | "false" | "no" | "off" => Ok(false),
			_ => Err(Error::InvalidEnv {
				name: name.to_string(),
				value: value.to_string(),
				expected: "a boolean",
			}),
		}
	}

	fn usize(&self, name: &str, default: usize) -> Result<usize> {
		let Some(value) = self.raw(name) else {
			return Ok(default);
		};

		value.parse::<usize>().map_err(|_| Error::InvalidEnv {
			name: name.to_string(),
			value: value.to_string(),
			expected: "an unsigned integer",
		})
	}

	// Zero would stall a worker pool; treat it as one.
	fn workers(&self, name: &str, default: usize) -> Result<usize> {
		Ok(self.usize(name, default)?.max(1))
	}

	fn u64(&self, name: &str, default: u64) -> Result<u64> {
		let Some(value) = self.raw(name) else {
			return Ok(default);
		};

		value.parse::<u64>().map_err(|_| Error::InvalidEnv {
			name: name.to_string(),
			value: value.to_string(),
			expected: "an unsigned integer",
		})
	}
}

impl PipelineEnv {
	pub fn from_env() -> Result<Self> {
		Self::from_vars(std::env::vars())
	}

	pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		let raw = vars
			.into_iter()
			.map(|(key, value)| (key.into(), value.into()))
			.filter(|(key, _)| ENV_PREFIXES.iter().any(|prefix| key.starts_with(prefix)))
			.collect::<BTreeMap<_, _>>();
		let r = Reader { vars: &raw };
		let cache = CacheEnv {
			file_signature: r.bool("LEARNING_ARTIFACT_CACHE_FILE_SIGNATURE", true)?,
			material_signal: r.bool("LEARNING_ARTIFACT_CACHE_MATERIAL_SIGNAL", true)?,
			cross_set: r.bool("LEARNING_ARTIFACT_CACHE_CROSS_SET", true)?,
			path_intake: r.bool("LEARNING_ARTIFACT_CACHE_PATH_INTAKE", true)?,
		};
		let file_signature = FileSignatureEnv {
			enabled: r.bool("FILE_SIGNATURE_ENABLED", true)?,
			excerpts_per_file: r.usize("FILE_SIGNATURE_EXCERPTS_PER_FILE", 8)?,
			excerpt_max_chars: r.usize("FILE_SIGNATURE_EXCERPT_MAX_CHARS", 900)?,
			excerpt_max_total_chars: r.usize("FILE_SIGNATURE_EXCERPT_MAX_TOTAL_CHARS", 8_000)?,
			max_sections: r.usize("FILE_SIGNATURE_MAX_SECTIONS", 40)?,
			concurrency: r.workers("FILE_SIGNATURE_CONCURRENCY", 4)?,
			min_text_chars: r.usize("FILE_SIGNATURE_MIN_TEXT_CHARS", 200)?,
			section_embed_batch_size: r.workers("FILE_SIGNATURE_SECTION_EMBED_BATCH_SIZE", 32)?,
			section_embed_concurrency: r.workers("FILE_SIGNATURE_SECTION_EMBED_CONCURRENCY", 2)?,
		};
		let material_signal = MaterialSignalEnv {
			enabled: r.bool("MATERIAL_SIGNAL_ENABLED", true)?,
			set_enabled: r.bool("MATERIAL_SIGNAL_SET_ENABLED", true)?,
			global_enabled: r.bool("MATERIAL_SIGNAL_GLOBAL_ENABLED", true)?,
			intent_concurrency: r.workers("MATERIAL_SIGNAL_INTENT_CONCURRENCY", 4)?,
			concurrency: r.workers("MATERIAL_SIGNAL_CONCURRENCY", 4)?,
			chunk_batch_size: r.workers("MATERIAL_SIGNAL_CHUNK_BATCH_SIZE", 12)?,
			chunk_excerpt_chars: r.usize("MATERIAL_SIGNAL_CHUNK_EXCERPT_CHARS", 700)?,
			max_chunks_per_file: r.usize("MATERIAL_SIGNAL_MAX_CHUNKS_PER_FILE", 400)?,
			write_chunk_metadata: r.bool("MATERIAL_SIGNAL_WRITE_CHUNK_METADATA", false)?,
			metadata_update_concurrency: r
				.workers("MATERIAL_SIGNAL_METADATA_UPDATE_CONCURRENCY", 4)?,
			max_links_per_concept: r.usize("MATERIAL_SIGNAL_MAX_LINKS_PER_CONCEPT", 6)?,
			max_chunk_links: r.usize("MATERIAL_SIGNAL_MAX_CHUNK_LINKS", 2_000)?,
			force_rebuild: r.bool("MATERIAL_SIGNAL_FORCE_REBUILD", false)?,
		};
		let path_intake = PathIntakeEnv {
			excerpts_per_file: r.usize("PATH_INTAKE_EXCERPTS_PER_FILE", 4)?,
			excerpt_max_chars: r.usize("PATH_INTAKE_EXCERPT_MAX_CHARS", 600)?,
			excerpt_max_total_chars: r.usize("PATH_INTAKE_EXCERPT_MAX_TOTAL_CHARS", 6_000)?,
			pair_score: r.bool("PATH_INTAKE_PAIR_SCORE", false)?,
			pair_score_max_files: r.usize("PATH_INTAKE_PAIR_SCORE_MAX_FILES", 24)?,
			pair_score_max_pairs: r.usize("PATH_INTAKE_PAIR_SCORE_MAX_PAIRS", 6)?,
			wait_for_user: r.bool("PATH_INTAKE_WAIT_FOR_USER", true)?,
		};
		let progression = ProgressionEnv {
			page_size: r.workers("PROGRESSION_PAGE_SIZE", 500)?,
			max_events: r.workers("PROGRESSION_MAX_EVENTS", 4_000)?,
			max_wall_ms: r.u64("PROGRESSION_MAX_WALL_MS", 20_000)?,
		};
		let adaptive_enabled = r.bool("ADAPTIVE_PARAMS_ENABLED", true)?;

		Ok(Self {
			adaptive_enabled,
			cache,
			file_signature,
			material_signal,
			path_intake,
			progression,
			raw,
		})
	}

	/// Captured variables starting with `prefix`, in key order.
	pub fn snapshot(&self, prefix: &str) -> BTreeMap<String, String> {
		self.raw
			.iter()
			.filter(|(key, _)| key.starts_with(prefix))
			.map(|(key, value)| (key.clone(), value.clone()))
			.collect()
	}
}

impl Default for PipelineEnv {
	fn default() -> Self {
		match Self::from_vars(std::iter::empty::<(String, String)>()) {
			Ok(env) => env,
			Err(_) => unreachable!("defaults never fail to parse"),
		}
	}
}
