//! Path intake proposals: the model's grouping of files into learning paths, and the rules that
//! make any proposal well-formed.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MODE_SINGLE_GOAL: &str = "single_goal";
pub const MODE_MULTI_GOAL: &str = "multi_goal";
pub const ADDITIONAL_PATH_ID: &str = "additional_materials";
pub const ADDITIONAL_PATH_TITLE: &str = "Additional materials";
pub const FALLBACK_INTAKE_NOTE: &str = "fallback_intake";
const SEED_FILE_NAMES: [&str; 2] = ["learning_goal.txt", "learning_goal.md"];

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeProposal {
	pub file_intents: Vec<FileIntent>,
	pub material_alignment: MaterialAlignment,
	pub paths: Vec<IntakePath>,
	pub primary_path_id: String,
	pub combined_goal: String,
	pub learning_intent: LearningIntent,
	pub audience_level_guess: String,
	pub clarifying_questions: Vec<ClarifyingQuestion>,
	pub assumptions: Vec<String>,
	pub needs_clarification: bool,
	pub paths_confirmed: bool,
	pub notes: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileIntent {
	pub file_id: String,
	pub file_name: String,
	pub intent: String,
	pub role: String,
	pub confidence: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterialAlignment {
	pub mode: String,
	pub primary_goal: String,
	pub include_file_ids: Vec<String>,
	pub exclude_file_ids: Vec<String>,
	pub noise_file_ids: Vec<String>,
	pub notes: String,
	pub recommended_next_step: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakePath {
	pub path_id: String,
	pub title: String,
	pub goal: String,
	pub core_file_ids: Vec<String>,
	pub support_file_ids: Vec<String>,
	pub confidence: f64,
	pub notes: String,
}
impl IntakePath {
	pub fn file_ids(&self) -> impl Iterator<Item = &String> {
		self.core_file_ids.iter().chain(self.support_file_ids.iter())
	}
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningIntent {
	pub goal_kind: String,
	pub deadline: String,
	pub priorities: Vec<String>,
	pub constraints: Vec<String>,
	pub success_criteria: Vec<String>,
	pub confidence: f64,
	pub uncertainty_notes: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClarifyingQuestion {
	pub id: String,
	pub question: String,
	pub reason: String,
}

/// A file as the intake sees it.
#[derive(Clone, Debug, PartialEq)]
pub struct IntakeFile {
	pub id: Uuid,
	pub name: String,
}

/// Material filter persisted on the path for downstream planners.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IntakeMaterialFilter {
	pub mode: String,
	pub primary_goal: String,
	pub include_file_ids: Vec<String>,
	pub exclude_file_ids: Vec<String>,
	pub noise_file_ids: Vec<String>,
	pub notes: String,
}
impl From<&IntakeProposal> for IntakeMaterialFilter {
	fn from(proposal: &IntakeProposal) -> Self {
		let alignment = &proposal.material_alignment;

		Self {
			mode: alignment.mode.clone(),
			primary_goal: alignment.primary_goal.clone(),
			include_file_ids: alignment.include_file_ids.clone(),
			exclude_file_ids: alignment.exclude_file_ids.clone(),
			noise_file_ids: alignment.noise_file_ids.clone(),
			notes: alignment.notes.clone(),
		}
	}
}

/// Single-path proposal covering every file; used when the model call fails.
pub fn fallback_proposal(files: &[IntakeFile]) -> IntakeProposal {
	let proposal = IntakeProposal {
		paths: vec![IntakePath {
			path_id: "main".to_string(),
			title: "Main path".to_string(),
			core_file_ids: files.iter().map(|file| file.id.to_string()).collect(),
			confidence: 0.5,
			..Default::default()
		}],
		notes: vec![FALLBACK_INTAKE_NOTE.to_string()],
		..Default::default()
	};

	normalize_proposal(proposal, files)
}

/// Enforces the structural rules on a proposal:
///
/// - every known file lands in exactly one path (core before support, first path wins);
/// - unassigned files are gathered into an "Additional materials" path;
/// - path ids are unique (`_2`, `_3`, ... suffixes) and `primary_path_id` names one of them;
/// - `mode` follows the path count;
/// - includes never contain excluded or noise files, and the learning-goal seed file always leads
///   them.
pub fn normalize_proposal(mut proposal: IntakeProposal, files: &[IntakeFile]) -> IntakeProposal {
	let canonical: HashMap<String, String> = files
		.iter()
		.map(|file| (file.id.to_string().to_lowercase(), file.id.to_string()))
		.collect();
	let resolve = |raw: &str| canonical.get(&raw.trim().to_lowercase()).cloned();
	let mut assigned = BTreeSet::new();
	let mut paths = Vec::new();

	for mut path in std::mem::take(&mut proposal.paths) {
		path.core_file_ids = claim(&path.core_file_ids, &resolve, &mut assigned);
		path.support_file_ids = claim(&path.support_file_ids, &resolve, &mut assigned);

		if path.core_file_ids.is_empty() && path.support_file_ids.is_empty() {
			continue;
		}

		path.title = path.title.trim().to_string();
		path.goal = path.goal.trim().to_string();
		path.confidence = crate::clamp01(path.confidence);
		paths.push(path);
	}

	let unassigned: Vec<String> = files
		.iter()
		.map(|file| file.id.to_string())
		.filter(|id| !assigned.contains(id))
		.collect();

	if !unassigned.is_empty() {
		if paths.is_empty() {
			paths.push(IntakePath {
				path_id: "main".to_string(),
				title: if proposal.combined_goal.trim().is_empty() {
					"Main path".to_string()
				} else {
					proposal.combined_goal.trim().to_string()
				},
				goal: proposal.combined_goal.trim().to_string(),
				core_file_ids: unassigned,
				confidence: 0.5,
				..Default::default()
			});
		} else {
			paths.push(IntakePath {
				path_id: ADDITIONAL_PATH_ID.to_string(),
				title: ADDITIONAL_PATH_TITLE.to_string(),
				core_file_ids: unassigned,
				confidence: 0.5,
				..Default::default()
			});
		}
	}

	let renamed = dedupe_path_ids(&mut paths);
	let primary = proposal.primary_path_id.trim();

	proposal.primary_path_id = renamed
		.get(primary)
		.cloned()
		.or_else(|| paths.iter().find(|path| path.path_id == primary).map(|path| path.path_id.clone()))
		.or_else(|| paths.first().map(|path| path.path_id.clone()))
		.unwrap_or_default();

	let multi = paths.len() > 1;
	let primary_goal = paths
		.iter()
		.find(|path| path.path_id == proposal.primary_path_id)
		.map(|path| path.goal.clone())
		.unwrap_or_default();
	let alignment = &mut proposal.material_alignment;

	alignment.mode = if multi { MODE_MULTI_GOAL } else { MODE_SINGLE_GOAL }.to_string();
	alignment.exclude_file_ids = dedupe_known(&alignment.exclude_file_ids, &resolve);
	alignment.noise_file_ids = dedupe_known(&alignment.noise_file_ids, &resolve);
	alignment.include_file_ids = dedupe_known(&alignment.include_file_ids, &resolve);

	if multi && alignment.include_file_ids.is_empty() {
		alignment.include_file_ids =
			paths.iter().flat_map(|path| path.file_ids().cloned()).collect();
	}

	let blocked: BTreeSet<String> =
		alignment.exclude_file_ids.iter().chain(alignment.noise_file_ids.iter()).cloned().collect();

	alignment.include_file_ids.retain(|id| !blocked.contains(id));

	if let Some(seed) = seed_file_id(files) {
		alignment.include_file_ids.retain(|id| *id != seed);
		alignment.include_file_ids.insert(0, seed.clone());
		alignment.exclude_file_ids.retain(|id| *id != seed);
		alignment.noise_file_ids.retain(|id| *id != seed);
	}
	if alignment.primary_goal.trim().is_empty() {
		alignment.primary_goal = primary_goal.clone();
	}
	if proposal.combined_goal.trim().is_empty() {
		proposal.combined_goal = primary_goal;
	}

	proposal.file_intents = normalize_file_intents(&proposal.file_intents, files, &paths, &resolve);
	proposal.paths = paths;

	proposal
}

fn claim<F>(ids: &[String], resolve: &F, assigned: &mut BTreeSet<String>) -> Vec<String>
where
	F: Fn(&str) -> Option<String>,
{
	ids.iter()
		.filter_map(|raw| resolve(raw))
		.filter(|id| assigned.insert(id.clone()))
		.collect()
}

fn dedupe_known<F>(ids: &[String], resolve: &F) -> Vec<String>
where
	F: Fn(&str) -> Option<String>,
{
	let mut seen = BTreeSet::new();

	ids.iter().filter_map(|raw| resolve(raw)).filter(|id| seen.insert(id.clone())).collect()
}

/// Slugs and suffixes path ids; returns each raw id mapped to its first final id.
fn dedupe_path_ids(paths: &mut [IntakePath]) -> HashMap<String, String> {
	let mut used: BTreeMap<String, usize> = BTreeMap::new();
	let mut taken = BTreeSet::new();
	let mut renamed = HashMap::new();

	for (idx, path) in paths.iter_mut().enumerate() {
		let raw = path.path_id.trim().to_string();
		let base = slug(&path.path_id).unwrap_or_else(|| format!("path_{}", idx + 1));
		let mut candidate = base.clone();

		while taken.contains(&candidate) {
			let n = used.entry(base.clone()).or_insert(1);

			*n += 1;
			candidate = format!("{base}_{n}");
		}

		taken.insert(candidate.clone());

		if !raw.is_empty() {
			renamed.entry(raw).or_insert_with(|| candidate.clone());
		}

		path.path_id = candidate;
	}

	renamed
}

fn slug(raw: &str) -> Option<String> {
	let mut out = String::new();

	for ch in raw.trim().chars() {
		if ch.is_alphanumeric() || ch == '-' {
			out.extend(ch.to_lowercase());
		} else if !out.ends_with('_') {
			out.push('_');
		}
	}

	let trimmed = out.trim_matches('_').to_string();

	if trimmed.is_empty() { None } else { Some(trimmed) }
}

fn seed_file_id(files: &[IntakeFile]) -> Option<String> {
	files
		.iter()
		.find(|file| SEED_FILE_NAMES.contains(&file.name.trim().to_lowercase().as_str()))
		.map(|file| file.id.to_string())
}

fn normalize_file_intents<F>(
	intents: &[FileIntent],
	files: &[IntakeFile],
	paths: &[IntakePath],
	resolve: &F,
) -> Vec<FileIntent>
where
	F: Fn(&str) -> Option<String>,
{
	let mut by_id: HashMap<String, FileIntent> = HashMap::new();

	for intent in intents {
		if let Some(id) = resolve(&intent.file_id) {
			by_id.entry(id).or_insert_with(|| intent.clone());
		}
	}

	files
		.iter()
		.map(|file| {
			let id = file.id.to_string();
			let role = if paths.iter().any(|path| path.core_file_ids.contains(&id)) {
				"core"
			} else {
				"support"
			};
			let mut intent = by_id.remove(&id).unwrap_or_default();

			intent.file_id = id;
			intent.file_name = file.name.clone();
			intent.confidence = crate::clamp01(intent.confidence);

			if intent.role.trim().is_empty() {
				intent.role = role.to_string();
			}

			intent
		})
		.collect()
}

/// True when each file id appears in exactly one path and nothing else does.
pub fn is_partition(proposal: &IntakeProposal, files: &[IntakeFile]) -> bool {
	let mut seen = BTreeSet::new();

	for path in &proposal.paths {
		for id in path.file_ids() {
			if !seen.insert(id.clone()) {
				return false;
			}
		}
	}

	let expected: BTreeSet<String> = files.iter().map(|file| file.id.to_string()).collect();

	seen == expected
}

/// Plain-text rendering of the proposal posted as the confirmation prompt.
pub fn render_questions(proposal: &IntakeProposal, files: &[IntakeFile]) -> String {
	let names: HashMap<String, &str> =
		files.iter().map(|file| (file.id.to_string(), file.name.as_str())).collect();
	let name_of = |id: &String| names.get(id).copied().unwrap_or(id.as_str()).to_string();
	let mut out = String::from("Here is how I plan to group your materials:\n");

	for path in &proposal.paths {
		let title = if path.title.is_empty() { path.path_id.as_str() } else { path.title.as_str() };

		out.push_str(&format!("\n**{title}**"));

		if !path.goal.is_empty() {
			out.push_str(&format!(": {}", path.goal));
		}

		out.push('\n');

		for id in &path.core_file_ids {
			out.push_str(&format!("- {}\n", name_of(id)));
		}
		for id in &path.support_file_ids {
			out.push_str(&format!("- {} (supporting)\n", name_of(id)));
		}
	}

	if !proposal.clarifying_questions.is_empty() {
		out.push_str("\nA few questions:\n");

		for question in &proposal.clarifying_questions {
			out.push_str(&format!("- {}\n", question.question));
		}
	}

	out.push_str("\nReply to adjust the grouping, or confirm to continue.");

	out
}

#[cfg(test)]
mod tests {
	use super::*;

	fn files(n: u128) -> Vec<IntakeFile> {
		(1..=n).map(|i| IntakeFile { id: Uuid::from_u128(i), name: format!("file{i}.pdf") }).collect()
	}

	fn id(i: u128) -> String {
		Uuid::from_u128(i).to_string()
	}

	#[test]
	fn assigns_every_file_once() {
		let files = files(3);
		let proposal = IntakeProposal {
			paths: vec![
				IntakePath { path_id: "p".into(), core_file_ids: vec![id(1), id(2)], ..Default::default() },
				IntakePath {
					path_id: "p".into(),
					core_file_ids: vec![id(1)],
					support_file_ids: vec![id(2), "bogus".into()],
					..Default::default()
				},
			],
			primary_path_id: "missing".into(),
			..Default::default()
		};
		let out = normalize_proposal(proposal, &files);

		assert!(is_partition(&out, &files));
		assert_eq!(out.paths.len(), 2);
		assert_eq!(out.paths[1].path_id, ADDITIONAL_PATH_ID);
		assert_eq!(out.paths[1].core_file_ids, vec![id(3)]);
		assert_eq!(out.primary_path_id, "p");
		assert_eq!(out.material_alignment.mode, MODE_MULTI_GOAL);
		assert_eq!(out.material_alignment.include_file_ids, vec![id(1), id(2), id(3)]);
		assert_eq!(out.file_intents.len(), 3);
	}

	#[test]
	fn duplicate_path_ids_get_suffixes() {
		let files = files(3);
		let proposal = IntakeProposal {
			paths: (1..=3)
				.map(|i| IntakePath { path_id: "Core".into(), core_file_ids: vec![id(i)], ..Default::default() })
				.collect(),
			..Default::default()
		};
		let out = normalize_proposal(proposal, &files);
		let ids: Vec<&str> = out.paths.iter().map(|p| p.path_id.as_str()).collect();

		assert_eq!(ids, vec!["core", "core_2", "core_3"]);
	}

	#[test]
	fn seed_file_leads_includes_and_blocked_ids_are_removed() {
		let mut files = files(3);

		files[2].name = "Learning_Goal.md".into();

		let proposal = IntakeProposal {
			paths: vec![IntakePath {
				path_id: "main".into(),
				core_file_ids: vec![id(1), id(2), id(3)],
				..Default::default()
			}],
			material_alignment: MaterialAlignment {
				include_file_ids: vec![id(1), id(2)],
				noise_file_ids: vec![id(2)],
				..Default::default()
			},
			..Default::default()
		};
		let out = normalize_proposal(proposal, &files);

		assert_eq!(out.material_alignment.mode, MODE_SINGLE_GOAL);
		assert_eq!(out.material_alignment.include_file_ids, vec![id(3), id(1)]);
	}

	#[test]
	fn raw_primary_id_follows_its_path_through_renaming() {
		let files = files(2);
		let proposal = IntakeProposal {
			paths: vec![
				IntakePath {
					path_id: "Basics".into(),
					goal: "Learn the basics".into(),
					core_file_ids: vec![id(1)],
					..Default::default()
				},
				IntakePath {
					path_id: "Advanced Topics".into(),
					goal: "Go deeper".into(),
					core_file_ids: vec![id(2)],
					..Default::default()
				},
			],
			primary_path_id: " Advanced Topics ".into(),
			..Default::default()
		};
		let out = normalize_proposal(proposal, &files);
		let ids: Vec<&str> = out.paths.iter().map(|p| p.path_id.as_str()).collect();

		assert_eq!(ids, vec!["basics", "advanced_topics"]);
		assert_eq!(out.primary_path_id, "advanced_topics");
		assert_eq!(out.material_alignment.primary_goal, "Go deeper");
		assert_eq!(out.combined_goal, "Go deeper");
	}

	#[test]
	fn duplicate_raw_primary_maps_to_first_occurrence() {
		let files = files(2);
		let proposal = IntakeProposal {
			paths: (1..=2)
				.map(|i| IntakePath { path_id: "P2".into(), core_file_ids: vec![id(i)], ..Default::default() })
				.collect(),
			primary_path_id: "P2".into(),
			..Default::default()
		};
		let out = normalize_proposal(proposal, &files);

		assert_eq!(out.paths[1].path_id, "p2_2");
		assert_eq!(out.primary_path_id, "p2");
	}

	#[test]
	fn seed_file_is_prepended_to_empty_includes() {
		let mut files = files(2);

		files[1].name = "learning_goal.txt".into();

		let proposal = IntakeProposal {
			paths: vec![IntakePath {
				path_id: "main".into(),
				core_file_ids: vec![id(1), id(2)],
				..Default::default()
			}],
			material_alignment: MaterialAlignment { exclude_file_ids: vec![id(2)], ..Default::default() },
			..Default::default()
		};
		let out = normalize_proposal(proposal, &files);

		assert_eq!(out.material_alignment.mode, MODE_SINGLE_GOAL);
		assert_eq!(out.material_alignment.include_file_ids, vec![id(2)]);
		assert!(out.material_alignment.exclude_file_ids.is_empty());
	}

	#[test]
	fn empty_paths_fall_back_to_one_main_path() {
		let files = files(2);
		let out = normalize_proposal(IntakeProposal::default(), &files);

		assert_eq!(out.paths.len(), 1);
		assert_eq!(out.paths[0].core_file_ids, vec![id(1), id(2)]);
		assert!(out.material_alignment.include_file_ids.is_empty());
	}
}
