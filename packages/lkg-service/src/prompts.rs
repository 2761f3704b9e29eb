//! System prompts and strict JSON schemas for every model call the stages make.

use serde_json::{Map, Value, json};

pub(crate) const FILE_SIGNATURE_SCHEMA: &str = "file_signature_build";
pub(crate) const MATERIAL_INTENT_SCHEMA: &str = "material_intent_extract";
pub(crate) const CHUNK_SIGNAL_SCHEMA: &str = "material_chunk_signal";
pub(crate) const SET_SIGNAL_SCHEMA: &str = "material_set_signal";
pub(crate) const CROSS_SET_SCHEMA: &str = "cross_set_signal";
pub(crate) const PATH_INTAKE_SCHEMA: &str = "path_intake";
pub(crate) const PAIR_SCORE_SCHEMA: &str = "pair_score";

pub(crate) const FILE_SIGNATURE_SYSTEM: &str = "You build a structured signature for one uploaded study file. \
Output must be valid JSON only and must match the provided schema exactly. \
Summarize what the file teaches in markdown, list its topics and concept keys as short lowercase phrases, \
estimate difficulty as one of intro, intermediate, advanced, and report the language as an ISO 639 code. \
Build outline_json.sections from the outline hint and excerpts; use null for unknown pages or seconds. \
Describe the learner's from_state and to_state and the core_thread that connects them. \
Only cite sources that appear in the excerpts.";

pub(crate) const MATERIAL_INTENT_SYSTEM: &str = "You describe the instructional intent of one study file. \
Output must be valid JSON only and must match the provided schema exactly. \
from_state is what the learner knows before, to_state what they can do after, core_thread the line of reasoning between them. \
Concept lists hold short lowercase phrases.";

pub(crate) const CHUNK_SIGNAL_SYSTEM: &str = "You score how each chunk of a study file serves the file's intent. \
Output must be valid JSON only and must match the provided schema exactly. \
Return one item per chunk_id you were given and never invent chunk ids. \
Scores are numbers between 0 and 1. \
role is one of definition, explanation, example, exercise, procedure, evidence, summary, overview, transition, noise. \
trajectory lists concept keys the chunk establishes, reinforces, builds_on, and points_toward.";

pub(crate) const SET_SIGNAL_SYSTEM: &str = "You describe how the files of one material set fit together. \
Output must be valid JSON only and must match the provided schema exactly. \
spine_material_file_ids carry the main thread; satellite_material_file_ids support it. \
Only use file ids you were given. gaps_concept_keys are concepts the set assumes but never teaches.";

pub(crate) const CROSS_SET_SYSTEM: &str = "You compare a learner's material sets. \
Output must be valid JSON only and must match the provided schema exactly. \
Propose emergent concepts that only become visible across sets, and set edges whose relation is prerequisite or parallel. \
Only use material set ids you were given.";

pub(crate) const PATH_INTAKE_SYSTEM: &str = "You group a learner's uploaded files into learning paths. \
Output must be valid JSON only and must match the provided schema exactly. \
Every file id must appear in exactly one path, as a core or support file. \
Prefer a single path unless the files clearly serve different goals. \
Ask clarifying questions only when the grouping is genuinely ambiguous.";

pub(crate) const PAIR_SCORE_SYSTEM: &str = "You judge whether two proposed learning paths could be taught together as one. \
Output must be valid JSON only and must match the provided schema exactly. \
score is 1 when they are clearly one subject and 0 when they are unrelated.";

/// Renders a user prompt: named JSON sections in order.
pub(crate) fn user_prompt(sections: &[(&str, Value)]) -> String {
	let mut out = String::new();

	for (label, value) in sections {
		let body = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());

		out.push_str(label);
		out.push_str(":\n");
		out.push_str(&body);
		out.push_str("\n\n");
	}

	out.trim_end().to_string()
}

pub(crate) fn file_signature_schema() -> Value {
	let section = object(&[
		("title", string()),
		("start_page", nullable("integer")),
		("end_page", nullable("integer")),
		("start_sec", nullable("number")),
		("end_sec", nullable("number")),
		("summary", string()),
	]);
	let mut top_section = section.clone();

	if let Some(props) = top_section.get_mut("properties").and_then(Value::as_object_mut) {
		props.insert("children".to_string(), array(section));
	}
	if let Some(required) = top_section.get_mut("required").and_then(Value::as_array_mut) {
		required.push(json!("children"));
	}

	let mut fields = vec![
		("summary_md", string()),
		("topics", strings()),
		("concept_keys", strings()),
		("difficulty", string()),
		("domain_tags", strings()),
		("citations", strings()),
		("outline_json", object(&[("sections", array(top_section))])),
		("outline_confidence", number()),
		("language", string()),
		("notes", strings()),
		(
			"quality",
			object(&[("readability", number()), ("structure", number()), ("notes", strings())]),
		),
	];

	fields.extend(intent_fields());

	object(&fields)
}

pub(crate) fn material_intent_schema() -> Value {
	let mut fields = intent_fields();

	fields.push(("notes", strings()));

	object(&fields)
}

pub(crate) fn chunk_signal_schema() -> Value {
	let scores = object(&[
		("signal_strength", number()),
		("floor_signal", number()),
		("intent_alignment_score", number()),
		("novelty_score", number()),
		("density_score", number()),
		("complexity_score", number()),
		("load_bearing_score", number()),
	]);
	let trajectory = object(&[
		("establishes", strings()),
		("reinforces", strings()),
		("builds_on", strings()),
		("points_toward", strings()),
	]);
	let item = object(&[
		("chunk_id", string()),
		("role", string()),
		("scores", scores),
		("trajectory", trajectory),
		("notes", strings()),
	]);

	object(&[("items", array(item))])
}

pub(crate) fn set_signal_schema() -> Value {
	object(&[
		("from_state", string()),
		("to_state", string()),
		("core_thread", string()),
		("spine_material_file_ids", strings()),
		("satellite_material_file_ids", strings()),
		("gaps_concept_keys", strings()),
		("redundancy_notes", strings()),
		("conflict_notes", strings()),
		("notes", strings()),
	])
}

pub(crate) fn cross_set_schema() -> Value {
	let emergent = object(&[
		("key", string()),
		("name", string()),
		("summary", string()),
		("source_material_set_ids", strings()),
		("prereq_concept_keys", strings()),
	]);
	let edge = object(&[
		("from_material_set_id", string()),
		("to_material_set_id", string()),
		("relation", string()),
		("strength", number()),
		("bridging_concept_keys", strings()),
	]);

	object(&[("emergent_concepts", array(emergent)), ("set_edges", array(edge))])
}

pub(crate) fn path_intake_schema() -> Value {
	let file_intent = object(&[
		("file_id", string()),
		("file_name", string()),
		("intent", string()),
		("role", string()),
		("confidence", number()),
	]);
	let alignment = object(&[
		("mode", string()),
		("primary_goal", string()),
		("include_file_ids", strings()),
		("exclude_file_ids", strings()),
		("noise_file_ids", strings()),
		("notes", string()),
		("recommended_next_step", string()),
	]);
	let path = object(&[
		("path_id", string()),
		("title", string()),
		("goal", string()),
		("core_file_ids", strings()),
		("support_file_ids", strings()),
		("confidence", number()),
		("notes", string()),
	]);
	let learning_intent = object(&[
		("goal_kind", string()),
		("deadline", string()),
		("priorities", strings()),
		("constraints", strings()),
		("success_criteria", strings()),
		("confidence", number()),
		("uncertainty_notes", strings()),
	]);
	let question = object(&[("id", string()), ("question", string()), ("reason", string())]);

	object(&[
		("file_intents", array(file_intent)),
		("material_alignment", alignment),
		("paths", array(path)),
		("primary_path_id", string()),
		("combined_goal", string()),
		("learning_intent", learning_intent),
		("audience_level_guess", string()),
		("clarifying_questions", array(question)),
		("assumptions", strings()),
	])
}

pub(crate) fn pair_score_schema() -> Value {
	object(&[("score", number()), ("reason", string())])
}

fn intent_fields() -> Vec<(&'static str, Value)> {
	vec![
		("from_state", string()),
		("to_state", string()),
		("core_thread", string()),
		("destination_concepts", strings()),
		("prerequisite_concepts", strings()),
		("assumed_knowledge", strings()),
	]
}

/// Closed object whose every property is required.
fn object(fields: &[(&str, Value)]) -> Value {
	let mut properties = Map::new();

	for (name, schema) in fields {
		properties.insert((*name).to_string(), schema.clone());
	}

	let required: Vec<&str> = fields.iter().map(|(name, _)| *name).collect();

	json!({
		"type": "object",
		"additionalProperties": false,
		"properties": properties,
		"required": required,
	})
}

fn array(items: Value) -> Value {
	json!({ "type": "array", "items": items })
}

fn string() -> Value {
	json!({ "type": "string" })
}

fn strings() -> Value {
	array(string())
}

fn number() -> Value {
	json!({ "type": "number" })
}

fn nullable(ty: &str) -> Value {
	json!({ "type": [ty, "null"] })
}

#[cfg(test)]
mod tests {
	use super::*;

	fn assert_closed(schema: &Value) {
		if schema.get("type") == Some(&json!("object")) {
			let props = schema["properties"].as_object().expect("properties");
			let required = schema["required"].as_array().expect("required");

			assert_eq!(schema["additionalProperties"], json!(false));
			assert_eq!(props.len(), required.len());

			for value in props.values() {
				assert_closed(value);
			}
		}
		if let Some(items) = schema.get("items") {
			assert_closed(items);
		}
	}

	#[test]
	fn every_schema_is_strict() {
		for schema in [
			file_signature_schema(),
			material_intent_schema(),
			chunk_signal_schema(),
			set_signal_schema(),
			cross_set_schema(),
			path_intake_schema(),
			pair_score_schema(),
		] {
			assert_closed(&schema);
		}
	}

	#[test]
	fn outline_sections_nest_one_level() {
		let schema = file_signature_schema();
		let section = &schema["properties"]["outline_json"]["properties"]["sections"]["items"];

		assert!(section["properties"]["children"]["items"]["properties"].get("title").is_some());
		assert!(section["properties"]["children"]["items"]["properties"].get("children").is_none());
	}
}
