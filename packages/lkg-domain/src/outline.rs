//! Outline hints and outline flattening for file signatures.

use std::{collections::HashSet, sync::LazyLock};

use regex::Regex;
use serde_json::Value;

use crate::excerpt::truncate_chars;

const MIN_HEADING_CHARS: usize = 4;
const MAX_HEADING_CHARS: usize = 80;
const MIN_UPPERCASE_RATIO: f64 = 0.6;
const MAX_SECTION_EXCERPT_CHARS: usize = 400;
pub const SECTION_PATH_SEPARATOR: &str = " > ";

static NUMBERED_HEADING: LazyLock<Option<Regex>> =
	LazyLock::new(|| Regex::new(r"^\d+(?:\.\d+)*\.?\s+\p{L}").ok());
static ROMAN_HEADING: LazyLock<Option<Regex>> =
	LazyLock::new(|| Regex::new(r"^([IVX]+)(?:(\.)\s*|\s+)\p{Lu}").ok());
// Chapter numerals I through XXXIX.
static ROMAN_NUMERAL: LazyLock<Option<Regex>> =
	LazyLock::new(|| Regex::new(r"^X{0,3}(?:IX|IV|V?I{0,3})$").ok());

/// One flattened outline entry, numbered densely from 1.
#[derive(Clone, Debug, PartialEq)]
pub struct SectionDraft {
	pub section_index: i32,
	pub title: String,
	pub path: String,
	pub depth: usize,
	pub start_page: Option<i32>,
	pub end_page: Option<i32>,
	pub start_sec: Option<f64>,
	pub end_sec: Option<f64>,
	pub text_excerpt: String,
	pub metadata: Value,
}

/// Heading heuristic: 4 to 80 chars and either a numeric/Roman prefix or mostly uppercase letters.
pub fn is_heading_line(line: &str) -> bool {
	let trimmed = line.trim();
	let len = trimmed.chars().count();

	if !(MIN_HEADING_CHARS..=MAX_HEADING_CHARS).contains(&len) {
		return false;
	}
	if NUMBERED_HEADING.as_ref().map(|re| re.is_match(trimmed)).unwrap_or(false)
		|| has_roman_prefix(trimmed)
	{
		return true;
	}

	let visible = trimmed.chars().filter(|ch| !ch.is_whitespace()).count();
	let letters: Vec<char> = trimmed.chars().filter(|ch| ch.is_alphabetic()).collect();

	if letters.is_empty() || letters.len() * 2 < visible {
		return false;
	}

	let upper = letters.iter().filter(|ch| ch.is_uppercase()).count();

	upper as f64 / letters.len() as f64 >= MIN_UPPERCASE_RATIO
}

/// A bare `I` needs a trailing dot so the pronoun does not read as a numeral.
fn has_roman_prefix(line: &str) -> bool {
	let (Some(heading), Some(numeral)) = (ROMAN_HEADING.as_ref(), ROMAN_NUMERAL.as_ref()) else {
		return false;
	};
	let Some(caps) = heading.captures(line) else {
		return false;
	};
	let prefix = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
	let dotted = caps.get(2).is_some();

	numeral.is_match(prefix) && (prefix != "I" || dotted)
}

/// Infers heading candidates from chunk texts, deduplicated case-insensitively.
pub fn infer_outline_hint(texts: &[&str], max_sections: usize) -> Vec<String> {
	let mut seen = HashSet::new();
	let mut out = Vec::new();

	for text in texts {
		for line in text.lines() {
			if out.len() >= max_sections {
				return out;
			}
			if !is_heading_line(line) {
				continue;
			}

			let heading = line.trim().to_string();

			if seen.insert(heading.to_lowercase()) {
				out.push(heading);
			}
		}
	}

	out
}

/// Reads an extractor-provided outline hint (`outline_hint` or `outline`), if any.
pub fn outline_hint_from_diagnostics(diagnostics: &Value, max_sections: usize) -> Option<Vec<String>> {
	let items = diagnostics
		.get("outline_hint")
		.or_else(|| diagnostics.get("outline"))
		.and_then(|value| value.as_array())?;
	let mut seen = HashSet::new();
	let hint: Vec<String> = items
		.iter()
		.filter_map(|item| {
			item.as_str().or_else(|| item.get("title").and_then(|title| title.as_str()))
		})
		.map(|title| title.trim().to_string())
		.filter(|title| !title.is_empty() && seen.insert(title.to_lowercase()))
		.take(max_sections)
		.collect();

	if hint.is_empty() { None } else { Some(hint) }
}

/// Flattens `outline_json.sections` (with nested `children`) in pre-order, up to `max_sections`.
pub fn flatten_outline(outline: &Value, max_sections: usize) -> Vec<SectionDraft> {
	let mut out = Vec::new();

	if let Some(sections) = outline.get("sections").and_then(|v| v.as_array()) {
		walk_sections(sections, &[], max_sections, &mut out);
	}

	out
}

fn walk_sections(
	sections: &[Value],
	ancestors: &[String],
	max_sections: usize,
	out: &mut Vec<SectionDraft>,
) {
	for section in sections {
		if out.len() >= max_sections {
			return;
		}

		let title = crate::string_field(section, "title");

		if title.is_empty() {
			continue;
		}

		let mut lineage = ancestors.to_vec();

		lineage.push(title.clone());

		let start_page = int_field(section, "start_page");
		let end_page = int_field(section, "end_page").or(start_page);
		let start_sec = float_field(section, "start_sec");
		let end_sec = float_field(section, "end_sec").or(start_sec);
		let excerpt = section
			.get("summary")
			.or_else(|| section.get("excerpt"))
			.and_then(|v| v.as_str())
			.unwrap_or_default();

		out.push(SectionDraft {
			section_index: out.len() as i32 + 1,
			title,
			path: lineage.join(SECTION_PATH_SEPARATOR),
			depth: lineage.len(),
			start_page,
			end_page,
			start_sec,
			end_sec,
			text_excerpt: truncate_chars(excerpt, MAX_SECTION_EXCERPT_CHARS),
			metadata: serde_json::json!({ "depth": lineage.len() }),
		});

		if let Some(children) = section.get("children").and_then(|v| v.as_array()) {
			walk_sections(children, &lineage, max_sections, out);
		}
	}
}

fn int_field(value: &Value, key: &str) -> Option<i32> {
	value.get(key).and_then(|v| v.as_i64()).and_then(|v| i32::try_from(v).ok()).filter(|v| *v >= 0)
}

fn float_field(value: &Value, key: &str) -> Option<f64> {
	value.get(key).and_then(|v| v.as_f64()).filter(|v| v.is_finite() && *v >= 0.0)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn dense_indices_follow_preorder() {
		let outline = serde_json::json!({
			"sections": [
				{ "title": "Intro", "start_page": 1, "children": [ { "title": "Scope" } ] },
				{ "title": "" },
				{ "title": "Method", "start_page": 4, "end_page": 9 }
			]
		});
		let sections = flatten_outline(&outline, 10);
		let indices: Vec<i32> = sections.iter().map(|s| s.section_index).collect();

		assert_eq!(indices, vec![1, 2, 3]);
		assert_eq!(sections[1].path, "Intro > Scope");
		assert_eq!(sections[0].end_page, Some(1));
	}

	#[test]
	fn heading_lines_respect_length_and_prefix_rules() {
		assert!(!is_heading_line("ABC"));
		assert!(is_heading_line("ABCD"));
		assert!(is_heading_line(&"A".repeat(80)));
		assert!(!is_heading_line(&"A".repeat(81)));
		assert!(is_heading_line("3.1 Title"));
		assert!(is_heading_line("3.1 introduction"));
		assert!(is_heading_line("IV Title"));
		assert!(is_heading_line("I. Overview"));
		assert!(is_heading_line("INTRODUCTION TO GRAPHS"));
		assert!(!is_heading_line("I Think So"));
		assert!(!is_heading_line("DC Comics"));
		assert!(!is_heading_line("IIII Title"));
		assert!(!is_heading_line("A plain sentence about graphs."));
	}

	#[test]
	fn inferred_hint_dedupes_case_insensitively() {
		let texts = [
			"INTRODUCTION\nGraphs are everywhere.\n2 Basic Terms",
			"2 BASIC TERMS\nII. Traversal\nmore prose here",
		];

		assert_eq!(infer_outline_hint(&texts, 10), vec![
			"INTRODUCTION".to_string(),
			"2 Basic Terms".to_string(),
			"II. Traversal".to_string(),
		]);
		assert_eq!(infer_outline_hint(&texts, 2).len(), 2);
	}

	#[test]
	fn flatten_stops_at_max_sections() {
		let outline = serde_json::json!({
			"sections": [
				{ "title": "One", "children": [ { "title": "One A" }, { "title": "One B" } ] },
				{ "title": "Two", "children": [ { "title": "Two A" } ] },
				{ "title": "Three" }
			]
		});
		let sections = flatten_outline(&outline, 4);
		let titles: Vec<&str> = sections.iter().map(|s| s.title.as_str()).collect();
		let indices: Vec<i32> = sections.iter().map(|s| s.section_index).collect();

		assert_eq!(sections.len(), 4);
		assert_eq!(titles, vec!["One", "One A", "One B", "Two"]);
		assert_eq!(indices, vec![1, 2, 3, 4]);
		assert_eq!(sections[2].depth, 2);
	}

	#[test]
	fn diagnostics_hint_accepts_objects_and_strings() {
		let diagnostics = serde_json::json!({
			"outline_hint": ["Intro", { "title": "Body" }, "intro", 3]
		});

		assert_eq!(
			outline_hint_from_diagnostics(&diagnostics, 5),
			Some(vec!["Intro".to_string(), "Body".to_string()])
		);
		assert_eq!(outline_hint_from_diagnostics(&serde_json::json!({}), 5), None);
	}
}
