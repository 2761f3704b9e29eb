use std::{collections::HashSet, sync::LazyLock};

use regex::Regex;

pub const MAX_CITATIONS: usize = 50;

static URL: LazyLock<Option<Regex>> =
	LazyLock::new(|| Regex::new(r#"https?://[^\s<>"'()\[\]]+"#).ok());
static DOI: LazyLock<Option<Regex>> =
	LazyLock::new(|| Regex::new(r#"\b10\.\d{4,9}/[^\s<>"']+"#).ok());
static RFC: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\bRFC\s?(\d{1,5})\b").ok());

/// Finds URLs, DOIs, and RFC references in the given texts, in first-seen order.
pub fn extract_citations<S>(texts: &[S]) -> Vec<String>
where
	S: AsRef<str>,
{
	let mut found = Vec::new();

	for text in texts {
		let text = text.as_ref();

		if let Some(re) = URL.as_ref() {
			found.extend(re.find_iter(text).map(|m| trim_trailing(m.as_str())));
		}
		if let Some(re) = DOI.as_ref() {
			found.extend(
				re.find_iter(text)
					.filter(|m| !is_inside_url(text, m.start()))
					.map(|m| trim_trailing(m.as_str())),
			);
		}
		if let Some(re) = RFC.as_ref() {
			found.extend(re.captures_iter(text).map(|caps| format!("RFC {}", &caps[1])));
		}
	}

	merge_citations(found, Vec::new())
}

/// Merges extracted and model-proposed citations, deduplicated case-insensitively.
pub fn merge_citations(extracted: Vec<String>, proposed: Vec<String>) -> Vec<String> {
	let mut seen = HashSet::new();

	extracted
		.into_iter()
		.chain(proposed)
		.map(|citation| citation.trim().to_string())
		.filter(|citation| !citation.is_empty() && seen.insert(citation.to_lowercase()))
		.take(MAX_CITATIONS)
		.collect()
}

fn trim_trailing(raw: &str) -> String {
	raw.trim_end_matches(['.', ',', ';', ':', '!', '?']).to_string()
}

fn is_inside_url(text: &str, start: usize) -> bool {
	let prefix = &text[..start];
	let token_start = prefix.rfind(char::is_whitespace).map(|i| i + 1).unwrap_or(0);

	prefix[token_start..].contains("://")
}
