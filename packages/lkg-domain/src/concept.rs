use std::collections::HashSet;

use unicode_normalization::UnicodeNormalization;

pub const MAX_CONCEPT_KEY_CHARS: usize = 64;

/// Folds a free-form concept label into a stable key, e.g. `"Big-O  Notation"` → `big_o_notation`.
pub fn normalize_concept_key(raw: &str) -> Option<String> {
	let mut out = String::new();
	let mut pending_separator = false;
	let mut count = 0;

	for ch in raw.nfkc().flat_map(char::to_lowercase) {
		if !ch.is_alphanumeric() {
			pending_separator = true;

			continue;
		}
		if count >= MAX_CONCEPT_KEY_CHARS {
			break;
		}
		if pending_separator && !out.is_empty() {
			if count + 1 >= MAX_CONCEPT_KEY_CHARS {
				break;
			}

			out.push('_');

			count += 1;
		}

		pending_separator = false;

		out.push(ch);

		count += 1;
	}

	if out.is_empty() { None } else { Some(out) }
}

/// Normalizes and deduplicates keys, keeping first-seen order.
pub fn normalize_concept_keys<I, S>(raw: I) -> Vec<String>
where
	I: IntoIterator<Item = S>,
	S: AsRef<str>,
{
	let mut seen = HashSet::new();
	let mut out = Vec::new();

	for item in raw {
		if let Some(key) = normalize_concept_key(item.as_ref())
			&& seen.insert(key.clone())
		{
			out.push(key);
		}
	}

	out
}

/// The phrase form of a key, used for substring matching against prose.
pub fn key_phrase(key: &str) -> String {
	key.replace('_', " ")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn folds_punctuation_and_case() {
		assert_eq!(normalize_concept_key("  Big-O  Notation! ").as_deref(), Some("big_o_notation"));
		assert_eq!(normalize_concept_key("ＴＣＰ／ＩＰ").as_deref(), Some("tcp_ip"));
		assert_eq!(normalize_concept_key("--"), None);
	}

	#[test]
	fn caps_key_length_without_trailing_separator() {
		let raw = format!("{} tail", "a".repeat(63));
		let key = normalize_concept_key(&raw).expect("key");

		assert_eq!(key.chars().count(), 63);
		assert!(!key.ends_with('_'));
	}

	#[test]
	fn dedupes_after_normalization() {
		let keys = normalize_concept_keys(["Graphs", "graphs", "Trees", " GRAPHS "]);

		assert_eq!(keys, vec!["graphs".to_string(), "trees".to_string()]);
	}
}
