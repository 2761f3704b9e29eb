use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clamp01;

/// Text-quality signals over a file's chunks.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QualitySignals {
	pub total_chunks: usize,
	pub total_chars: usize,
	pub alpha_ratio: f64,
	pub noise_ratio: f64,
	pub table_chunks: usize,
	pub ocr_chunks: usize,
	pub transcript_chunks: usize,
	pub excerpt_chars: usize,
	pub coverage: f64,
	pub low_text_signal: bool,
}

/// Computes quality signals; `min_text_chars == 0` disables the low-text flag.
pub fn quality_signals(
	chunks: &[(&str, &Value)],
	excerpt_chars: usize,
	min_text_chars: usize,
) -> QualitySignals {
	let mut total_chars = 0;
	let mut visible = 0;
	let mut alpha = 0;
	let mut noise = 0;
	let mut signals = QualitySignals { total_chunks: chunks.len(), excerpt_chars, ..Default::default() };

	for (text, metadata) in chunks {
		for ch in text.chars() {
			total_chars += 1;

			if ch.is_whitespace() {
				continue;
			}

			visible += 1;

			if ch.is_alphabetic() {
				alpha += 1;
			} else if !ch.is_numeric() && !is_common_punctuation(ch) {
				noise += 1;
			}
		}

		let kind = metadata_kind(metadata);

		if kind.contains("table") {
			signals.table_chunks += 1;
		}
		if kind.contains("ocr") {
			signals.ocr_chunks += 1;
		}
		if kind.contains("transcript") || kind.contains("caption") || kind.contains("asr") {
			signals.transcript_chunks += 1;
		}
	}

	signals.total_chars = total_chars;
	signals.alpha_ratio = ratio(alpha, visible);
	signals.noise_ratio = ratio(noise, visible);
	signals.coverage = if total_chars == 0 { 0.0 } else { clamp01(excerpt_chars as f64 / total_chars as f64) };
	signals.low_text_signal = min_text_chars > 0 && total_chars < min_text_chars;

	signals
}

fn ratio(part: usize, whole: usize) -> f64 {
	if whole == 0 { 0.0 } else { clamp01(part as f64 / whole as f64) }
}

fn is_common_punctuation(ch: char) -> bool {
	matches!(
		ch,
		'.' | ',' | ';' | ':' | '!' | '?' | '\'' | '"' | '(' | ')' | '-' | '–' | '—' | '/' | '%'
			| '[' | ']' | '’' | '“' | '”'
	)
}

fn metadata_kind(metadata: &Value) -> String {
	match metadata {
		Value::Null => String::new(),
		other => other.to_string().to_lowercase(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn counts_kinds_from_metadata_substrings() {
		let table = serde_json::json!({ "kind": "Table" });
		let ocr = serde_json::json!({ "source": "ocr_page" });
		let none = Value::Null;
		let chunks = [("Hello world", &table), ("##@@ 12", &ocr), ("", &none)];
		let signals = quality_signals(&chunks, 5, 100);

		assert_eq!(signals.table_chunks, 1);
		assert_eq!(signals.ocr_chunks, 1);
		assert_eq!(signals.transcript_chunks, 0);
		assert_eq!(signals.total_chars, 18);
		assert!(signals.noise_ratio > 0.0);
		assert!(signals.low_text_signal);
	}

	#[test]
	fn zero_min_text_disables_low_text_flag() {
		let meta = Value::Null;
		let signals = quality_signals(&[("tiny", &meta)], 4, 0);

		assert!(!signals.low_text_signal);
		assert_eq!(signals.coverage, 1.0);
	}
}
