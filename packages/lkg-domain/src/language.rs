/// Code used when no language can be determined.
pub const UNDETERMINED: &str = "und";

const MIN_LETTERS: usize = 24;

/// ISO 639-3 code for `text`, or [`UNDETERMINED`] when the sample is short or the detector is
/// unsure.
pub fn detect_language(text: &str) -> String {
	let letters = text.chars().filter(|ch| ch.is_alphabetic()).count();

	if letters < MIN_LETTERS {
		return UNDETERMINED.to_string();
	}

	let Some(info) = whatlang::detect(text) else {
		return UNDETERMINED.to_string();
	};

	if !info.is_reliable() {
		return UNDETERMINED.to_string();
	}

	info.lang().code().to_string()
}

/// Prefers a model-reported language, else detects one from the excerpts.
pub fn resolve_language(reported: &str, excerpts: &[&str]) -> String {
	let reported = reported.trim().to_lowercase();

	if !reported.is_empty() && reported != UNDETERMINED {
		return reported;
	}

	detect_language(&excerpts.join("\n"))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn detects_english_prose() {
		let text = "The quick brown fox jumps over the lazy dog while the farmer watches from the porch \
			and wonders whether the weather will hold for the harvest tomorrow morning.";

		assert_eq!(detect_language(text), "eng");
	}

	#[test]
	fn short_text_is_undetermined() {
		assert_eq!(detect_language("ok"), UNDETERMINED);
		assert_eq!(resolve_language(" EN ", &[]), "en");
	}
}
