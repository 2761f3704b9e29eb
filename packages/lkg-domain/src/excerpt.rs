use unicode_segmentation::UnicodeSegmentation;

/// Remaining budget below which no further excerpt is emitted.
const MIN_EXCERPT_CHARS: usize = 40;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Excerpt {
	/// Position in the input slice.
	pub position: usize,
	pub text: String,
}

/// Truncates to at most `max` grapheme clusters, trimming surrounding whitespace.
pub fn truncate_chars(text: &str, max: usize) -> String {
	text.trim().graphemes(true).take(max).collect::<String>().trim_end().to_string()
}

pub fn char_len(text: &str) -> usize {
	text.graphemes(true).count()
}

/// Picks `wanted` indices spread uniformly over `0..total`, centered in each stride.
pub fn stratified_indices(total: usize, wanted: usize) -> Vec<usize> {
	if total == 0 || wanted == 0 {
		return Vec::new();
	}
	if wanted >= total {
		return (0..total).collect();
	}

	let stride = total as f64 / wanted as f64;
	let mut out: Vec<usize> = (0..wanted)
		.map(|i| ((i as f64 * stride + stride / 2.0).floor() as usize).min(total - 1))
		.collect();

	out.dedup();

	out
}

/// Samples roughly `per_file` excerpts across the texts, each capped at `max_chars`, together
/// capped at `max_total_chars`. Blank texts are skipped before sampling.
pub fn select_excerpts(
	texts: &[&str],
	per_file: usize,
	max_chars: usize,
	max_total_chars: usize,
) -> Vec<Excerpt> {
	let candidates: Vec<usize> =
		texts.iter().enumerate().filter(|(_, text)| !text.trim().is_empty()).map(|(i, _)| i).collect();
	let mut remaining = max_total_chars;
	let mut out = Vec::new();

	for pick in stratified_indices(candidates.len(), per_file) {
		if remaining < MIN_EXCERPT_CHARS.min(max_total_chars).max(1) {
			break;
		}

		let position = candidates[pick];
		let text = truncate_chars(texts[position], max_chars.min(remaining));

		if text.is_empty() {
			continue;
		}

		remaining = remaining.saturating_sub(char_len(&text));

		out.push(Excerpt { position, text });
	}

	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn indices_are_uniform_and_bounded() {
		assert_eq!(stratified_indices(10, 5), vec![1, 3, 5, 7, 9]);
		assert_eq!(stratified_indices(3, 5), vec![0, 1, 2]);
		assert!(stratified_indices(0, 5).is_empty());
	}

	#[test]
	fn excerpts_respect_total_budget() {
		let long = "x".repeat(500);
		let texts = vec![long.as_str(); 8];
		let excerpts = select_excerpts(&texts, 4, 300, 700);
		let total: usize = excerpts.iter().map(|e| char_len(&e.text)).sum();

		assert!(total <= 700);
		assert_eq!(excerpts[0].text.len(), 300);
		assert_eq!(excerpts.len(), 3);
	}

	#[test]
	fn blank_chunks_are_skipped() {
		let texts = ["  ", "alpha", "", "beta"];
		let excerpts = select_excerpts(&texts, 4, 100, 1_000);
		let positions: Vec<usize> = excerpts.iter().map(|e| e.position).collect();

		assert_eq!(positions, vec![1, 3]);
	}
}
