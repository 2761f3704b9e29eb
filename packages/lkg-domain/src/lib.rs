//! Deterministic building blocks for the learning graph pipeline.
//!
//! Everything here is a pure function of its inputs; the service crate owns all I/O.

pub mod acceptance;
pub mod adaptive;
pub mod citations;
pub mod concept;
pub mod coverage;
pub mod cross_set;
pub mod excerpt;
pub mod fingerprint;
pub mod intake;
pub mod intent;
pub mod language;
pub mod outline;
pub mod progression;
pub mod quality;
pub mod set_intent;
pub mod signal;
pub mod soft_split;
pub mod weights;

/// Clamps to `[0, 1]`, mapping non-finite values to zero.
pub fn clamp01(value: f64) -> f64 {
	if !value.is_finite() {
		return 0.0;
	}

	value.clamp(0.0, 1.0)
}

/// Reads a score from an LLM payload, accepting both unit and percentage scales.
pub fn normalize_score(value: Option<&serde_json::Value>, default: f64) -> f64 {
	let Some(raw) = value.and_then(|v| v.as_f64().or_else(|| v.as_str()?.trim().parse().ok()))
	else {
		return clamp01(default);
	};

	if raw > 1.0 && raw <= 100.0 {
		return clamp01(raw / 100.0);
	}

	clamp01(raw)
}

pub fn string_list(value: Option<&serde_json::Value>) -> Vec<String> {
	let Some(items) = value.and_then(|v| v.as_array()) else {
		return Vec::new();
	};

	items
		.iter()
		.filter_map(|item| item.as_str())
		.map(|item| item.trim())
		.filter(|item| !item.is_empty())
		.map(str::to_string)
		.collect()
}

pub fn string_field(value: &serde_json::Value, key: &str) -> String {
	value.get(key).and_then(|v| v.as_str()).map(|v| v.trim().to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn normalizes_percentage_scores() {
		assert_eq!(normalize_score(Some(&serde_json::json!(80)), 0.1), 0.8);
		assert_eq!(normalize_score(Some(&serde_json::json!(0.25)), 0.1), 0.25);
		assert_eq!(normalize_score(Some(&serde_json::json!("0.5")), 0.1), 0.5);
		assert_eq!(normalize_score(Some(&serde_json::json!(-3)), 0.1), 0.0);
		assert_eq!(normalize_score(None, 0.4), 0.4);
	}

	#[test]
	fn clamp01_maps_nan_to_zero() {
		assert_eq!(clamp01(f64::NAN), 0.0);
		assert_eq!(clamp01(1.7), 1.0);
	}
}
