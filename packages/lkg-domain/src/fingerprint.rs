use serde_json::Value;
use sha1::{Digest, Sha1};
use uuid::Uuid;

/// Identity of a file's extracted content.
///
/// Stable under chunk reordering and metadata edits; changes when the file's name, size, MIME
/// type, chunk set, or total text length changes.
pub fn file_fingerprint(
	original_name: &str,
	size_bytes: i64,
	mime_type: &str,
	chunk_ids: &[Uuid],
	total_chars: usize,
) -> String {
	let mut ids = chunk_ids.to_vec();

	ids.sort();
	ids.dedup();

	let mut hasher = Sha1::new();

	hasher.update(original_name.trim().as_bytes());
	hasher.update(b"\n");
	hasher.update(size_bytes.to_string().as_bytes());
	hasher.update(b"\n");
	hasher.update(mime_type.trim().as_bytes());
	hasher.update(b"\n");

	for id in &ids {
		hasher.update(id.to_string().as_bytes());
		hasher.update(b"\n");
	}

	hasher.update(total_chars.to_string().as_bytes());

	hex::encode(hasher.finalize())
}

/// Input hash of one stage invocation.
///
/// `payload` must enumerate the inputs deterministically; object keys serialize sorted.
pub fn stage_input_hash(
	stage: &str,
	material_set_id: Uuid,
	path_id: Option<Uuid>,
	payload: &Value,
) -> String {
	let envelope = serde_json::json!({
		"stage": stage,
		"material_set_id": material_set_id,
		"path_id": path_id,
		"payload": payload,
	});

	blake3::hash(envelope.to_string().as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fingerprint_ignores_chunk_order() {
		let a = Uuid::from_u128(1);
		let b = Uuid::from_u128(2);
		let left = file_fingerprint(" notes.pdf ", 10, "application/pdf", &[a, b], 42);
		let right = file_fingerprint("notes.pdf", 10, "application/pdf", &[b, a], 42);

		assert_eq!(left, right);
	}

	#[test]
	fn fingerprint_tracks_text_identity() {
		let a = Uuid::from_u128(1);
		let base = file_fingerprint("notes.pdf", 10, "application/pdf", &[a], 42);

		assert_ne!(base, file_fingerprint("notes.pdf", 10, "application/pdf", &[a], 43));
		assert_ne!(base, file_fingerprint("notes.pdf", 10, "text/plain", &[a], 42));
		assert_ne!(
			base,
			file_fingerprint("notes.pdf", 10, "application/pdf", &[a, Uuid::from_u128(9)], 42)
		);
	}

	#[test]
	fn fingerprint_is_sha1_hex() {
		let fingerprint =
			file_fingerprint("notes.pdf", 10, "application/pdf", &[Uuid::from_u128(1)], 42);

		assert_eq!(fingerprint.len(), 40);
		assert!(fingerprint.chars().all(|ch| ch.is_ascii_hexdigit()));
	}

	#[test]
	fn stage_hash_depends_on_stage_and_path() {
		let set = Uuid::from_u128(7);
		let payload = serde_json::json!({ "files": ["a", "b"] });
		let base = stage_input_hash("file_signature", set, None, &payload);

		assert_eq!(base, stage_input_hash("file_signature", set, None, &payload));
		assert_ne!(base, stage_input_hash("material_signal", set, None, &payload));
		assert_ne!(base, stage_input_hash("file_signature", set, Some(Uuid::from_u128(1)), &payload));
	}
}
