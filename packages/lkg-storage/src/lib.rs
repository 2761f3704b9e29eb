pub mod artifacts;
pub mod chat;
pub mod coverage;
pub mod cross_set;
pub mod db;
pub mod events;
pub mod materials;
pub mod models;
pub mod paths;
pub mod qdrant;
pub mod schema;
pub mod signals;
pub mod signatures;

mod error;

pub use error::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Text form accepted by `$n::text::vector`.
pub fn vector_to_pg(vec: &[f32]) -> String {
	let mut out = String::with_capacity(vec.len() * 8);

	out.push('[');

	for (i, value) in vec.iter().enumerate() {
		if i > 0 {
			out.push(',');
		}

		out.push_str(&value.to_string());
	}

	out.push(']');

	out
}

pub fn parse_pg_vector(text: &str) -> Result<Vec<f32>> {
	let trimmed = text.trim();
	let inner = trimmed
		.strip_prefix('[')
		.and_then(|rest| rest.strip_suffix(']'))
		.ok_or_else(|| Error::InvalidArgument("Vector text must be bracketed.".to_string()))?;

	if inner.trim().is_empty() {
		return Ok(Vec::new());
	}

	inner
		.split(',')
		.map(|part| {
			part.trim()
				.parse::<f32>()
				.map_err(|_| Error::InvalidArgument(format!("Invalid vector component {part:?}.")))
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn vector_text_round_trips() {
		let text = vector_to_pg(&[0.5, -1.0, 2.25]);

		assert_eq!(text, "[0.5,-1,2.25]");
		assert_eq!(parse_pg_vector(&text).expect("parse failed"), vec![0.5, -1.0, 2.25]);
		assert!(parse_pg_vector("0.5,1").is_err());
		assert_eq!(parse_pg_vector("[]").expect("parse failed"), Vec::<f32>::new());
	}
}
