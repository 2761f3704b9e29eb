pub fn render_schema(vector_dim: u32) -> String {
	let init = include_str!("../../../sql/init.sql");
	let expanded = expand_includes(init);

	expanded.replace("<VECTOR_DIM>", &vector_dim.to_string())
}

fn expand_includes(sql: &str) -> String {
	let mut out = String::new();

	for line in sql.lines() {
		let trimmed = line.trim();

		if let Some(path) = trimmed.strip_prefix("\\ir ") {
			match include_file(path.trim()) {
				Some(body) => out.push_str(body),
				None => out.push_str(line),
			}
		} else {
			out.push_str(line);
		}

		out.push('\n');
	}

	out
}

fn include_file(path: &str) -> Option<&'static str> {
	let body = match path {
		"00_extensions.sql" => include_str!("../../../sql/00_extensions.sql"),
		"tables/001_material_sets.sql" => include_str!("../../../sql/tables/001_material_sets.sql"),
		"tables/002_material_files.sql" =>
			include_str!("../../../sql/tables/002_material_files.sql"),
		"tables/003_material_chunks.sql" =>
			include_str!("../../../sql/tables/003_material_chunks.sql"),
		"tables/004_material_file_signatures.sql" =>
			include_str!("../../../sql/tables/004_material_file_signatures.sql"),
		"tables/005_material_file_sections.sql" =>
			include_str!("../../../sql/tables/005_material_file_sections.sql"),
		"tables/006_material_intents.sql" =>
			include_str!("../../../sql/tables/006_material_intents.sql"),
		"tables/007_material_chunk_signals.sql" =>
			include_str!("../../../sql/tables/007_material_chunk_signals.sql"),
		"tables/008_concepts.sql" => include_str!("../../../sql/tables/008_concepts.sql"),
		"tables/009_material_set_concept_coverage.sql" =>
			include_str!("../../../sql/tables/009_material_set_concept_coverage.sql"),
		"tables/010_material_edges.sql" =>
			include_str!("../../../sql/tables/010_material_edges.sql"),
		"tables/011_material_chunk_links.sql" =>
			include_str!("../../../sql/tables/011_material_chunk_links.sql"),
		"tables/012_material_set_intents.sql" =>
			include_str!("../../../sql/tables/012_material_set_intents.sql"),
		"tables/013_material_set_edges.sql" =>
			include_str!("../../../sql/tables/013_material_set_edges.sql"),
		"tables/014_global_concept_coverage.sql" =>
			include_str!("../../../sql/tables/014_global_concept_coverage.sql"),
		"tables/015_emergent_concepts.sql" =>
			include_str!("../../../sql/tables/015_emergent_concepts.sql"),
		"tables/016_paths.sql" => include_str!("../../../sql/tables/016_paths.sql"),
		"tables/017_chat_threads.sql" => include_str!("../../../sql/tables/017_chat_threads.sql"),
		"tables/018_chat_messages.sql" => include_str!("../../../sql/tables/018_chat_messages.sql"),
		"tables/019_learning_artifacts.sql" =>
			include_str!("../../../sql/tables/019_learning_artifacts.sql"),
		"tables/020_user_events.sql" => include_str!("../../../sql/tables/020_user_events.sql"),
		"tables/021_user_event_cursors.sql" =>
			include_str!("../../../sql/tables/021_user_event_cursors.sql"),
		"tables/022_user_progression_events.sql" =>
			include_str!("../../../sql/tables/022_user_progression_events.sql"),
		_ => return None,
	};

	Some(body)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn includes_are_expanded_and_dimension_substituted() {
		let sql = render_schema(384);

		assert!(!sql.contains("\\ir "));
		assert!(!sql.contains("<VECTOR_DIM>"));
		assert!(sql.contains("vector(384)"));
		assert!(sql.contains("CREATE TABLE IF NOT EXISTS user_progression_events"));
	}
}
