use lkg_domain::acceptance::{self, AcceptanceInput, AcceptanceThresholds};

#[test]
fn large_set_passes() {
	let report = acceptance::evaluate(
		&AcceptanceInput {
			page_count: 500,
			file_count: 12,
			concept_count: 120,
			node_count: 30,
			uncovered_concepts: 5,
			..Default::default()
		},
		&AcceptanceThresholds::default(),
	);

	assert!(report.passed);
	assert!(report.check("large_set_concepts").is_some_and(|c| c.passed));
	assert!(report.check("nodes_scale_with_concepts").is_some_and(|c| c.passed));
}

#[test]
fn large_set_with_few_concepts_fails() {
	let report = acceptance::evaluate(
		&AcceptanceInput {
			page_count: 400,
			file_count: 8,
			concept_count: 12,
			node_count: 3,
			uncovered_concepts: 6,
			..Default::default()
		},
		&AcceptanceThresholds::default(),
	);

	assert!(!report.passed);
	assert!(report.check("large_set_concepts").is_some_and(|c| !c.passed && c.warning.is_some()));
}

#[test]
fn small_set_passes() {
	let report = acceptance::evaluate(
		&AcceptanceInput {
			page_count: 12,
			file_count: 1,
			concept_count: 6,
			node_count: 2,
			unit_count: 1,
			lesson_count: 1,
			..Default::default()
		},
		&AcceptanceThresholds::default(),
	);

	assert!(report.passed);
}

#[test]
fn prompt_size_errors_fail() {
	let report = acceptance::evaluate(
		&AcceptanceInput {
			page_count: 30,
			concept_count: 10,
			node_count: 3,
			uncovered_concepts: 1,
			prompt_size_errors: 2,
			..Default::default()
		},
		&AcceptanceThresholds::default(),
	);

	assert!(!report.passed);
	assert!(report.check("prompt_size_failures").is_some_and(|c| !c.passed));
}

#[test]
fn raising_thresholds_never_turns_failures_into_passes() {
	let inputs = [
		AcceptanceInput { page_count: 500, concept_count: 45, node_count: 5, ..Default::default() },
		AcceptanceInput { page_count: 250, concept_count: 39, node_count: 10, ..Default::default() },
		AcceptanceInput { page_count: 20, concept_count: 8, node_count: 1, ..Default::default() },
		AcceptanceInput { page_count: 20, concept_count: 0, node_count: 0, ..Default::default() },
		AcceptanceInput { page_count: 120, concept_count: 60, node_count: 6, ..Default::default() },
	];
	let base = AcceptanceThresholds::default();
	let raised = [
		AcceptanceThresholds { large_set_min_concepts: 50, ..base.clone() },
		AcceptanceThresholds { nodes_per_concept: 0.2, ..base.clone() },
		AcceptanceThresholds { small_set_min_nodes: 3, ..base.clone() },
		AcceptanceThresholds { min_covered_ratio: 0.99, ..base.clone() },
	];

	for input in &inputs {
		let before = acceptance::evaluate(input, &base);

		for thresholds in &raised {
			let after = acceptance::evaluate(input, thresholds);

			for check in &before.checks {
				let later = after.check(&check.id).map(|c| c.passed).unwrap_or(true);

				assert!(check.passed || !later, "{} flipped to passing for {input:?}", check.id);
			}

			assert!(before.passed || !after.passed);
		}
	}
}
