//! Acceptance report for a finished build.

use serde::Serialize;

use lkg_domain::acceptance::{self, AcceptanceInput, AcceptanceReport, AcceptanceThresholds};
use lkg_storage::{coverage, materials};

use crate::{
	LkgService, Result,
	stage::{StageContext, StageInput},
};

/// Counts produced by stages downstream of this pipeline.
#[derive(Clone, Copy, Debug, Default)]
pub struct BuildCounts {
	pub node_count: u32,
	pub unit_count: u32,
	pub lesson_count: u32,
	pub prompt_size_errors: u32,
}

#[derive(Clone, Debug, Serialize)]
pub struct AcceptanceOutput {
	pub input: AcceptanceInput,
	pub report: AcceptanceReport,
}

impl LkgService {
	pub async fn evaluate_acceptance(
		&self,
		ctx: &StageContext,
		input: &StageInput,
		counts: BuildCounts,
	) -> Result<AcceptanceOutput> {
		input.require_set()?;
		ctx.check()?;

		let set_id = input.material_set_id;
		let profile = materials::load_set_profile(&self.db.pool, set_id).await?;
		let coverage = coverage::count_set_coverage(&self.db.pool, set_id).await?;
		let input = AcceptanceInput {
			page_count: to_u32(profile.page_count),
			file_count: to_u32(profile.file_count),
			concept_count: to_u32(coverage.concept_count),
			node_count: counts.node_count,
			uncovered_concepts: to_u32(coverage.assumed_count),
			prompt_size_errors: counts.prompt_size_errors,
			unit_count: counts.unit_count,
			lesson_count: counts.lesson_count,
		};
		let report = acceptance::evaluate(&input, &AcceptanceThresholds::default());

		for check in report.checks.iter().filter(|check| !check.passed || check.warning.is_some()) {
			tracing::warn!(
				material_set_id = %set_id,
				check = %check.id,
				passed = check.passed,
				warning = check.warning.as_deref().unwrap_or_default(),
				"Acceptance check flagged."
			);
		}

		tracing::info!(material_set_id = %set_id, passed = report.passed, "Acceptance evaluated.");

		Ok(AcceptanceOutput { input, report })
	}
}

fn to_u32(value: i64) -> u32 {
	u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}
