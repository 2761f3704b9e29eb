//! What every stage invocation carries in and reports back.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::{sync::AcquireError, task::JoinError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use lkg_domain::adaptive::AdaptiveTrace;

use crate::{Error, Result};

/// Cancellation and deadline shared by a stage and all of its workers.
#[derive(Clone, Debug, Default)]
pub struct StageContext {
	cancel: CancellationToken,
	deadline: Option<Instant>,
}
impl StageContext {
	pub fn new(cancel: CancellationToken) -> Self {
		Self { cancel, deadline: None }
	}

	pub fn with_deadline(mut self, deadline: Instant) -> Self {
		self.deadline = Some(deadline);

		self
	}

	pub fn token(&self) -> &CancellationToken {
		&self.cancel
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancel.is_cancelled() || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
	}

	/// Called before every external call.
	pub fn check(&self) -> Result<()> {
		if self.is_cancelled() {
			return Err(Error::Cancelled);
		}

		Ok(())
	}
}

/// Identifiers the external saga passes to every stage.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageInput {
	pub owner_user_id: Uuid,
	pub material_set_id: Uuid,
	#[serde(default)]
	pub saga_id: Option<Uuid>,
	#[serde(default)]
	pub path_id: Option<Uuid>,
	#[serde(default)]
	pub thread_id: Option<Uuid>,
	#[serde(default)]
	pub job_id: Option<String>,
}
impl StageInput {
	pub fn new(owner_user_id: Uuid, material_set_id: Uuid) -> Self {
		Self { owner_user_id, material_set_id, ..Default::default() }
	}

	pub(crate) fn require_owner(&self) -> Result<()> {
		if self.owner_user_id.is_nil() {
			return Err(Error::Configuration { message: "owner_user_id is required.".to_string() });
		}

		Ok(())
	}

	pub(crate) fn require_set(&self) -> Result<()> {
		self.require_owner()?;

		if self.material_set_id.is_nil() {
			return Err(Error::Configuration {
				message: "material_set_id is required.".to_string(),
			});
		}

		Ok(())
	}

	pub(crate) fn require_path(&self) -> Result<Uuid> {
		self.require_set()?;

		self.path_id.filter(|id| !id.is_nil()).ok_or_else(|| Error::Configuration {
			message: "path_id is required.".to_string(),
		})
	}

	/// Idempotency key for chat messages: the job id, else the saga id, else the path id.
	pub(crate) fn job_key(&self) -> String {
		if let Some(job_id) = self.job_id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
			return job_id.to_string();
		}

		self.saga_id.or(self.path_id).map(|id| id.to_string()).unwrap_or_default()
	}
}

/// Observability fields flattened into every stage output.
#[derive(Clone, Debug, Default, Serialize)]
pub struct StageTrace {
	pub adaptive: AdaptiveTrace,
	pub warnings: Vec<String>,
	pub cache_hit: bool,
	pub seeded: bool,
	pub disabled: bool,
}
impl StageTrace {
	/// Records a degraded step; the stage keeps going.
	pub(crate) fn warn(&mut self, stage: &str, message: String) {
		tracing::warn!(stage, warning = %message, "Stage step degraded.");

		self.warnings.push(message);
	}

	pub(crate) fn extend(&mut self, stage: &str, warnings: Vec<String>) {
		for message in warnings {
			self.warn(stage, message);
		}
	}
}

pub(crate) fn join_error(err: JoinError) -> Error {
	if err.is_cancelled() {
		return Error::Cancelled;
	}

	Error::Integrity { message: format!("Worker task failed: {err}.") }
}

pub(crate) fn permit_error(_: AcquireError) -> Error {
	Error::Cancelled
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn job_key_prefers_explicit_job_id() {
		let saga = Uuid::from_u128(7);
		let mut input = StageInput::new(Uuid::from_u128(1), Uuid::from_u128(2));

		input.saga_id = Some(saga);

		assert_eq!(input.job_key(), saga.to_string());

		input.job_id = Some(" job-1 ".to_string());

		assert_eq!(input.job_key(), "job-1");
	}

	#[test]
	fn nil_identifiers_are_configuration_errors() {
		let input = StageInput::new(Uuid::from_u128(1), Uuid::nil());

		assert!(matches!(input.require_set(), Err(Error::Configuration { .. })));
		assert!(matches!(
			StageInput::new(Uuid::from_u128(1), Uuid::from_u128(2)).require_path(),
			Err(Error::Configuration { .. })
		));
	}

	#[test]
	fn cancelled_token_fails_check() {
		let ctx = StageContext::default();

		assert!(ctx.check().is_ok());

		ctx.token().cancel();

		assert!(matches!(ctx.check(), Err(Error::Cancelled)));
	}
}
