//! Cursor-driven compaction of a user's raw events into progression facts.

use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;

use lkg_config::PipelineEnv;
use lkg_domain::progression::{self, EventCursor, ProgressionDraft, UserEventView};
use lkg_storage::{
	events,
	models::{UserEvent, UserProgressionEvent},
};

use crate::{
	LkgService, Result,
	stage::{StageContext, StageInput, StageTrace},
};

pub const CONSUMER: &str = "progression_compactor";

#[derive(Clone, Debug, Default, Serialize)]
pub struct ProgressionOutput {
	pub pages: u64,
	pub events_read: u64,
	pub rows_inserted: u64,
	pub cursor_event_id: Option<Uuid>,
	/// No unread events remained when the run stopped.
	pub exhausted: bool,
	#[serde(flatten)]
	pub trace: StageTrace,
}

impl LkgService {
	/// Compacts events past the stored cursor, one transaction per page.
	///
	/// Stops at the first short page, after `max_events`, or once `max_wall_ms` has elapsed. The
	/// cursor only moves together with the rows its page produced.
	pub async fn compact_progression(
		&self,
		ctx: &StageContext,
		input: &StageInput,
		env: &PipelineEnv,
	) -> Result<ProgressionOutput> {
		input.require_owner()?;

		let user_id = input.owner_user_id;
		let page_size = env.progression.page_size.max(1);
		let started = Instant::now();
		let wall = Duration::from_millis(env.progression.max_wall_ms);
		let mut out = ProgressionOutput::default();
		let mut cursor = events::get_cursor(&self.db.pool, user_id, CONSUMER).await?.map(|row| {
			EventCursor { last_created_at: row.last_created_at, last_event_id: row.last_event_id }
		});

		loop {
			ctx.check()?;

			let remaining = env.progression.max_events.saturating_sub(out.events_read as usize);

			if remaining == 0 || started.elapsed() >= wall {
				break;
			}

			let limit = page_size.min(remaining);
			let after = cursor.map(|c| (c.last_created_at, c.last_event_id));
			let page: Vec<UserEventView> =
				events::list_events_after(&self.db.pool, user_id, after, limit as i64)
					.await?
					.into_iter()
					.map(event_view)
					.collect();

			if page.is_empty() {
				out.exhausted = true;

				break;
			}

			let rows: Vec<UserProgressionEvent> =
				page.iter().map(progression::compact_event).map(progression_row).collect();
			let Some(next) = progression::advance_cursor(cursor, &page) else {
				break;
			};
			let mut tx = self.db.pool.begin().await?;
			let inserted = events::insert_progression_events(&mut *tx, &rows).await?;

			events::upsert_cursor(&mut *tx, user_id, CONSUMER, next.last_created_at, next.last_event_id)
				.await?;
			tx.commit().await?;

			cursor = Some(next);
			out.pages += 1;
			out.events_read += page.len() as u64;
			out.rows_inserted += inserted;

			if page.len() < limit {
				out.exhausted = true;

				break;
			}
		}

		out.cursor_event_id = cursor.map(|c| c.last_event_id);

		tracing::info!(
			user_id = %user_id,
			pages = out.pages,
			events_read = out.events_read,
			rows_inserted = out.rows_inserted,
			exhausted = out.exhausted,
			"Progression compaction finished."
		);

		Ok(out)
	}
}

fn event_view(event: UserEvent) -> UserEventView {
	UserEventView {
		id: event.id,
		user_id: event.user_id,
		created_at: event.created_at,
		occurred_at: event.occurred_at,
		event_type: event.r#type,
		path_id: event.path_id,
		activity_id: event.activity_id,
		concept_id: event.concept_id,
		data: event.data,
	}
}

fn progression_row(draft: ProgressionDraft) -> UserProgressionEvent {
	UserProgressionEvent {
		user_id: draft.user_id,
		source_event_id: draft.source_event_id,
		occurred_at: draft.occurred_at,
		path_id: draft.path_id,
		activity_id: draft.activity_id,
		concept_ids: draft.concept_ids,
		activity_kind: draft.activity_kind,
		variant: draft.variant,
		completed: draft.completed,
		score: draft.score,
		dwell_ms: draft.dwell_ms,
		attempts: draft.attempts,
	}
}
