//! Compaction of raw user events into progression facts.

use std::collections::BTreeSet;

use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

/// Durable watermark: the last processed `(created_at, id)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventCursor {
	pub last_created_at: OffsetDateTime,
	pub last_event_id: Uuid,
}
impl EventCursor {
	/// Whether an event sorts strictly after this cursor.
	pub fn precedes(&self, created_at: OffsetDateTime, id: Uuid) -> bool {
		(self.last_created_at, self.last_event_id) < (created_at, id)
	}
}

#[derive(Clone, Debug, PartialEq)]
pub struct UserEventView {
	pub id: Uuid,
	pub user_id: Uuid,
	pub created_at: OffsetDateTime,
	pub occurred_at: OffsetDateTime,
	pub event_type: String,
	pub path_id: Option<Uuid>,
	pub activity_id: Option<Uuid>,
	pub concept_id: Option<Uuid>,
	pub data: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProgressionDraft {
	pub user_id: Uuid,
	pub source_event_id: Uuid,
	pub occurred_at: OffsetDateTime,
	pub path_id: Option<Uuid>,
	pub activity_id: Option<Uuid>,
	pub concept_ids: Vec<Uuid>,
	pub activity_kind: String,
	pub variant: String,
	pub completed: bool,
	pub score: Option<f64>,
	pub dwell_ms: Option<i64>,
	pub attempts: Option<i32>,
}

/// `concept_id` first, then `data.concept_ids`, without duplicates.
pub fn event_concept_ids(concept_id: Option<Uuid>, data: &Value) -> Vec<Uuid> {
	let mut seen = BTreeSet::new();
	let listed = data
		.get("concept_ids")
		.and_then(|v| v.as_array())
		.into_iter()
		.flatten()
		.filter_map(|v| v.as_str())
		.filter_map(|raw| Uuid::parse_str(raw.trim()).ok());

	concept_id.into_iter().chain(listed).filter(|id| seen.insert(*id)).collect()
}

pub fn compact_event(event: &UserEventView) -> ProgressionDraft {
	let data = &event.data;
	let activity_kind = text(data, &["activity_kind", "kind"]).unwrap_or_else(|| event.event_type.clone());
	let completed = data
		.get("completed")
		.and_then(|v| v.as_bool())
		.unwrap_or_else(|| event.event_type.ends_with("completed"));

	ProgressionDraft {
		user_id: event.user_id,
		source_event_id: event.id,
		occurred_at: event.occurred_at,
		path_id: event.path_id,
		activity_id: event.activity_id,
		concept_ids: event_concept_ids(event.concept_id, data),
		activity_kind,
		variant: text(data, &["variant"]).unwrap_or_default(),
		completed,
		score: data.get("score").and_then(|v| v.as_f64()).filter(|v| v.is_finite()),
		dwell_ms: data
			.get("dwell_ms")
			.or_else(|| data.get("duration_ms"))
			.and_then(|v| v.as_i64())
			.filter(|v| *v >= 0),
		attempts: data
			.get("attempts")
			.and_then(|v| v.as_i64())
			.and_then(|v| i32::try_from(v).ok())
			.filter(|v| *v >= 0),
	}
}

/// Cursor after a page sorted by `(created_at, id)`; unchanged for an empty page.
pub fn advance_cursor(cursor: Option<EventCursor>, page: &[UserEventView]) -> Option<EventCursor> {
	page.last()
		.map(|event| EventCursor { last_created_at: event.created_at, last_event_id: event.id })
		.or(cursor)
}

fn text(data: &Value, keys: &[&str]) -> Option<String> {
	keys.iter()
		.filter_map(|key| data.get(*key).and_then(|v| v.as_str()))
		.map(str::trim)
		.find(|value| !value.is_empty())
		.map(str::to_string)
}
