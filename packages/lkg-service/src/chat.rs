//! Idempotent assistant messages on a chat thread.

use serde_json::{Map, Value};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use lkg_storage::{
	chat::{self, NewChatMessage},
	models::ChatMessage,
};

use crate::{ChatNotifier, Error, LkgService, Result};

pub const ROLE_ASSISTANT: &str = "assistant";
pub const ROLE_USER: &str = "user";

/// An assistant message keyed by `(thread_id, user_id, kind, job_id)`.
#[derive(Clone, Debug)]
pub struct ChatPost<'a> {
	pub thread_id: Uuid,
	pub user_id: Uuid,
	pub kind: &'a str,
	pub job_id: &'a str,
	pub content: String,
	pub metadata: Map<String, Value>,
}

/// Appends the message unless one with the same key exists; either way returns the stored row.
///
/// The notifier only hears about messages this call inserted.
pub async fn post_message_once(
	pool: &PgPool,
	notifier: &dyn ChatNotifier,
	post: ChatPost<'_>,
) -> Result<ChatMessage> {
	let mut tx = pool.begin().await?;
	let lock = chat::lock_thread(&mut *tx, post.thread_id).await?.ok_or_else(|| {
		Error::UpstreamData { message: format!("Chat thread {} does not exist.", post.thread_id) }
	})?;

	if lock.user_id != post.user_id {
		return Err(Error::InvalidRequest {
			message: format!("Chat thread {} belongs to another user.", post.thread_id),
		});
	}
	if let Some(existing) =
		chat::find_message_by_kind(&mut *tx, post.thread_id, post.user_id, post.kind, post.job_id)
			.await?
	{
		tx.commit().await?;

		return Ok(existing);
	}

	let mut metadata = post.metadata;

	metadata.insert("kind".to_string(), Value::String(post.kind.to_string()));
	metadata.insert("job_id".to_string(), Value::String(post.job_id.to_string()));

	let message = NewChatMessage {
		thread_id: post.thread_id,
		user_id: post.user_id,
		role: ROLE_ASSISTANT.to_string(),
		content: post.content,
		metadata: Value::Object(metadata),
	};
	let row = chat::append_message(&mut *tx, &lock, &message, OffsetDateTime::now_utc()).await?;

	tx.commit().await?;

	notifier.message_created(row.user_id, row.thread_id, &row);

	Ok(row)
}

impl LkgService {
	pub async fn post_message_once(&self, post: ChatPost<'_>) -> Result<ChatMessage> {
		post_message_once(&self.db.pool, self.providers.notifier.as_ref(), post).await
	}
}
