//! Pipeline stages that turn uploaded materials into the learning knowledge graph.

pub mod acceptance;
pub mod chat;
pub mod cross_set;
pub mod file_signature;
pub mod material_signal;
pub mod path_intake;
pub mod progression;
pub mod stage;

mod artifact_cache;
mod error;
mod materials;
mod prompts;

pub use acceptance::{AcceptanceOutput, BuildCounts};
pub use chat::ChatPost;
pub use cross_set::CrossSetOutput;
pub use error::{Error, Result};
pub use file_signature::FileSignatureOutput;
pub use material_signal::MaterialSignalOutput;
pub use path_intake::{IntakeState, IntakeStatus, PathIntakeOutput};
pub use progression::ProgressionOutput;
pub use stage::{StageContext, StageInput, StageTrace};

use std::{future::Future, pin::Pin, sync::Arc};

use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use lkg_config::{Config, EmbeddingProviderConfig, LlmProviderConfig};
use lkg_providers::{embedding, llm};
use lkg_storage::{
	db::Db,
	models::ChatMessage,
	qdrant::{QdrantStore, VectorPoint},
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, lkg_providers::Result<Vec<Vec<f32>>>>;
}

pub trait LlmProvider
where
	Self: Send + Sync,
{
	fn generate_json<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		system: &'a str,
		user: &'a str,
		schema_name: &'a str,
		schema: &'a Value,
	) -> BoxFuture<'a, lkg_providers::Result<Value>>;
}

/// Best-effort vector index keyed by namespace.
pub trait VectorStore
where
	Self: Send + Sync,
{
	fn upsert<'a>(
		&'a self,
		namespace: &'a str,
		points: Vec<VectorPoint>,
	) -> BoxFuture<'a, lkg_storage::Result<usize>>;
}

/// Fire-and-forget fan-out after a chat message commits.
pub trait ChatNotifier
where
	Self: Send + Sync,
{
	fn message_created(&self, user_id: Uuid, thread_id: Uuid, message: &ChatMessage);
}

#[derive(Clone)]
pub struct Providers {
	pub embedding: Arc<dyn EmbeddingProvider>,
	pub llm: Arc<dyn LlmProvider>,
	pub vectors: Arc<dyn VectorStore>,
	pub notifier: Arc<dyn ChatNotifier>,
}
impl Providers {
	pub fn new(
		embedding: Arc<dyn EmbeddingProvider>,
		llm: Arc<dyn LlmProvider>,
		vectors: Arc<dyn VectorStore>,
		notifier: Arc<dyn ChatNotifier>,
	) -> Self {
		Self { embedding, llm, vectors, notifier }
	}

	/// HTTP providers, Qdrant vectors, and a notifier that only logs.
	pub fn with_qdrant(qdrant: QdrantStore) -> Self {
		let provider = Arc::new(DefaultProviders);

		Self {
			embedding: provider.clone(),
			llm: provider,
			vectors: Arc::new(qdrant),
			notifier: Arc::new(LogNotifier),
		}
	}
}

pub struct LkgService {
	pub cfg: Config,
	pub db: Db,
	pub providers: Providers,
}
impl LkgService {
	pub fn new(cfg: Config, db: Db, qdrant: QdrantStore) -> Self {
		Self::with_providers(cfg, db, Providers::with_qdrant(qdrant))
	}

	pub fn with_providers(cfg: Config, db: Db, providers: Providers) -> Self {
		Self { cfg, db, providers }
	}

	pub(crate) fn deps(&self) -> StageDeps {
		StageDeps {
			pool: self.db.pool.clone(),
			providers: self.providers.clone(),
			embedding: Arc::new(self.cfg.providers.embedding.clone()),
			llm: Arc::new(self.cfg.providers.llm.clone()),
			vector_dim: self.cfg.storage.qdrant.vector_dim as usize,
		}
	}
}

/// Owned handles a spawned worker needs.
#[derive(Clone)]
pub(crate) struct StageDeps {
	pub(crate) pool: PgPool,
	pub(crate) providers: Providers,
	pub(crate) embedding: Arc<EmbeddingProviderConfig>,
	pub(crate) llm: Arc<LlmProviderConfig>,
	pub(crate) vector_dim: usize,
}
impl StageDeps {
	pub(crate) async fn generate_json(
		&self,
		ctx: &StageContext,
		system: &str,
		user: &str,
		schema_name: &str,
		schema: &Value,
	) -> Result<Value> {
		ctx.check()?;

		let value =
			self.providers.llm.generate_json(&self.llm, system, user, schema_name, schema).await?;

		if !value.is_object() {
			return Err(Error::Provider {
				message: format!("{schema_name} response is not a JSON object."),
			});
		}

		Ok(value)
	}

	/// Embeds `texts`, checking that one vector of the configured dimension comes back per text.
	pub(crate) async fn embed(&self, ctx: &StageContext, texts: &[String]) -> Result<Vec<Vec<f32>>> {
		ctx.check()?;

		let vectors = self.providers.embedding.embed(&self.embedding, texts).await?;

		if vectors.len() != texts.len() {
			return Err(Error::Integrity {
				message: format!(
					"Embedding provider returned {} vectors for {} inputs.",
					vectors.len(),
					texts.len()
				),
			});
		}
		if let Some(bad) = vectors.iter().find(|vector| vector.len() != self.vector_dim) {
			return Err(Error::Integrity {
				message: format!(
					"Embedding dimension {} does not match vector_dim {}.",
					bad.len(),
					self.vector_dim
				),
			});
		}

		Ok(vectors)
	}
}

struct DefaultProviders;
impl EmbeddingProvider for DefaultProviders {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, lkg_providers::Result<Vec<Vec<f32>>>> {
		Box::pin(embedding::embed(cfg, texts))
	}
}

impl LlmProvider for DefaultProviders {
	fn generate_json<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		system: &'a str,
		user: &'a str,
		schema_name: &'a str,
		schema: &'a Value,
	) -> BoxFuture<'a, lkg_providers::Result<Value>> {
		Box::pin(llm::generate_json(cfg, system, user, schema_name, schema))
	}
}

impl VectorStore for QdrantStore {
	fn upsert<'a>(
		&'a self,
		namespace: &'a str,
		points: Vec<VectorPoint>,
	) -> BoxFuture<'a, lkg_storage::Result<usize>> {
		Box::pin(self.upsert_vectors(namespace, points))
	}
}

struct LogNotifier;
impl ChatNotifier for LogNotifier {
	fn message_created(&self, user_id: Uuid, thread_id: Uuid, message: &ChatMessage) {
		tracing::info!(
			%user_id,
			%thread_id,
			message_id = %message.id,
			seq = message.seq,
			"Chat message created."
		);
	}
}
