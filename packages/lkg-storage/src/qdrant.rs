pub const DENSE_VECTOR_NAME: &str = "dense";

use std::collections::HashMap;

use qdrant_client::{
	Payload,
	qdrant::{
		CreateCollectionBuilder, Distance, PointStruct, UpsertPointsBuilder, Vector,
		VectorParamsBuilder, VectorsConfigBuilder,
	},
};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{Error, Result};

/// One dense vector keyed by a domain id.
#[derive(Clone, Debug)]
pub struct VectorPoint {
	pub key: Uuid,
	pub vector: Vec<f32>,
	pub payload: Map<String, Value>,
}

pub struct QdrantStore {
	pub client: qdrant_client::Qdrant,
	pub collection: String,
	pub vector_dim: u32,
}
impl QdrantStore {
	pub fn new(cfg: &lkg_config::Qdrant) -> Result<Self> {
		let client = qdrant_client::Qdrant::from_url(&cfg.url).build()?;

		Ok(Self { client, collection: cfg.collection.clone(), vector_dim: cfg.vector_dim })
	}

	pub async fn ensure_collection(&self) -> Result<()> {
		if self.client.collection_exists(self.collection.clone()).await? {
			return Ok(());
		}

		let mut vectors_config = VectorsConfigBuilder::default();

		vectors_config.add_named_vector_params(
			DENSE_VECTOR_NAME,
			VectorParamsBuilder::new(self.vector_dim.into(), Distance::Cosine),
		);

		self.client
			.create_collection(
				CreateCollectionBuilder::new(self.collection.clone()).vectors_config(vectors_config),
			)
			.await?;

		Ok(())
	}

	/// Upserts `points` under `namespace`, returning the number written.
	///
	/// Point ids are derived from `namespace` and the point key, so rewriting the same key
	/// replaces the previous vector.
	pub async fn upsert_vectors(&self, namespace: &str, points: Vec<VectorPoint>) -> Result<usize> {
		if points.is_empty() {
			return Ok(0);
		}

		let mut structs = Vec::with_capacity(points.len());

		for point in points {
			if point.vector.len() != self.vector_dim as usize {
				return Err(Error::InvalidArgument(format!(
					"Vector for {} has dimension {}, expected {}.",
					point.key,
					point.vector.len(),
					self.vector_dim
				)));
			}

			let mut payload = Payload::new();

			for (key, value) in point.payload {
				payload.insert(key, value);
			}

			payload.insert("namespace", namespace.to_string());
			payload.insert("key", point.key.to_string());

			let mut vectors = HashMap::new();

			vectors.insert(DENSE_VECTOR_NAME.to_string(), Vector::from(point.vector));

			structs.push(PointStruct::new(
				point_id(namespace, point.key).to_string(),
				vectors,
				payload,
			));
		}

		let count = structs.len();

		self.client
			.upsert_points(UpsertPointsBuilder::new(self.collection.clone(), structs).wait(true))
			.await?;

		Ok(count)
	}
}

pub fn point_id(namespace: &str, key: Uuid) -> Uuid {
	Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("{namespace}:{key}").as_bytes())
}
