use std::collections::HashMap;

use qdrant_client::{
	client::Payload,
	qdrant::{
		Condition, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder,
		DeletePointsBuilder, Distance, FieldType, Filter, PointStruct, Query, QueryPointsBuilder,
		ScoredPoint, UpsertPointsBuilder, Value, Vector, VectorParamsBuilder,
		VectorsConfigBuilder, point_id::PointIdOptions, value::Kind,
	},
};
use uuid::Uuid;

use crate::{Error, Result};

pub const DENSE_VECTOR_NAME: &str = "dense";

const KEYWORD_INDEXES: [&str; 2] = ["company_id", "document_id"];

pub struct QdrantStore {
	pub client: qdrant_client::Qdrant,
	pub collection: String,
	pub vector_dim: u32,
}

/// One chunk ready to be written to the collection.
#[derive(Clone, Debug)]
pub struct ChunkPoint {
	pub chunk_id: Uuid,
	pub company_id: Uuid,
	pub document_id: Uuid,
	pub chunk_index: i32,
	pub title: String,
	pub text: String,
	pub vector: Vec<f32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChunkHit {
	pub chunk_id: Uuid,
	pub document_id: Uuid,
	pub chunk_index: i32,
	pub title: String,
	pub text: String,
	pub score: f32,
}

impl QdrantStore {
	pub fn new(cfg: &benefits_config::Qdrant) -> Result<Self> {
		let client = qdrant_client::Qdrant::from_url(&cfg.url).build()?;

		Ok(Self { client, collection: cfg.collection.clone(), vector_dim: cfg.vector_dim })
	}

	/// Creates the collection and its payload indexes when missing.
	pub async fn ensure_collection(&self) -> Result<()> {
		if self.client.collection_exists(self.collection.as_str()).await? {
			return Ok(());
		}

		let mut vectors_config = VectorsConfigBuilder::default();

		vectors_config.add_named_vector_params(
			DENSE_VECTOR_NAME,
			VectorParamsBuilder::new(u64::from(self.vector_dim), Distance::Cosine),
		);

		self.client
			.create_collection(
				CreateCollectionBuilder::new(self.collection.clone()).vectors_config(vectors_config),
			)
			.await?;

		for field in KEYWORD_INDEXES {
			self.client
				.create_field_index(
					CreateFieldIndexCollectionBuilder::new(
						self.collection.clone(),
						field,
						FieldType::Keyword,
					)
					.wait(true),
				)
				.await?;
		}

		tracing::info!(collection = %self.collection, "Created Qdrant collection.");

		Ok(())
	}

	pub async fn upsert_chunks(&self, points: &[ChunkPoint]) -> Result<()> {
		if points.is_empty() {
			return Ok(());
		}

		for point in points {
			self.check_dimension(&point.vector)?;
		}

		let points = points.iter().map(to_point_struct).collect::<Vec<_>>();

		self.client
			.upsert_points(UpsertPointsBuilder::new(self.collection.clone(), points).wait(true))
			.await?;

		Ok(())
	}

	/// Removes every point of a document. A missing point is not an error.
	pub async fn delete_document_points(&self, document_id: Uuid) -> Result<()> {
		let filter = Filter::must([Condition::matches("document_id", document_id.to_string())]);
		let delete = DeletePointsBuilder::new(self.collection.clone()).points(filter).wait(true);

		match self.client.delete_points(delete).await {
			Ok(_) => Ok(()),
			Err(err) if is_not_found_error(&err) => {
				tracing::info!(document_id = %document_id, "Qdrant points missing during delete.");

				Ok(())
			},
			Err(err) => Err(err.into()),
		}
	}

	/// Nearest chunks of one company at or above `min_score`.
	pub async fn search_chunks(
		&self,
		company_id: Uuid,
		vector: &[f32],
		top_k: u32,
		min_score: f32,
	) -> Result<Vec<ChunkHit>> {
		self.check_dimension(vector)?;

		let filter = Filter::must([Condition::matches("company_id", company_id.to_string())]);
		let search = QueryPointsBuilder::new(self.collection.clone())
			.query(Query::new_nearest(vector.to_vec()))
			.using(DENSE_VECTOR_NAME)
			.filter(filter)
			.with_payload(true)
			.limit(u64::from(top_k))
			.score_threshold(min_score);
		let response = self.client.query(search).await?;

		Ok(response.result.iter().filter_map(hit_from_point).collect())
	}

	fn check_dimension(&self, vector: &[f32]) -> Result<()> {
		if vector.len() != self.vector_dim as usize {
			return Err(Error::InvalidArgument { expected: self.vector_dim, actual: vector.len() });
		}

		Ok(())
	}
}

pub fn chunk_payload(point: &ChunkPoint) -> HashMap<String, Value> {
	let mut payload = HashMap::new();

	payload.insert("company_id".to_string(), Value::from(point.company_id.to_string()));
	payload.insert("document_id".to_string(), Value::from(point.document_id.to_string()));
	payload.insert("chunk_id".to_string(), Value::from(point.chunk_id.to_string()));
	payload.insert("chunk_index".to_string(), Value::from(i64::from(point.chunk_index)));
	payload.insert("title".to_string(), Value::from(point.title.clone()));
	payload.insert("text".to_string(), Value::from(point.text.clone()));

	payload
}

fn to_point_struct(point: &ChunkPoint) -> PointStruct {
	let mut vectors = HashMap::new();

	vectors.insert(DENSE_VECTOR_NAME.to_string(), Vector::from(point.vector.clone()));

	PointStruct::new(point.chunk_id.to_string(), vectors, Payload::from(chunk_payload(point)))
}

fn hit_from_point(point: &ScoredPoint) -> Option<ChunkHit> {
	let chunk_id = match point.id.as_ref()?.point_id_options.as_ref()? {
		PointIdOptions::Uuid(id) => Uuid::parse_str(id).ok()?,
		PointIdOptions::Num(_) => return None,
	};

	Some(ChunkHit {
		chunk_id,
		document_id: payload_uuid(&point.payload, "document_id")?,
		chunk_index: payload_i32(&point.payload, "chunk_index").unwrap_or_default(),
		title: payload_string(&point.payload, "title").unwrap_or_default(),
		text: payload_string(&point.payload, "text")?,
		score: point.score,
	})
}

pub fn payload_string(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
	match &payload.get(key)?.kind {
		Some(Kind::StringValue(text)) => Some(text.clone()),
		_ => None,
	}
}

pub fn payload_uuid(payload: &HashMap<String, Value>, key: &str) -> Option<Uuid> {
	payload_string(payload, key).and_then(|text| Uuid::parse_str(&text).ok())
}

pub fn payload_i32(payload: &HashMap<String, Value>, key: &str) -> Option<i32> {
	match &payload.get(key)?.kind {
		Some(Kind::IntegerValue(value)) => i32::try_from(*value).ok(),
		Some(Kind::DoubleValue(value)) if value.fract() == 0.0 => i32::try_from(*value as i64).ok(),
		_ => None,
	}
}

fn is_not_found_error(err: &qdrant_client::QdrantError) -> bool {
	is_not_found_message(&err.to_string())
}

fn is_not_found_message(message: &str) -> bool {
	let message = message.to_lowercase();
	let point_not_found =
		(message.contains("not found") || message.contains("404")) && message.contains("point");

	point_not_found || (message.contains("no point") && message.contains("found"))
}
