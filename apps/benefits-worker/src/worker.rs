use std::time::Duration as StdDuration;

use time::{Duration, OffsetDateTime};
use tokio::time as tokio_time;
use uuid::Uuid;

use crate::{Error, Result};
use benefits_chunking::{Chunk, ChunkingConfig};
use benefits_config::{Config, EmbeddingProviderConfig};
use benefits_extract::DocumentKind;
use benefits_providers::embedding;
use benefits_storage::{
	db::Db,
	documents::{self, NewChunk},
	models::{DocumentContent, IngestOutboxEntry},
	outbox,
	qdrant::{ChunkPoint, QdrantStore},
};

const POLL_INTERVAL_MS: i64 = 500;
const CLAIM_LEASE_SECONDS: i64 = 30;
const BASE_BACKOFF_MS: i64 = 500;
const MAX_BACKOFF_MS: i64 = 30_000;
const MAX_OUTBOX_ERROR_CHARS: usize = 1_024;
const REDACTED: &str = "[REDACTED]";
const SECRET_KEYS: [&str; 5] = ["api_key", "apikey", "password", "secret", "token"];
const VALUE_DELIMITERS: [char; 8] = ['&', ';', ',', ')', ']', '}', '"', '\''];

struct ChunkRecord {
	chunk_id: Uuid,
	chunk_index: i32,
	start_offset: i32,
	end_offset: i32,
	text: String,
	chunk_hash: String,
}

pub struct WorkerState {
	pub db: Db,
	pub qdrant: QdrantStore,
	pub embedding: EmbeddingProviderConfig,
	pub chunking: ChunkingConfig,
	pub embed_batch_size: usize,
	pub max_attempts: i32,
}
impl WorkerState {
	pub fn from_config(cfg: Config, db: Db, qdrant: QdrantStore) -> Self {
		Self {
			db,
			qdrant,
			embedding: cfg.providers.embedding,
			chunking: ChunkingConfig {
				chunk_chars: cfg.chunking.chunk_chars,
				overlap_chars: cfg.chunking.overlap_chars,
			},
			embed_batch_size: cfg.ingestion.embed_batch_size as usize,
			max_attempts: i32::try_from(cfg.ingestion.max_attempts).unwrap_or(i32::MAX),
		}
	}
}

pub async fn run_worker(state: WorkerState) -> Result<()> {
	loop {
		if let Err(err) = process_outbox_once(&state).await {
			tracing::error!(error = %err, "Ingestion outbox processing failed.");
		}

		tokio_time::sleep(to_std_duration(Duration::milliseconds(POLL_INTERVAL_MS))).await;
	}
}

/// Claims and runs at most one job. Returns whether a job was claimed.
pub async fn process_outbox_once(state: &WorkerState) -> Result<bool> {
	let now = OffsetDateTime::now_utc();
	let Some(job) = outbox::claim_next(&state.db, now, CLAIM_LEASE_SECONDS).await? else {
		return Ok(false);
	};
	let result = match job.op.as_str() {
		outbox::OP_INDEX => handle_index(state, &job).await,
		outbox::OP_DELETE => handle_delete(state, &job).await,
		other => Err(Error::UnsupportedOp(other.to_string())),
	};

	match result {
		Ok(()) => {
			outbox::mark_done(&state.db.pool, job.outbox_id, OffsetDateTime::now_utc()).await?;
		},
		Err(err) => record_failure(state, &job, &err).await?,
	}

	Ok(true)
}

async fn handle_index(state: &WorkerState, job: &IngestOutboxEntry) -> Result<()> {
	let doc = documents::load_document_content(&state.db.pool, job.document_id).await?;
	let Some(doc) = doc else {
		tracing::info!(
			document_id = %job.document_id,
			"Document missing for outbox job. Marking done."
		);

		return Ok(());
	};

	if doc.status == documents::STATUS_DELETED {
		tracing::info!(document_id = %doc.document_id, "Document deleted. Skipping index.");

		return Ok(());
	}

	let now = OffsetDateTime::now_utc();

	if !documents::mark_document_processing(&state.db.pool, doc.document_id, now).await? {
		return Ok(());
	}

	let records = extract_and_chunk(state, &doc)?;
	let vectors = embed_records(state, &records).await?;
	let now = OffsetDateTime::now_utc();
	let new_chunks = records
		.iter()
		.map(|record| NewChunk {
			chunk_id: record.chunk_id,
			chunk_index: record.chunk_index,
			start_offset: record.start_offset,
			end_offset: record.end_offset,
			text: &record.text,
			chunk_hash: &record.chunk_hash,
		})
		.collect::<Vec<_>>();
	let mut tx = state.db.pool.begin().await?;

	documents::replace_chunks(&mut *tx, doc.document_id, &new_chunks, now).await?;
	tx.commit().await?;

	let points = records
		.iter()
		.zip(vectors)
		.map(|(record, vector)| ChunkPoint {
			chunk_id: record.chunk_id,
			company_id: doc.company_id,
			document_id: doc.document_id,
			chunk_index: record.chunk_index,
			title: doc.title.clone(),
			text: record.text.clone(),
			vector,
		})
		.collect::<Vec<_>>();

	state.qdrant.delete_document_points(doc.document_id).await?;
	state.qdrant.upsert_chunks(&points).await?;

	let chunk_count = to_i32(records.len(), "chunk count")?;
	let now = OffsetDateTime::now_utc();
	let marked =
		documents::mark_document_ready(&state.db.pool, doc.document_id, chunk_count, now).await?;

	if !marked {
		tracing::info!(
			document_id = %doc.document_id,
			"Document deleted while indexing. Removing its chunks."
		);
		documents::delete_chunks(&state.db.pool, doc.document_id).await?;
		state.qdrant.delete_document_points(doc.document_id).await?;

		return Ok(());
	}

	tracing::info!(
		company_id = %doc.company_id,
		document_id = %doc.document_id,
		chunks = chunk_count,
		"Document indexed."
	);

	Ok(())
}

async fn handle_delete(state: &WorkerState, job: &IngestOutboxEntry) -> Result<()> {
	state.qdrant.delete_document_points(job.document_id).await?;

	tracing::info!(document_id = %job.document_id, "Document points removed.");

	Ok(())
}

fn extract_and_chunk(state: &WorkerState, doc: &DocumentContent) -> Result<Vec<ChunkRecord>> {
	let kind = DocumentKind::parse(&doc.kind).ok_or_else(|| {
		benefits_extract::Error::UnsupportedType { file_name: doc.title.clone() }
	})?;
	let text = benefits_extract::extract_text(kind, &doc.content)?;
	let chunks = benefits_chunking::split_text(&text, &state.chunking);

	if chunks.is_empty() {
		return Err(Error::NoChunks);
	}

	build_chunk_records(doc.document_id, &chunks)
}

async fn embed_records(state: &WorkerState, records: &[ChunkRecord]) -> Result<Vec<Vec<f32>>> {
	let mut vectors = Vec::with_capacity(records.len());

	for batch in records.chunks(state.embed_batch_size.max(1)) {
		let texts = batch.iter().map(|record| record.text.clone()).collect::<Vec<_>>();
		let batch_vectors = embedding::embed(&state.embedding, &texts).await?;

		if batch_vectors.len() != texts.len() {
			return Err(Error::Validation(format!(
				"Embedding provider returned {} vectors for {} chunks.",
				batch_vectors.len(),
				texts.len()
			)));
		}

		for vector in &batch_vectors {
			validate_vector_dim(vector, state.qdrant.vector_dim)?;
		}

		vectors.extend(batch_vectors);
	}

	Ok(vectors)
}

async fn record_failure(state: &WorkerState, job: &IngestOutboxEntry, err: &Error) -> Result<()> {
	let now = OffsetDateTime::now_utc();
	let error_text = sanitize_outbox_error(&err.to_string());
	let is_index = job.op == outbox::OP_INDEX;

	if err.is_permanent() {
		tracing::warn!(
			error = %error_text,
			outbox_id = %job.outbox_id,
			document_id = %job.document_id,
			"Outbox job failed permanently."
		);

		if is_index {
			documents::mark_document_failed(&state.db.pool, job.document_id, &error_text, now).await?;
		}

		outbox::mark_done(&state.db.pool, job.outbox_id, now).await?;

		return Ok(());
	}

	let attempts = job.attempts.saturating_add(1);

	if attempts >= state.max_attempts {
		outbox::mark_dead(&state.db.pool, job.outbox_id, attempts, &error_text, now).await?;

		if is_index {
			documents::mark_document_failed(&state.db.pool, job.document_id, &error_text, now).await?;
		}

		tracing::error!(
			error = %error_text,
			outbox_id = %job.outbox_id,
			attempts,
			"Outbox job ran out of attempts."
		);

		return Ok(());
	}

	let available_at = now + backoff_for_attempt(attempts);

	outbox::mark_failed(&state.db.pool, job.outbox_id, attempts, &error_text, available_at, now)
		.await?;

	tracing::error!(error = %error_text, outbox_id = %job.outbox_id, attempts, "Outbox job failed.");

	Ok(())
}

fn build_chunk_records(document_id: Uuid, chunks: &[Chunk]) -> Result<Vec<ChunkRecord>> {
	let mut records = Vec::with_capacity(chunks.len());

	for chunk in chunks {
		records.push(ChunkRecord {
			chunk_id: chunk_id_for(document_id, chunk.chunk_index),
			chunk_index: chunk.chunk_index,
			start_offset: to_i32(chunk.start_offset, "start offset")?,
			end_offset: to_i32(chunk.end_offset, "end offset")?,
			text: chunk.text.clone(),
			chunk_hash: blake3::hash(chunk.text.as_bytes()).to_hex().to_string(),
		});
	}

	Ok(records)
}

/// Stable per document and position, so re-indexing overwrites the same points.
fn chunk_id_for(document_id: Uuid, chunk_index: i32) -> Uuid {
	let name = format!("{document_id}:{chunk_index}");

	Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}

fn to_i32(value: usize, label: &str) -> Result<i32> {
	i32::try_from(value)
		.map_err(|_| Error::Validation(format!("Chunk {label} {value} exceeds supported range.")))
}

fn validate_vector_dim(vector: &[f32], expected_dim: u32) -> Result<()> {
	if vector.len() != expected_dim as usize {
		return Err(Error::Validation(format!(
			"Embedding dimension {} does not match configured vector_dim {}.",
			vector.len(),
			expected_dim
		)));
	}

	Ok(())
}

fn sanitize_outbox_error(text: &str) -> String {
	let mut words = Vec::new();
	let mut redact_next = false;

	for word in text.split_whitespace() {
		if redact_next {
			words.push(REDACTED.to_string());
			redact_next = false;

			continue;
		}

		let (redacted, dangling_key) = redact_secret_pairs(word);

		redact_next = dangling_key || word.eq_ignore_ascii_case("bearer");

		words.push(redacted);
	}

	let joined = words.join(" ");

	if joined.chars().count() <= MAX_OUTBOX_ERROR_CHARS {
		return joined;
	}

	let mut out = joined.chars().take(MAX_OUTBOX_ERROR_CHARS).collect::<String>();

	out.push_str("...");

	out
}

/// Redacts every `key=value` or `key:value` segment of `word` whose key names a secret, including
/// query parameters inside URLs. The flag is set when the word ends with such a key and the
/// value is the next word.
fn redact_secret_pairs(word: &str) -> (String, bool) {
	let mut out = String::with_capacity(word.len());
	let mut rest = word;
	let mut dangling_key = false;

	while let Some(split) = rest.find(['=', ':']) {
		let (head, tail) = rest.split_at(split + 1);

		out.push_str(head);

		rest = tail;
		dangling_key = false;

		if !is_secret_key(&head[..split]) {
			continue;
		}

		let unquoted = rest.trim_start_matches(['"', '\'']);

		out.push_str(&rest[..rest.len() - unquoted.len()]);

		rest = unquoted;

		let end = rest.find(VALUE_DELIMITERS).unwrap_or(rest.len());

		if end == 0 {
			dangling_key = rest.is_empty();

			continue;
		}

		out.push_str(REDACTED);

		rest = &rest[end..];
	}

	out.push_str(rest);

	(out, dangling_key)
}

/// Looks at the identifier right before a separator, so `url?api_key` reads as `api_key`.
fn is_secret_key(prefix: &str) -> bool {
	let trimmed = prefix.trim_end_matches(['"', '\'']);
	let start = trimmed
		.char_indices()
		.rev()
		.find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
		.map(|(idx, c)| idx + c.len_utf8())
		.unwrap_or(0);
	let key = trimmed[start..].to_ascii_lowercase();

	!key.is_empty() && SECRET_KEYS.iter().any(|secret| key.contains(secret))
}

fn backoff_for_attempt(attempt: i32) -> Duration {
	let exp = attempt.max(1).saturating_sub(1).min(6) as u32;
	let delay = BASE_BACKOFF_MS.saturating_mul(1_i64 << exp);

	Duration::milliseconds(delay.min(MAX_BACKOFF_MS))
}

fn to_std_duration(duration: Duration) -> StdDuration {
	let millis = duration.whole_milliseconds();

	if millis <= 0 {
		return StdDuration::from_millis(0);
	}

	StdDuration::from_millis(millis as u64)
}
