use sqlx::{PgConnection, PgExecutor};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	Error, Result,
	models::{Document, DocumentChunk, DocumentContent},
};

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_PROCESSING: &str = "processing";
pub const STATUS_READY: &str = "ready";
pub const STATUS_FAILED: &str = "failed";
pub const STATUS_DELETED: &str = "deleted";

const DOCUMENT_COLUMNS: &str = "\
document_id, company_id, uploaded_by, title, file_name, content_type, kind, content_bytes, \
content_hash, status, chunk_count, last_error, created_at, updated_at, indexed_at";

pub struct NewDocument<'a> {
	pub document_id: Uuid,
	pub company_id: Uuid,
	pub uploaded_by: Uuid,
	pub title: &'a str,
	pub file_name: &'a str,
	pub content_type: Option<&'a str>,
	pub kind: &'a str,
	pub content: &'a [u8],
	pub content_hash: &'a str,
}

pub struct NewChunk<'a> {
	pub chunk_id: Uuid,
	pub chunk_index: i32,
	pub start_offset: i32,
	pub end_offset: i32,
	pub text: &'a str,
	pub chunk_hash: &'a str,
}

pub async fn insert_document<'e, E>(executor: E, doc: &NewDocument<'_>, now: OffsetDateTime) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO documents (
	document_id,
	company_id,
	uploaded_by,
	title,
	file_name,
	content_type,
	kind,
	content,
	content_bytes,
	content_hash,
	status,
	created_at,
	updated_at
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'pending', $11, $11)",
	)
	.bind(doc.document_id)
	.bind(doc.company_id)
	.bind(doc.uploaded_by)
	.bind(doc.title)
	.bind(doc.file_name)
	.bind(doc.content_type)
	.bind(doc.kind)
	.bind(doc.content)
	.bind(doc.content.len() as i64)
	.bind(doc.content_hash)
	.bind(now)
	.execute(executor)
	.await
	.map_err(|err| match &err {
		sqlx::Error::Database(db_err) if db_err.is_unique_violation() => Error::Conflict {
			message: "A live document with the same content already exists.".to_string(),
		},
		_ => Error::Sqlx(err),
	})?;

	Ok(())
}

/// A live (not deleted) document of the company with the same content hash.
pub async fn find_live_by_hash<'e, E>(
	executor: E,
	company_id: Uuid,
	content_hash: &str,
) -> Result<Option<Document>>
where
	E: PgExecutor<'e>,
{
	let sql = format!(
		"SELECT {DOCUMENT_COLUMNS} FROM documents \
		WHERE company_id = $1 AND content_hash = $2 AND status <> 'deleted'"
	);
	let doc = sqlx::query_as::<_, Document>(&sql)
		.bind(company_id)
		.bind(content_hash)
		.fetch_optional(executor)
		.await?;

	Ok(doc)
}

/// A live document of the company; deleted documents are hidden.
pub async fn get_document<'e, E>(
	executor: E,
	company_id: Uuid,
	document_id: Uuid,
) -> Result<Option<Document>>
where
	E: PgExecutor<'e>,
{
	let sql = format!(
		"SELECT {DOCUMENT_COLUMNS} FROM documents \
		WHERE company_id = $1 AND document_id = $2 AND status <> 'deleted'"
	);
	let doc = sqlx::query_as::<_, Document>(&sql)
		.bind(company_id)
		.bind(document_id)
		.fetch_optional(executor)
		.await?;

	Ok(doc)
}

pub async fn list_documents<'e, E>(executor: E, company_id: Uuid) -> Result<Vec<Document>>
where
	E: PgExecutor<'e>,
{
	let sql = format!(
		"SELECT {DOCUMENT_COLUMNS} FROM documents \
		WHERE company_id = $1 AND status <> 'deleted' \
		ORDER BY created_at DESC"
	);
	let docs = sqlx::query_as::<_, Document>(&sql).bind(company_id).fetch_all(executor).await?;

	Ok(docs)
}

/// Loads the stored body for indexing, whatever the document status.
pub async fn load_document_content<'e, E>(
	executor: E,
	document_id: Uuid,
) -> Result<Option<DocumentContent>>
where
	E: PgExecutor<'e>,
{
	let doc = sqlx::query_as::<_, DocumentContent>(
		"\
SELECT document_id, company_id, title, kind, status, content
FROM documents
WHERE document_id = $1",
	)
	.bind(document_id)
	.fetch_optional(executor)
	.await?;

	Ok(doc)
}

pub async fn set_document_status<'e, E>(
	executor: E,
	document_id: Uuid,
	status: &str,
	last_error: Option<&str>,
	now: OffsetDateTime,
) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
UPDATE documents
SET status = $1, last_error = $2, updated_at = $3
WHERE document_id = $4",
	)
	.bind(status)
	.bind(last_error)
	.bind(now)
	.bind(document_id)
	.execute(executor)
	.await?;

	Ok(())
}

/// Marks a document ready unless it was deleted while indexing.
pub async fn mark_document_ready<'e, E>(
	executor: E,
	document_id: Uuid,
	chunk_count: i32,
	now: OffsetDateTime,
) -> Result<bool>
where
	E: PgExecutor<'e>,
{
	let result = sqlx::query(
		"\
UPDATE documents
SET status = 'ready', chunk_count = $1, last_error = NULL, indexed_at = $2, updated_at = $2
WHERE document_id = $3 AND status <> 'deleted'",
	)
	.bind(chunk_count)
	.bind(now)
	.bind(document_id)
	.execute(executor)
	.await?;

	Ok(result.rows_affected() > 0)
}

pub async fn mark_document_processing<'e, E>(
	executor: E,
	document_id: Uuid,
	now: OffsetDateTime,
) -> Result<bool>
where
	E: PgExecutor<'e>,
{
	let result = sqlx::query(
		"\
UPDATE documents
SET status = 'processing', last_error = NULL, updated_at = $1
WHERE document_id = $2 AND status <> 'deleted'",
	)
	.bind(now)
	.bind(document_id)
	.execute(executor)
	.await?;

	Ok(result.rows_affected() > 0)
}

/// Records an indexing failure; deleted documents stay deleted.
pub async fn mark_document_failed<'e, E>(
	executor: E,
	document_id: Uuid,
	last_error: &str,
	now: OffsetDateTime,
) -> Result<bool>
where
	E: PgExecutor<'e>,
{
	let result = sqlx::query(
		"\
UPDATE documents
SET status = 'failed', last_error = $1, updated_at = $2
WHERE document_id = $3 AND status <> 'deleted'",
	)
	.bind(last_error)
	.bind(now)
	.bind(document_id)
	.execute(executor)
	.await?;

	Ok(result.rows_affected() > 0)
}

/// Moves every ready or failed document back to pending and returns their ids.
pub async fn mark_indexed_documents_pending<'e, E>(
	executor: E,
	now: OffsetDateTime,
) -> Result<Vec<Uuid>>
where
	E: PgExecutor<'e>,
{
	let ids = sqlx::query_scalar::<_, Uuid>(
		"\
UPDATE documents
SET status = 'pending', updated_at = $1
WHERE status IN ('ready', 'failed')
RETURNING document_id",
	)
	.bind(now)
	.fetch_all(executor)
	.await?;

	Ok(ids)
}

/// Replaces all chunks of a document. Run inside a transaction.
pub async fn replace_chunks(
	conn: &mut PgConnection,
	document_id: Uuid,
	chunks: &[NewChunk<'_>],
	now: OffsetDateTime,
) -> Result<()> {
	delete_chunks(&mut *conn, document_id).await?;

	for chunk in chunks {
		sqlx::query(
			"\
INSERT INTO document_chunks (
	chunk_id,
	document_id,
	chunk_index,
	start_offset,
	end_offset,
	chunk_text,
	chunk_hash,
	created_at
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
		)
		.bind(chunk.chunk_id)
		.bind(document_id)
		.bind(chunk.chunk_index)
		.bind(chunk.start_offset)
		.bind(chunk.end_offset)
		.bind(chunk.text)
		.bind(chunk.chunk_hash)
		.bind(now)
		.execute(&mut *conn)
		.await?;
	}

	Ok(())
}

pub async fn delete_chunks<'e, E>(executor: E, document_id: Uuid) -> Result<u64>
where
	E: PgExecutor<'e>,
{
	let result = sqlx::query("DELETE FROM document_chunks WHERE document_id = $1")
		.bind(document_id)
		.execute(executor)
		.await?;

	Ok(result.rows_affected())
}

pub async fn list_chunks<'e, E>(executor: E, document_id: Uuid) -> Result<Vec<DocumentChunk>>
where
	E: PgExecutor<'e>,
{
	let chunks = sqlx::query_as::<_, DocumentChunk>(
		"\
SELECT chunk_id, document_id, chunk_index, start_offset, end_offset, chunk_text, chunk_hash, created_at
FROM document_chunks
WHERE document_id = $1
ORDER BY chunk_index",
	)
	.bind(document_id)
	.fetch_all(executor)
	.await?;

	Ok(chunks)
}
