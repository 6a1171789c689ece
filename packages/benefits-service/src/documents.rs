//! Document upload and lifecycle. Indexing itself happens in the worker through the outbox.

use std::path::Path;

use serde::Serialize;
use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{AuditRecord, BenefitsService, Error, Result, access};
use benefits_domain::access::UserContext;
use benefits_storage::{
	documents::{self, NewDocument},
	models::Document,
	outbox,
};

const MAX_TITLE_CHARS: usize = 200;

#[derive(Clone, Debug)]
pub struct UploadRequest {
	pub company_id: Option<Uuid>,
	pub title: Option<String>,
	pub file_name: String,
	pub content_type: Option<String>,
	pub bytes: Vec<u8>,
}

#[derive(Clone, Debug, Serialize)]
pub struct DocumentView {
	pub document_id: Uuid,
	pub company_id: Uuid,
	pub uploaded_by: Uuid,
	pub title: String,
	pub file_name: String,
	pub content_type: Option<String>,
	pub kind: String,
	pub content_bytes: i64,
	pub content_hash: String,
	pub status: String,
	pub chunk_count: i32,
	pub last_error: Option<String>,
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
	#[serde(with = "time::serde::rfc3339")]
	pub updated_at: OffsetDateTime,
	#[serde(with = "time::serde::rfc3339::option")]
	pub indexed_at: Option<OffsetDateTime>,
}
impl From<Document> for DocumentView {
	fn from(doc: Document) -> Self {
		Self {
			document_id: doc.document_id,
			company_id: doc.company_id,
			uploaded_by: doc.uploaded_by,
			title: doc.title,
			file_name: doc.file_name,
			content_type: doc.content_type,
			kind: doc.kind,
			content_bytes: doc.content_bytes,
			content_hash: doc.content_hash,
			status: doc.status,
			chunk_count: doc.chunk_count,
			last_error: doc.last_error,
			created_at: doc.created_at,
			updated_at: doc.updated_at,
			indexed_at: doc.indexed_at,
		}
	}
}

#[derive(Clone, Debug, Serialize)]
pub struct UploadResponse {
	pub document: DocumentView,
	/// The same content was already live for this company; nothing new was stored.
	pub duplicate: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct DocumentAction {
	pub document_id: Uuid,
	pub status: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct RebuildReport {
	pub enqueued: u64,
}

impl BenefitsService {
	pub async fn upload_document(
		&self,
		user: &UserContext,
		req: UploadRequest,
	) -> Result<UploadResponse> {
		access::require_document_manager(user)?;

		let company_id = access::company_scope(user, req.company_id)?;
		let file_name = req.file_name.trim();

		if file_name.is_empty() {
			return Err(Error::InvalidRequest { message: "file_name is required.".to_string() });
		}
		if req.bytes.is_empty() {
			return Err(Error::InvalidRequest { message: "Document body is empty.".to_string() });
		}

		let max_bytes = self.cfg.ingestion.max_document_bytes;

		if req.bytes.len() as u64 > max_bytes {
			return Err(Error::PayloadTooLarge {
				message: format!("Document exceeds the {max_bytes} byte limit."),
			});
		}

		let content_type = req.content_type.as_deref().map(str::trim).filter(|v| !v.is_empty());
		let kind = benefits_extract::detect_kind(content_type, file_name)?;
		let content_hash = blake3::hash(&req.bytes).to_hex().to_string();

		if let Some(existing) =
			documents::find_live_by_hash(&self.db.pool, company_id, &content_hash).await?
		{
			tracing::info!(
				company_id = %company_id,
				document_id = %existing.document_id,
				"Upload matches a live document."
			);

			return Ok(UploadResponse { document: existing.into(), duplicate: true });
		}

		let title = document_title(req.title.as_deref(), file_name);
		let document_id = Uuid::new_v4();
		let now = OffsetDateTime::now_utc();
		let new_doc = NewDocument {
			document_id,
			company_id,
			uploaded_by: user.user_id,
			title: &title,
			file_name,
			content_type,
			kind: kind.as_str(),
			content: &req.bytes,
			content_hash: &content_hash,
		};
		let mut tx = self.db.pool.begin().await?;
		let inserted = documents::insert_document(&mut *tx, &new_doc, now).await;

		match inserted {
			Ok(()) => {},
			Err(benefits_storage::Error::Conflict { .. }) => {
				// A concurrent upload of the same bytes won the race.
				drop(tx);

				let existing =
					documents::find_live_by_hash(&self.db.pool, company_id, &content_hash)
						.await?
						.ok_or_else(|| Error::Conflict {
							message: "Document was uploaded concurrently.".to_string(),
						})?;

				return Ok(UploadResponse { document: existing.into(), duplicate: true });
			},
			Err(err) => return Err(err.into()),
		}

		outbox::enqueue(&mut *tx, document_id, outbox::OP_INDEX, now).await?;
		tx.commit().await?;

		tracing::info!(
			company_id = %company_id,
			document_id = %document_id,
			kind = kind.as_str(),
			bytes = req.bytes.len(),
			"Document uploaded and queued for indexing."
		);

		self.record_audit(AuditRecord {
			company_id: Some(company_id),
			actor_id: Some(user.user_id),
			action: "document.upload",
			resource_type: "document",
			resource_id: Some(document_id.to_string()),
			detail: json!({ "title": title, "file_name": file_name, "kind": kind.as_str() }),
		})
		.await;
		self.record_event(
			company_id,
			Some(user.user_id),
			"document_uploaded",
			json!({ "document_id": document_id, "kind": kind.as_str(), "bytes": req.bytes.len() }),
		)
		.await;

		let document = self.find_document(company_id, document_id).await?;

		Ok(UploadResponse { document: document.into(), duplicate: false })
	}

	pub async fn list_documents(
		&self,
		user: &UserContext,
		company_id: Option<Uuid>,
	) -> Result<Vec<DocumentView>> {
		let company_id = access::company_scope(user, company_id)?;
		let docs = documents::list_documents(&self.db.pool, company_id).await?;

		Ok(docs.into_iter().map(DocumentView::from).collect())
	}

	pub async fn get_document(
		&self,
		user: &UserContext,
		company_id: Option<Uuid>,
		document_id: Uuid,
	) -> Result<DocumentView> {
		let company_id = access::company_scope(user, company_id)?;

		Ok(self.find_document(company_id, document_id).await?.into())
	}

	/// Hides the document, drops its chunks and queues removal of its vectors.
	pub async fn delete_document(
		&self,
		user: &UserContext,
		company_id: Option<Uuid>,
		document_id: Uuid,
	) -> Result<DocumentAction> {
		access::require_document_manager(user)?;

		let company_id = access::company_scope(user, company_id)?;
		let doc = self.find_document(company_id, document_id).await?;
		let now = OffsetDateTime::now_utc();
		let mut tx = self.db.pool.begin().await?;

		documents::set_document_status(&mut *tx, document_id, documents::STATUS_DELETED, None, now)
			.await?;
		documents::delete_chunks(&mut *tx, document_id).await?;
		outbox::enqueue(&mut *tx, document_id, outbox::OP_DELETE, now).await?;
		tx.commit().await?;

		tracing::info!(company_id = %company_id, document_id = %document_id, "Document deleted.");

		self.record_audit(AuditRecord {
			company_id: Some(company_id),
			actor_id: Some(user.user_id),
			action: "document.delete",
			resource_type: "document",
			resource_id: Some(document_id.to_string()),
			detail: json!({ "title": doc.title }),
		})
		.await;
		self.record_event(
			company_id,
			Some(user.user_id),
			"document_deleted",
			json!({ "document_id": document_id }),
		)
		.await;

		Ok(DocumentAction { document_id, status: documents::STATUS_DELETED.to_string() })
	}

	pub async fn reindex_document(
		&self,
		user: &UserContext,
		company_id: Option<Uuid>,
		document_id: Uuid,
	) -> Result<DocumentAction> {
		access::require_document_manager(user)?;

		let company_id = access::company_scope(user, company_id)?;

		self.find_document(company_id, document_id).await?;

		let now = OffsetDateTime::now_utc();
		let mut tx = self.db.pool.begin().await?;

		documents::set_document_status(&mut *tx, document_id, documents::STATUS_PENDING, None, now)
			.await?;
		outbox::enqueue(&mut *tx, document_id, outbox::OP_INDEX, now).await?;
		tx.commit().await?;

		self.record_audit(AuditRecord {
			company_id: Some(company_id),
			actor_id: Some(user.user_id),
			action: "document.reindex",
			resource_type: "document",
			resource_id: Some(document_id.to_string()),
			detail: json!({}),
		})
		.await;

		Ok(DocumentAction { document_id, status: documents::STATUS_PENDING.to_string() })
	}

	/// Queues every indexed or failed document, across all companies, for indexing again.
	pub async fn rebuild_index(&self) -> Result<RebuildReport> {
		let now = OffsetDateTime::now_utc();
		let mut tx = self.db.pool.begin().await?;
		let ids = documents::mark_indexed_documents_pending(&mut *tx, now).await?;

		for document_id in &ids {
			outbox::enqueue(&mut *tx, *document_id, outbox::OP_INDEX, now).await?;
		}

		tx.commit().await?;

		let enqueued = ids.len() as u64;

		tracing::info!(enqueued, "Index rebuild queued.");

		self.record_audit(AuditRecord {
			company_id: None,
			actor_id: None,
			action: "index.rebuild",
			resource_type: "index",
			resource_id: None,
			detail: json!({ "enqueued": enqueued }),
		})
		.await;

		Ok(RebuildReport { enqueued })
	}

	async fn find_document(&self, company_id: Uuid, document_id: Uuid) -> Result<Document> {
		documents::get_document(&self.db.pool, company_id, document_id)
			.await?
			.ok_or_else(|| Error::NotFound { message: "Document not found.".to_string() })
	}
}

/// The explicit title, or the file name without its extension.
fn document_title(title: Option<&str>, file_name: &str) -> String {
	let raw = title
		.map(str::trim)
		.filter(|title| !title.is_empty())
		.or_else(|| Path::new(file_name).file_stem().and_then(|stem| stem.to_str()))
		.unwrap_or(file_name);

	raw.chars().take(MAX_TITLE_CHARS).collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn title_falls_back_to_file_stem() {
		assert_eq!(document_title(None, "Dental Plan 2026.pdf"), "Dental Plan 2026");
		assert_eq!(document_title(Some("  "), "faq.md"), "faq");
		assert_eq!(document_title(Some(" Vision Guide "), "v.pdf"), "Vision Guide");
	}

	#[test]
	fn titles_are_capped() {
		let long = "x".repeat(500);

		assert_eq!(document_title(Some(&long), "a.txt").chars().count(), MAX_TITLE_CHARS);
	}
}
