use serde_json::Value;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Company {
	pub company_id: Uuid,
	pub name: String,
	pub slug: String,
	pub status: String,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct User {
	pub user_id: Uuid,
	pub company_id: Option<Uuid>,
	pub email: String,
	pub display_name: String,
	pub role: String,
	pub active: bool,
	pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct BenefitPlan {
	pub plan_id: Uuid,
	pub company_id: Uuid,
	pub name: String,
	pub plan_type: String,
	pub description: String,
	pub active: bool,
	pub created_at: OffsetDateTime,
}

/// An enrollment joined with its plan.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct EnrollmentView {
	pub enrollment_id: Uuid,
	pub plan_id: Uuid,
	pub plan_name: String,
	pub plan_type: String,
	pub coverage_level: String,
	pub status: String,
	pub effective_date: Option<Date>,
}

/// Document metadata without the stored body.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Document {
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
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
	pub indexed_at: Option<OffsetDateTime>,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct DocumentContent {
	pub document_id: Uuid,
	pub company_id: Uuid,
	pub title: String,
	pub kind: String,
	pub status: String,
	pub content: Vec<u8>,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct DocumentChunk {
	pub chunk_id: Uuid,
	pub document_id: Uuid,
	pub chunk_index: i32,
	pub start_offset: i32,
	pub end_offset: i32,
	pub chunk_text: String,
	pub chunk_hash: String,
	pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct IngestOutboxEntry {
	pub outbox_id: Uuid,
	pub document_id: Uuid,
	pub op: String,
	pub status: String,
	pub attempts: i32,
	pub last_error: Option<String>,
	pub available_at: OffsetDateTime,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Conversation {
	pub conversation_id: Uuid,
	pub company_id: Uuid,
	pub user_id: Uuid,
	pub title: String,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Message {
	pub message_id: Uuid,
	pub conversation_id: Uuid,
	pub role: String,
	pub content: String,
	pub model: Option<String>,
	pub complexity: Option<String>,
	pub category: Option<String>,
	pub prompt_tokens: Option<i32>,
	pub completion_tokens: Option<i32>,
	pub cost_usd: Option<f64>,
	pub sources: Value,
	pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct EventCount {
	pub event_type: String,
	pub count: i64,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct ModelUsageTotal {
	pub model: String,
	pub requests: i64,
	pub prompt_tokens: i64,
	pub completion_tokens: i64,
	pub cost_usd: f64,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct AuditEntry {
	pub audit_id: Uuid,
	pub company_id: Option<Uuid>,
	pub actor_id: Option<Uuid>,
	pub action: String,
	pub resource_type: String,
	pub resource_id: Option<String>,
	pub detail: Value,
	pub created_at: OffsetDateTime,
}
