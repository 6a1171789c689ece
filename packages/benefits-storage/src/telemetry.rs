//! Usage rows, analytics events and the audit log.

use serde_json::Value;
use sqlx::PgExecutor;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	Result,
	models::{AuditEntry, EventCount, ModelUsageTotal},
};

pub struct NewLlmUsage<'a> {
	pub company_id: Uuid,
	pub user_id: Option<Uuid>,
	pub conversation_id: Option<Uuid>,
	pub model: &'a str,
	pub complexity: &'a str,
	pub category: &'a str,
	pub prompt_tokens: i32,
	pub completion_tokens: i32,
	pub cost_usd: f64,
	pub latency_ms: i64,
}

pub struct NewAuditEntry<'a> {
	pub company_id: Option<Uuid>,
	pub actor_id: Option<Uuid>,
	pub action: &'a str,
	pub resource_type: &'a str,
	pub resource_id: Option<&'a str>,
	pub detail: &'a Value,
}

pub async fn insert_llm_usage<'e, E>(
	executor: E,
	usage: &NewLlmUsage<'_>,
	now: OffsetDateTime,
) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO llm_usage (
	usage_id,
	company_id,
	user_id,
	conversation_id,
	model,
	complexity,
	category,
	prompt_tokens,
	completion_tokens,
	cost_usd,
	latency_ms,
	created_at
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
	)
	.bind(Uuid::new_v4())
	.bind(usage.company_id)
	.bind(usage.user_id)
	.bind(usage.conversation_id)
	.bind(usage.model)
	.bind(usage.complexity)
	.bind(usage.category)
	.bind(usage.prompt_tokens)
	.bind(usage.completion_tokens)
	.bind(usage.cost_usd)
	.bind(usage.latency_ms)
	.bind(now)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn insert_event<'e, E>(
	executor: E,
	company_id: Uuid,
	user_id: Option<Uuid>,
	event_type: &str,
	payload: &Value,
	now: OffsetDateTime,
) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO analytics_events (event_id, company_id, user_id, event_type, payload, created_at)
VALUES ($1, $2, $3, $4, $5, $6)",
	)
	.bind(Uuid::new_v4())
	.bind(company_id)
	.bind(user_id)
	.bind(event_type)
	.bind(payload)
	.bind(now)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn insert_audit<'e, E>(
	executor: E,
	entry: &NewAuditEntry<'_>,
	now: OffsetDateTime,
) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO audit_log (
	audit_id,
	company_id,
	actor_id,
	action,
	resource_type,
	resource_id,
	detail,
	created_at
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
	)
	.bind(Uuid::new_v4())
	.bind(entry.company_id)
	.bind(entry.actor_id)
	.bind(entry.action)
	.bind(entry.resource_type)
	.bind(entry.resource_id)
	.bind(entry.detail)
	.bind(now)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn event_counts<'e, E>(
	executor: E,
	company_id: Uuid,
	since: OffsetDateTime,
) -> Result<Vec<EventCount>>
where
	E: PgExecutor<'e>,
{
	let counts = sqlx::query_as::<_, EventCount>(
		"\
SELECT event_type, count(*) AS count
FROM analytics_events
WHERE company_id = $1 AND created_at >= $2
GROUP BY event_type
ORDER BY event_type",
	)
	.bind(company_id)
	.bind(since)
	.fetch_all(executor)
	.await?;

	Ok(counts)
}

pub async fn usage_totals<'e, E>(
	executor: E,
	company_id: Uuid,
	since: OffsetDateTime,
) -> Result<Vec<ModelUsageTotal>>
where
	E: PgExecutor<'e>,
{
	let totals = sqlx::query_as::<_, ModelUsageTotal>(
		"\
SELECT
	model,
	count(*) AS requests,
	COALESCE(sum(prompt_tokens), 0)::bigint AS prompt_tokens,
	COALESCE(sum(completion_tokens), 0)::bigint AS completion_tokens,
	COALESCE(sum(cost_usd), 0)::double precision AS cost_usd
FROM llm_usage
WHERE company_id = $1 AND created_at >= $2
GROUP BY model
ORDER BY model",
	)
	.bind(company_id)
	.bind(since)
	.fetch_all(executor)
	.await?;

	Ok(totals)
}

pub async fn list_audit<'e, E>(executor: E, company_id: Uuid, limit: i64) -> Result<Vec<AuditEntry>>
where
	E: PgExecutor<'e>,
{
	let entries = sqlx::query_as::<_, AuditEntry>(
		"\
SELECT audit_id, company_id, actor_id, action, resource_type, resource_id, detail, created_at
FROM audit_log
WHERE company_id = $1
ORDER BY created_at DESC, audit_id
LIMIT $2",
	)
	.bind(company_id)
	.bind(limit)
	.fetch_all(executor)
	.await?;

	Ok(entries)
}
