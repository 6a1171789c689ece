//! Analytics events, the audit log and the read views built on them.

use serde::Serialize;
use serde_json::Value;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{BenefitsService, Error, Result, access};
use benefits_domain::access::UserContext;
use benefits_storage::{
	models::{AuditEntry, BenefitPlan},
	telemetry::{self, NewAuditEntry},
	tenancy,
};

pub const DEFAULT_SUMMARY_DAYS: u32 = 30;
pub const MAX_SUMMARY_DAYS: u32 = 365;
pub const DEFAULT_AUDIT_LIMIT: u32 = 100;
pub const MAX_AUDIT_LIMIT: u32 = 500;

pub struct AuditRecord<'a> {
	pub company_id: Option<Uuid>,
	pub actor_id: Option<Uuid>,
	pub action: &'a str,
	pub resource_type: &'a str,
	pub resource_id: Option<String>,
	pub detail: Value,
}

#[derive(Clone, Debug, Serialize)]
pub struct EventCountView {
	pub event_type: String,
	pub count: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct ModelUsageView {
	pub model: String,
	pub requests: i64,
	pub prompt_tokens: i64,
	pub completion_tokens: i64,
	pub cost_usd: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct AnalyticsSummary {
	pub company_id: Uuid,
	pub days: u32,
	#[serde(with = "time::serde::rfc3339")]
	pub since: OffsetDateTime,
	pub events: Vec<EventCountView>,
	pub models: Vec<ModelUsageView>,
	pub total_requests: i64,
	pub total_cost_usd: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct AuditEntryView {
	pub audit_id: Uuid,
	pub company_id: Option<Uuid>,
	pub actor_id: Option<Uuid>,
	pub action: String,
	pub resource_type: String,
	pub resource_id: Option<String>,
	pub detail: Value,
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
}
impl From<AuditEntry> for AuditEntryView {
	fn from(entry: AuditEntry) -> Self {
		Self {
			audit_id: entry.audit_id,
			company_id: entry.company_id,
			actor_id: entry.actor_id,
			action: entry.action,
			resource_type: entry.resource_type,
			resource_id: entry.resource_id,
			detail: entry.detail,
			created_at: entry.created_at,
		}
	}
}

#[derive(Clone, Debug, Serialize)]
pub struct BenefitPlanView {
	pub plan_id: Uuid,
	pub name: String,
	pub plan_type: String,
	pub description: String,
}
impl From<BenefitPlan> for BenefitPlanView {
	fn from(plan: BenefitPlan) -> Self {
		Self {
			plan_id: plan.plan_id,
			name: plan.name,
			plan_type: plan.plan_type,
			description: plan.description,
		}
	}
}

impl BenefitsService {
	/// Best effort. A failed insert is logged and swallowed.
	pub async fn record_event(
		&self,
		company_id: Uuid,
		user_id: Option<Uuid>,
		event_type: &str,
		payload: Value,
	) {
		let now = OffsetDateTime::now_utc();

		if let Err(err) =
			telemetry::insert_event(&self.db.pool, company_id, user_id, event_type, &payload, now)
				.await
		{
			tracing::warn!(
				error = %err,
				company_id = %company_id,
				event_type,
				"Failed to record analytics event."
			);
		}
	}

	/// Best effort. A failed insert is logged and swallowed.
	pub async fn record_audit(&self, record: AuditRecord<'_>) {
		let entry = NewAuditEntry {
			company_id: record.company_id,
			actor_id: record.actor_id,
			action: record.action,
			resource_type: record.resource_type,
			resource_id: record.resource_id.as_deref(),
			detail: &record.detail,
		};

		if let Err(err) =
			telemetry::insert_audit(&self.db.pool, &entry, OffsetDateTime::now_utc()).await
		{
			tracing::warn!(error = %err, action = record.action, "Failed to record audit entry.");
		}
	}

	pub async fn analytics_summary(
		&self,
		user: &UserContext,
		company_id: Option<Uuid>,
		days: Option<u32>,
	) -> Result<AnalyticsSummary> {
		access::require_analytics_viewer(user)?;

		let company_id = access::company_scope(user, company_id)?;
		let days = days.unwrap_or(DEFAULT_SUMMARY_DAYS);

		if !(1..=MAX_SUMMARY_DAYS).contains(&days) {
			return Err(Error::InvalidRequest {
				message: format!("days must be between 1 and {MAX_SUMMARY_DAYS}."),
			});
		}

		let since = OffsetDateTime::now_utc() - Duration::days(i64::from(days));
		let events = telemetry::event_counts(&self.db.pool, company_id, since).await?;
		let models = telemetry::usage_totals(&self.db.pool, company_id, since).await?;
		let total_requests = models.iter().map(|row| row.requests).sum();
		let total_cost_usd = models.iter().map(|row| row.cost_usd).sum();

		Ok(AnalyticsSummary {
			company_id,
			days,
			since,
			events: events
				.into_iter()
				.map(|row| EventCountView { event_type: row.event_type, count: row.count })
				.collect(),
			models: models
				.into_iter()
				.map(|row| ModelUsageView {
					model: row.model,
					requests: row.requests,
					prompt_tokens: row.prompt_tokens,
					completion_tokens: row.completion_tokens,
					cost_usd: row.cost_usd,
				})
				.collect(),
			total_requests,
			total_cost_usd,
		})
	}

	/// Newest entries first.
	pub async fn audit_log(
		&self,
		user: &UserContext,
		company_id: Option<Uuid>,
		limit: Option<u32>,
	) -> Result<Vec<AuditEntryView>> {
		access::require_analytics_viewer(user)?;

		let company_id = access::company_scope(user, company_id)?;
		let limit = limit.unwrap_or(DEFAULT_AUDIT_LIMIT);

		if !(1..=MAX_AUDIT_LIMIT).contains(&limit) {
			return Err(Error::InvalidRequest {
				message: format!("limit must be between 1 and {MAX_AUDIT_LIMIT}."),
			});
		}

		let entries = telemetry::list_audit(&self.db.pool, company_id, i64::from(limit)).await?;

		Ok(entries.into_iter().map(AuditEntryView::from).collect())
	}

	pub async fn benefit_plans(
		&self,
		user: &UserContext,
		company_id: Option<Uuid>,
	) -> Result<Vec<BenefitPlanView>> {
		let company_id = access::company_scope(user, company_id)?;
		let plans = tenancy::list_active_plans(&self.db.pool, company_id).await?;

		Ok(plans.into_iter().map(BenefitPlanView::from).collect())
	}
}
