use std::sync::PoisonError;

use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{BenefitsService, Error, Result};
use benefits_domain::{
	pricing::UsageStats,
	router::{self, Classification, ClassificationSource, RouteDecision},
};
use benefits_storage::telemetry::{self, NewLlmUsage};

pub const MODE_HEURISTIC: &str = "heuristic";
pub const MODE_LLM_ASSISTED: &str = "llm_assisted";

#[derive(Clone, Debug, Deserialize)]
pub struct ClassifyRequest {
	pub query: String,
}

/// One answered chat turn, for the in-memory stats and the `llm_usage` table.
pub(crate) struct UsageRecord<'a> {
	pub(crate) company_id: Uuid,
	pub(crate) user_id: Uuid,
	pub(crate) conversation_id: Uuid,
	pub(crate) model: &'a str,
	pub(crate) classification: &'a Classification,
	pub(crate) prompt_tokens: u32,
	pub(crate) completion_tokens: u32,
	pub(crate) cost_usd: f64,
	pub(crate) latency_ms: i64,
}

impl BenefitsService {
	/// Classifies a query and picks the model that answers it.
	pub async fn route(&self, query: &str) -> RouteDecision {
		let mut classification = router::classify_heuristic(query);

		if self.cfg.router.mode == MODE_LLM_ASSISTED
			&& classification.confidence < self.cfg.router.llm_assist_below_confidence
		{
			self.assist_with_llm(query, &mut classification).await;
		}

		let model = self.routing.select(&classification).to_string();

		tracing::info!(
			model = %model,
			complexity = classification.complexity.as_str(),
			category = classification.category.as_str(),
			score = classification.score,
			confidence = classification.confidence,
			"Routed query."
		);

		RouteDecision { classification, model }
	}

	/// Admin dry run of the router. No chat call is made.
	pub async fn classify_query(&self, req: ClassifyRequest) -> Result<RouteDecision> {
		let query = req.query.trim();

		if query.is_empty() {
			return Err(Error::InvalidRequest { message: "query must not be empty.".to_string() });
		}

		Ok(self.route(query).await)
	}

	pub fn usage_stats(&self) -> UsageStats {
		self.usage.lock().unwrap_or_else(PoisonError::into_inner).clone()
	}

	pub(crate) async fn record_usage(&self, record: UsageRecord<'_>) {
		let complexity = record.classification.complexity;

		self.usage.lock().unwrap_or_else(PoisonError::into_inner).record(
			record.model,
			complexity,
			record.prompt_tokens,
			record.completion_tokens,
			record.cost_usd,
		);

		let row = NewLlmUsage {
			company_id: record.company_id,
			user_id: Some(record.user_id),
			conversation_id: Some(record.conversation_id),
			model: record.model,
			complexity: complexity.as_str(),
			category: record.classification.category.as_str(),
			prompt_tokens: clamp_tokens(record.prompt_tokens),
			completion_tokens: clamp_tokens(record.completion_tokens),
			cost_usd: record.cost_usd,
			latency_ms: record.latency_ms,
		};

		if let Err(err) =
			telemetry::insert_llm_usage(&self.db.pool, &row, OffsetDateTime::now_utc()).await
		{
			tracing::warn!(error = %err, model = record.model, "Failed to persist LLM usage.");
		}
	}

	async fn assist_with_llm(&self, query: &str, classification: &mut Classification) {
		let raw = match self.providers.classifier.classify(&self.cfg.providers.classifier, query).await
		{
			Ok(raw) => raw,
			Err(err) => {
				tracing::warn!(error = %err, "Classifier call failed. Keeping heuristic result.");

				return;
			},
		};
		let Some(complexity) = router::parse_llm_complexity(&raw) else {
			tracing::warn!(answer = %raw, "Classifier answer has no complexity label.");

			return;
		};

		classification.complexity = complexity;
		classification.source = ClassificationSource::Llm;
		classification.signals.push("llm_assisted".to_string());
	}
}

pub(crate) fn clamp_tokens(tokens: u32) -> i32 {
	i32::try_from(tokens).unwrap_or(i32::MAX)
}
