use std::collections::BTreeMap;

use serde::Serialize;

use crate::router::Complexity;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ModelPricing {
	pub id: String,
	pub input_cost_per_1k: f64,
	pub output_cost_per_1k: f64,
	pub max_output_tokens: u32,
}
impl ModelPricing {
	pub fn cost(&self, prompt_tokens: u32, completion_tokens: u32) -> f64 {
		(prompt_tokens as f64 / 1_000.0) * self.input_cost_per_1k
			+ (completion_tokens as f64 / 1_000.0) * self.output_cost_per_1k
	}
}
impl From<&benefits_config::RouterModel> for ModelPricing {
	fn from(model: &benefits_config::RouterModel) -> Self {
		Self {
			id: model.id.clone(),
			input_cost_per_1k: model.input_cost_per_1k,
			output_cost_per_1k: model.output_cost_per_1k,
			max_output_tokens: model.max_output_tokens,
		}
	}
}

#[derive(Clone, Debug, Default)]
pub struct ModelCatalog {
	models: BTreeMap<String, ModelPricing>,
}
impl ModelCatalog {
	pub fn from_config(models: &[benefits_config::RouterModel]) -> Self {
		Self {
			models: models.iter().map(|model| (model.id.clone(), ModelPricing::from(model))).collect(),
		}
	}

	pub fn get(&self, id: &str) -> Option<&ModelPricing> {
		self.models.get(id)
	}

	/// Unknown models are priced at zero.
	pub fn cost(&self, id: &str, prompt_tokens: u32, completion_tokens: u32) -> f64 {
		self.get(id).map(|pricing| pricing.cost(prompt_tokens, completion_tokens)).unwrap_or(0.0)
	}
}

/// Rough token count used when a provider does not report usage.
pub fn estimate_tokens(text: &str) -> u32 {
	let chars = text.chars().count();

	if chars == 0 {
		return 0;
	}

	chars.div_ceil(4).min(u32::MAX as usize) as u32
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ModelUsage {
	pub requests: u64,
	pub prompt_tokens: u64,
	pub completion_tokens: u64,
	pub cost_usd: f64,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct UsageStats {
	pub total_requests: u64,
	pub total_cost_usd: f64,
	pub by_model: BTreeMap<String, ModelUsage>,
	pub by_complexity: BTreeMap<Complexity, u64>,
}
impl UsageStats {
	pub fn record(
		&mut self,
		model: &str,
		complexity: Complexity,
		prompt_tokens: u32,
		completion_tokens: u32,
		cost_usd: f64,
	) {
		let entry = self.by_model.entry(model.to_string()).or_default();

		entry.requests += 1;
		entry.prompt_tokens += u64::from(prompt_tokens);
		entry.completion_tokens += u64::from(completion_tokens);
		entry.cost_usd += cost_usd;

		*self.by_complexity.entry(complexity).or_default() += 1;

		self.total_requests += 1;
		self.total_cost_usd += cost_usd;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn pricing() -> ModelPricing {
		ModelPricing {
			id: "gpt-4o".to_string(),
			input_cost_per_1k: 0.0025,
			output_cost_per_1k: 0.01,
			max_output_tokens: 1_024,
		}
	}

	#[test]
	fn cost_scales_per_thousand_tokens() {
		let cost = pricing().cost(2_000, 500);

		assert!((cost - 0.01).abs() < 1e-12, "{cost}");
	}

	#[test]
	fn unknown_models_cost_nothing() {
		let catalog = ModelCatalog::default();

		assert_eq!(catalog.cost("missing", 1_000, 1_000), 0.0);
	}

	#[test]
	fn token_estimate_rounds_up() {
		assert_eq!(estimate_tokens(""), 0);
		assert_eq!(estimate_tokens("a"), 1);
		assert_eq!(estimate_tokens("abcd"), 1);
		assert_eq!(estimate_tokens("abcde"), 2);
		assert_eq!(estimate_tokens("ééééé"), 2);
	}

	#[test]
	fn usage_accumulates_per_model_and_complexity() {
		let mut stats = UsageStats::default();

		stats.record("small", Complexity::Simple, 100, 20, 0.001);
		stats.record("small", Complexity::Moderate, 50, 10, 0.0005);
		stats.record("large", Complexity::Complex, 400, 200, 0.01);

		assert_eq!(stats.total_requests, 3);
		assert_eq!(stats.by_model["small"].requests, 2);
		assert_eq!(stats.by_model["small"].prompt_tokens, 150);
		assert_eq!(stats.by_complexity[&Complexity::Complex], 1);
		assert!((stats.total_cost_usd - 0.0115).abs() < 1e-12);
	}
}
