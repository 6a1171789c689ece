mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Chat, ChatProviderConfig, Chunking, Config, EmbeddingProviderConfig, Ingestion,
	LlmProviderConfig, Postgres, Providers, Qdrant, Retrieval, Router, RouterModel, RouterRule,
	Security, Service, Storage,
};

use std::{collections::HashSet, fs, path::Path};

pub const ROUTER_MODES: [&str; 2] = ["heuristic", "llm_assisted"];
pub const COMPLEXITIES: [&str; 3] = ["simple", "moderate", "complex"];
pub const CATEGORIES: [&str; 10] = [
	"medical",
	"dental",
	"vision",
	"retirement",
	"spending_accounts",
	"life_disability",
	"time_off",
	"enrollment",
	"wellness",
	"general",
];

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;
	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.providers.embedding.dimensions == 0 {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must be greater than zero.".to_string(),
		});
	}
	if cfg.providers.embedding.dimensions != cfg.storage.qdrant.vector_dim {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must match storage.qdrant.vector_dim."
				.to_string(),
		});
	}
	if cfg.storage.qdrant.collection.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.qdrant.collection must be non-empty.".to_string(),
		});
	}

	validate_router(&cfg.router)?;

	if cfg.retrieval.top_k == 0 {
		return Err(Error::Validation {
			message: "retrieval.top_k must be greater than zero.".to_string(),
		});
	}
	if !cfg.retrieval.min_score.is_finite() || !(0.0..=1.0).contains(&cfg.retrieval.min_score) {
		return Err(Error::Validation {
			message: "retrieval.min_score must be in the range 0.0-1.0.".to_string(),
		});
	}
	if cfg.retrieval.max_context_chars == 0 {
		return Err(Error::Validation {
			message: "retrieval.max_context_chars must be greater than zero.".to_string(),
		});
	}
	if cfg.chunking.chunk_chars == 0 {
		return Err(Error::Validation {
			message: "chunking.chunk_chars must be greater than zero.".to_string(),
		});
	}
	if cfg.chunking.overlap_chars >= cfg.chunking.chunk_chars {
		return Err(Error::Validation {
			message: "chunking.overlap_chars must be less than chunking.chunk_chars.".to_string(),
		});
	}
	if cfg.ingestion.max_document_bytes == 0 {
		return Err(Error::Validation {
			message: "ingestion.max_document_bytes must be greater than zero.".to_string(),
		});
	}
	if cfg.ingestion.embed_batch_size == 0 {
		return Err(Error::Validation {
			message: "ingestion.embed_batch_size must be greater than zero.".to_string(),
		});
	}
	if cfg.ingestion.max_attempts == 0 {
		return Err(Error::Validation {
			message: "ingestion.max_attempts must be greater than zero.".to_string(),
		});
	}
	if cfg.chat.max_message_chars == 0 {
		return Err(Error::Validation {
			message: "chat.max_message_chars must be greater than zero.".to_string(),
		});
	}

	for (label, key) in [
		("embedding", &cfg.providers.embedding.api_key),
		("chat", &cfg.providers.chat.api_key),
		("classifier", &cfg.providers.classifier.api_key),
	] {
		if key.trim().is_empty() {
			return Err(Error::Validation {
				message: format!("Provider {label} api_key must be non-empty."),
			});
		}
	}

	Ok(())
}

fn validate_router(router: &Router) -> Result<()> {
	if !ROUTER_MODES.contains(&router.mode.as_str()) {
		return Err(Error::Validation {
			message: "router.mode must be one of heuristic or llm_assisted.".to_string(),
		});
	}
	if !router.llm_assist_below_confidence.is_finite()
		|| !(0.0..=1.0).contains(&router.llm_assist_below_confidence)
	{
		return Err(Error::Validation {
			message: "router.llm_assist_below_confidence must be in the range 0.0-1.0."
				.to_string(),
		});
	}
	if router.models.is_empty() {
		return Err(Error::Validation {
			message: "router.models must be non-empty.".to_string(),
		});
	}

	let mut ids = HashSet::new();

	for model in &router.models {
		if model.id.trim().is_empty() {
			return Err(Error::Validation {
				message: "router.models.id must be non-empty.".to_string(),
			});
		}
		if !ids.insert(model.id.as_str()) {
			return Err(Error::Validation {
				message: format!("router.models.id {:?} is duplicated.", model.id),
			});
		}

		for (label, cost) in [
			("input_cost_per_1k", model.input_cost_per_1k),
			("output_cost_per_1k", model.output_cost_per_1k),
		] {
			if !cost.is_finite() || cost < 0.0 {
				return Err(Error::Validation {
					message: format!("router.models.{label} must be a finite number of zero or greater."),
				});
			}
		}

		if model.max_output_tokens == 0 {
			return Err(Error::Validation {
				message: "router.models.max_output_tokens must be greater than zero.".to_string(),
			});
		}
	}

	if !ids.contains(router.default_model.as_str()) {
		return Err(Error::UnknownModel {
			key: "router.default_model",
			model: router.default_model.clone(),
		});
	}

	for rule in &router.rules {
		if !COMPLEXITIES.contains(&rule.complexity.as_str()) {
			return Err(Error::Validation {
				message: "router.rules.complexity must be one of simple, moderate, or complex."
					.to_string(),
			});
		}
		if let Some(category) = rule.category.as_deref()
			&& !CATEGORIES.contains(&category)
		{
			return Err(Error::Validation {
				message: format!("router.rules.category {category:?} is not a known category."),
			});
		}
		if !ids.contains(rule.model.as_str()) {
			return Err(Error::UnknownModel { key: "router.rules.model", model: rule.model.clone() });
		}
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	if cfg.security.api_auth_token.as_deref().map(|token| token.trim().is_empty()).unwrap_or(false)
	{
		cfg.security.api_auth_token = None;
	}
	if cfg
		.security
		.admin_auth_token
		.as_deref()
		.map(|token| token.trim().is_empty())
		.unwrap_or(false)
	{
		cfg.security.admin_auth_token = None;
	}

	for rule in &mut cfg.router.rules {
		if rule.category.as_deref().map(|category| category.trim().is_empty()).unwrap_or(false) {
			rule.category = None;
		}
	}
}
