use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::{Result, chat::ChatMessage};

const CLASSIFIER_MAX_TOKENS: u32 = 8;
const CLASSIFIER_INSTRUCTION: &str = "You classify employee benefits questions by how much reasoning an answer needs. \
SIMPLE: a single fact lookup such as a date, a contact, or whether something is covered. \
MODERATE: explaining one plan feature or comparing two options. \
COMPLEX: multi-step reasoning, cost calculations, or personal scenarios spanning several plans. \
Reply with exactly one word: SIMPLE, MODERATE, or COMPLEX.";

/// Asks the classifier model for a complexity label and returns its raw reply.
pub async fn classify(cfg: &benefits_config::LlmProviderConfig, query: &str) -> Result<String> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = serde_json::json!({
		"model": cfg.model,
		"temperature": cfg.temperature,
		"max_tokens": CLASSIFIER_MAX_TOKENS,
		"messages": classifier_messages(query),
	});
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = crate::check_status(&cfg.provider_id, res).await?.json().await?;

	Ok(crate::chat::parse_completion_response(json)?.content.trim().to_string())
}

fn classifier_messages(query: &str) -> Vec<ChatMessage> {
	vec![ChatMessage::system(CLASSIFIER_INSTRUCTION), ChatMessage::user(query)]
}
