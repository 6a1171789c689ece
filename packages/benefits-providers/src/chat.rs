//! OpenAI-compatible chat completions, blocking and streamed.

use std::time::Duration;

use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::{Error, Result};

const STREAM_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ChatMessage {
	pub role: String,
	pub content: String,
}
impl ChatMessage {
	pub fn system(content: impl Into<String>) -> Self {
		Self { role: "system".to_string(), content: content.into() }
	}

	pub fn user(content: impl Into<String>) -> Self {
		Self { role: "user".to_string(), content: content.into() }
	}

	pub fn assistant(content: impl Into<String>) -> Self {
		Self { role: "assistant".to_string(), content: content.into() }
	}
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct TokenUsage {
	pub prompt_tokens: u32,
	pub completion_tokens: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChatCompletion {
	pub content: String,
	pub usage: Option<TokenUsage>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ChatStreamEvent {
	Delta(String),
	Usage(TokenUsage),
	Done,
	Error(String),
}

pub async fn complete(
	cfg: &benefits_config::ChatProviderConfig,
	model: &str,
	messages: &[ChatMessage],
	max_tokens: u32,
) -> Result<ChatCompletion> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = serde_json::json!({
		"model": model,
		"temperature": cfg.temperature,
		"messages": messages,
		"max_tokens": max_tokens,
	});
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = crate::check_status(&cfg.provider_id, res).await?.json().await?;

	parse_completion_response(json)
}

/// Starts a streamed completion. A non-success status fails before any event is produced.
pub async fn stream(
	cfg: &benefits_config::ChatProviderConfig,
	model: &str,
	messages: &[ChatMessage],
	max_tokens: u32,
) -> Result<mpsc::Receiver<ChatStreamEvent>> {
	// The timeout covers connecting and the first byte; long answers must not be cut off.
	let client = Client::builder().connect_timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = serde_json::json!({
		"model": model,
		"temperature": cfg.temperature,
		"messages": messages,
		"max_tokens": max_tokens,
		"stream": true,
		"stream_options": { "include_usage": true },
	});
	let res = tokio::time::timeout(
		Duration::from_millis(cfg.timeout_ms),
		client
			.post(url)
			.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
			.json(&body)
			.send(),
	)
	.await
	.map_err(|_| Error::Timeout {
		provider_id: cfg.provider_id.clone(),
		timeout_ms: cfg.timeout_ms,
	})??;
	let res = crate::check_status(&cfg.provider_id, res).await?;
	let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);

	tokio::spawn(async move {
		let mut bytes = res.bytes_stream();
		let mut lines = SseLineBuffer::default();

		while let Some(chunk) = bytes.next().await {
			let chunk = match chunk {
				Ok(chunk) => chunk,
				Err(err) => {
					let _ = tx.send(ChatStreamEvent::Error(err.to_string())).await;

					return;
				},
			};

			for line in lines.push(&chunk) {
				if !forward_line(&tx, &line).await {
					return;
				}
			}
		}

		if let Some(line) = lines.finish()
			&& !forward_line(&tx, &line).await
		{
			return;
		}

		// Some servers close the body without a [DONE] marker.
		let _ = tx.send(ChatStreamEvent::Done).await;
	});

	Ok(rx)
}

/// Returns `false` once the stream is over or the receiver is gone.
async fn forward_line(tx: &mpsc::Sender<ChatStreamEvent>, line: &str) -> bool {
	for event in parse_sse_line(line) {
		let done = event == ChatStreamEvent::Done;

		if tx.send(event).await.is_err() || done {
			return false;
		}
	}

	true
}

/// Splits a byte stream into complete lines without breaking multi-byte characters.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
	pending: Vec<u8>,
}
impl SseLineBuffer {
	pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
		self.pending.extend_from_slice(bytes);

		let mut lines = Vec::new();

		while let Some(pos) = self.pending.iter().position(|byte| *byte == b'\n') {
			let line: Vec<u8> = self.pending.drain(..=pos).collect();

			lines.push(String::from_utf8_lossy(&line).trim().to_string());
		}

		lines
	}

	pub fn finish(&mut self) -> Option<String> {
		let rest = String::from_utf8_lossy(&self.pending).trim().to_string();

		self.pending.clear();

		if rest.is_empty() { None } else { Some(rest) }
	}
}

/// Maps one server-sent-event line to stream events. Comments and non-data fields are ignored.
pub fn parse_sse_line(line: &str) -> Vec<ChatStreamEvent> {
	let Some(data) = line.strip_prefix("data:").map(str::trim_start) else {
		return Vec::new();
	};

	if data == "[DONE]" {
		return vec![ChatStreamEvent::Done];
	}

	let json: Value = match serde_json::from_str(data) {
		Ok(json) => json,
		Err(err) => {
			tracing::warn!(error = %err, "Skipping malformed chat stream chunk.");

			return Vec::new();
		},
	};
	let mut events = Vec::new();

	if let Some(message) = json.get("error").and_then(|err| err.get("message")).and_then(Value::as_str)
	{
		events.push(ChatStreamEvent::Error(message.to_string()));

		return events;
	}
	if let Some(content) = json
		.get("choices")
		.and_then(|v| v.as_array())
		.and_then(|arr| arr.first())
		.and_then(|choice| choice.get("delta"))
		.and_then(|delta| delta.get("content"))
		.and_then(Value::as_str)
		&& !content.is_empty()
	{
		events.push(ChatStreamEvent::Delta(content.to_string()));
	}
	if let Some(usage) = parse_usage(&json) {
		events.push(ChatStreamEvent::Usage(usage));
	}

	events
}

pub(crate) fn parse_completion_response(json: Value) -> Result<ChatCompletion> {
	let content = json
		.get("choices")
		.and_then(|v| v.as_array())
		.and_then(|arr| arr.first())
		.and_then(|choice| choice.get("message"))
		.and_then(|msg| msg.get("content"))
		.and_then(Value::as_str)
		.ok_or_else(|| Error::InvalidResponse {
			message: "Chat response is missing choices[0].message.content.".to_string(),
		})?;

	Ok(ChatCompletion { content: content.to_string(), usage: parse_usage(&json) })
}

fn parse_usage(json: &Value) -> Option<TokenUsage> {
	let usage = json.get("usage").filter(|usage| usage.is_object())?;
	let read = |key: &str| usage.get(key).and_then(Value::as_u64).map(|v| v.min(u32::MAX as u64) as u32);

	Some(TokenUsage {
		prompt_tokens: read("prompt_tokens")?,
		completion_tokens: read("completion_tokens").unwrap_or(0),
	})
}
