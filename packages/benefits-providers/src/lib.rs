pub mod chat;
pub mod classifier;
pub mod embedding;

mod error;

pub use error::{Error, Result};

use reqwest::{
	Response,
	header::{AUTHORIZATION, HeaderMap, HeaderName},
};
use serde_json::{Map, Value};

const MAX_ERROR_BODY_CHARS: usize = 512;

pub fn auth_headers(api_key: &str, default_headers: &Map<String, Value>) -> Result<HeaderMap> {
	let mut headers = HeaderMap::new();

	headers.insert(AUTHORIZATION, format!("Bearer {api_key}").parse()?);

	for (key, value) in default_headers {
		let Some(raw) = value.as_str() else {
			return Err(Error::InvalidConfig {
				message: format!("Default header {key:?} must be a string."),
			});
		};

		headers.insert(HeaderName::from_bytes(key.as_bytes())?, raw.parse()?);
	}

	Ok(headers)
}

/// Passes successful responses through and turns the rest into [`Error::Status`].
pub async fn check_status(provider_id: &str, res: Response) -> Result<Response> {
	let status = res.status();

	if status.is_success() {
		return Ok(res);
	}

	let body = res.text().await.unwrap_or_default();

	Err(Error::Status {
		provider_id: provider_id.to_string(),
		status: status.as_u16(),
		body: error_body_excerpt(&body),
	})
}

fn error_body_excerpt(body: &str) -> String {
	let body = body.trim();

	if body.chars().count() <= MAX_ERROR_BODY_CHARS {
		return body.to_string();
	}

	let mut excerpt = body.chars().take(MAX_ERROR_BODY_CHARS).collect::<String>();

	excerpt.push_str("...");

	excerpt
}
