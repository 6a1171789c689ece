pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	SerdeJson(#[from] serde_json::Error),
	#[error(transparent)]
	InvalidHeaderName(#[from] reqwest::header::InvalidHeaderName),
	#[error(transparent)]
	InvalidHeaderValue(#[from] reqwest::header::InvalidHeaderValue),
	#[error("{message}")]
	InvalidConfig { message: String },
	#[error("{message}")]
	InvalidResponse { message: String },
	/// Non-success answer; `body` is the start of what the provider sent back.
	#[error("Provider {provider_id} returned HTTP {status}: {body}")]
	Status { provider_id: String, status: u16, body: String },
	#[error("Provider {provider_id} did not respond within {timeout_ms} ms.")]
	Timeout { provider_id: String, timeout_ms: u64 },
}
