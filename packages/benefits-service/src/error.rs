use benefits_domain::access::AccessError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Unauthenticated: {message}")]
	Unauthenticated { message: String },
	#[error("Forbidden: {message}")]
	Forbidden { message: String },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error("Conflict: {message}")]
	Conflict { message: String },
	#[error("Payload too large: {message}")]
	PayloadTooLarge { message: String },
	#[error("Unsupported media type: {message}")]
	UnsupportedMedia { message: String },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
	#[error("Qdrant error: {message}")]
	Qdrant { message: String },
}
impl From<sqlx::Error> for Error {
	fn from(err: sqlx::Error) -> Self {
		Self::Storage { message: err.to_string() }
	}
}

impl From<benefits_storage::Error> for Error {
	fn from(err: benefits_storage::Error) -> Self {
		match err {
			benefits_storage::Error::Sqlx(inner) => Self::Storage { message: inner.to_string() },
			// Vectors come from the embedding provider, so a wrong size is the provider's fault.
			err @ benefits_storage::Error::InvalidArgument { .. } =>
				Self::Provider { message: err.to_string() },
			benefits_storage::Error::Conflict { message } => Self::Conflict { message },
			benefits_storage::Error::Qdrant(inner) => Self::Qdrant { message: inner.to_string() },
		}
	}
}

impl From<benefits_providers::Error> for Error {
	fn from(err: benefits_providers::Error) -> Self {
		Self::Provider { message: err.to_string() }
	}
}

impl From<benefits_extract::Error> for Error {
	fn from(err: benefits_extract::Error) -> Self {
		match err {
			benefits_extract::Error::UnsupportedType { .. } =>
				Self::UnsupportedMedia { message: err.to_string() },
			other => Self::InvalidRequest { message: other.to_string() },
		}
	}
}

impl From<AccessError> for Error {
	fn from(err: AccessError) -> Self {
		match err {
			AccessError::Forbidden { message } => Self::Forbidden { message },
			AccessError::InvalidRequest { message } => Self::InvalidRequest { message },
		}
	}
}
