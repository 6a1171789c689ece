pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("{0}")]
	Validation(String),
	#[error(transparent)]
	Sqlx(#[from] sqlx::Error),
	#[error(transparent)]
	Storage(#[from] benefits_storage::Error),
	#[error(transparent)]
	Provider(#[from] benefits_providers::Error),
	#[error(transparent)]
	Extract(#[from] benefits_extract::Error),
	#[error("Chunking produced no chunks.")]
	NoChunks,
	#[error("Unsupported outbox op: {0}.")]
	UnsupportedOp(String),
}
impl Error {
	/// Errors that will fail the same way on every retry.
	pub fn is_permanent(&self) -> bool {
		matches!(self, Self::Extract(_) | Self::NoChunks | Self::UnsupportedOp(_))
	}
}
