#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Sqlx(#[from] sqlx::Error),
	#[error(transparent)]
	Qdrant(#[from] Box<qdrant_client::QdrantError>),
	/// A vector whose length differs from the collection dimension.
	#[error("Vector has {actual} dimensions; the collection expects {expected}.")]
	InvalidArgument { expected: u32, actual: usize },
	/// A unique index rejected the row, e.g. two uploads of the same content racing.
	#[error("{message}")]
	Conflict { message: String },
}
impl From<qdrant_client::QdrantError> for Error {
	fn from(err: qdrant_client::QdrantError) -> Self {
		Self::Qdrant(Box::new(err))
	}
}
