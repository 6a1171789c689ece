pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Unsupported document type for {file_name:?}.")]
	UnsupportedType { file_name: String },
	#[error("PDF extraction failed: {message}")]
	Pdf { message: String },
	#[error(transparent)]
	Zip(#[from] zip::result::ZipError),
	#[error(transparent)]
	Io(#[from] std::io::Error),
	#[error("Document contains no extractable text.")]
	Empty,
}
