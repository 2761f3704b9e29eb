pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Configuration error: {message}")]
	Configuration { message: String },
	#[error("Upstream data error: {message}")]
	UpstreamData { message: String },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
	#[error("Qdrant error: {message}")]
	Qdrant { message: String },
	#[error("Integrity violation: {message}")]
	Integrity { message: String },
	#[error("Stage cancelled.")]
	Cancelled,
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
}
impl From<sqlx::Error> for Error {
	fn from(err: sqlx::Error) -> Self {
		Self::Storage { message: err.to_string() }
	}
}

impl From<lkg_storage::Error> for Error {
	fn from(err: lkg_storage::Error) -> Self {
		match err {
			lkg_storage::Error::Sqlx(inner) => Self::Storage { message: inner.to_string() },
			lkg_storage::Error::InvalidArgument(message) => Self::InvalidRequest { message },
			lkg_storage::Error::NotFound(message) => Self::UpstreamData { message },
			lkg_storage::Error::Qdrant(inner) => Self::Qdrant { message: inner.to_string() },
		}
	}
}

impl From<lkg_providers::Error> for Error {
	fn from(err: lkg_providers::Error) -> Self {
		Self::Provider { message: err.to_string() }
	}
}
