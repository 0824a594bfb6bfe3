pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Unauthorized: {message}")]
	Unauthorized { message: String },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error("Conflict: {message}")]
	Conflict { message: String, elapsed_minutes: Option<i64> },
	#[error("Import cannot be retried while its status is {current_status}.")]
	NotRetryable { current_status: String },
	#[error("Service is busy: {message}")]
	Busy { message: String },
	#[error("Import could not be queued: {message}")]
	Dispatch { message: String },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
}
impl From<sqlx::Error> for Error {
	fn from(err: sqlx::Error) -> Self {
		Self::Storage { message: err.to_string() }
	}
}

impl From<persona_storage::Error> for Error {
	fn from(err: persona_storage::Error) -> Self {
		match err {
			persona_storage::Error::Sqlx(inner) => Self::Storage { message: inner.to_string() },
			persona_storage::Error::Io(inner) => Self::Storage { message: inner.to_string() },
			persona_storage::Error::InvalidArgument(message) => Self::InvalidRequest { message },
			persona_storage::Error::NotFound(message) => Self::NotFound { message },
			persona_storage::Error::Conflict(message) =>
				Self::Conflict { message, elapsed_minutes: None },
		}
	}
}

impl From<persona_providers::Error> for Error {
	fn from(err: persona_providers::Error) -> Self {
		Self::Provider { message: err.to_string() }
	}
}
