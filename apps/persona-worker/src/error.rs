pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Storage(#[from] persona_storage::Error),
	#[error(transparent)]
	Service(#[from] persona_service::Error),
}
