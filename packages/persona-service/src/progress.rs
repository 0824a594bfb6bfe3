use serde::Serialize;
use time::OffsetDateTime;

use persona_domain::{ProgressView, map_progress};
use persona_storage::models::ImportProfileState;

use crate::{PersonaService, Result};

/// Raw import state alongside the client-facing view of it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressResponse {
	pub import_status: String,
	pub progress_percent: i32,
	pub import_stage: Option<String>,
	pub import_error: Option<String>,
	pub embedding_status: String,
	pub embedding_progress: i32,
	pub view: ProgressView,
}

impl PersonaService {
	/// Reads the user's import state. `last_known_percent` is the highest percent the client has
	/// already shown, so the view never moves backward.
	pub async fn import_progress(
		&self,
		user_id: &str,
		last_known_percent: f64,
	) -> Result<ProgressResponse> {
		let state = self
			.store
			.import_state(user_id)
			.await?
			.unwrap_or_else(|| ImportProfileState::new(user_id, OffsetDateTime::now_utc()));
		let view = map_progress(
			f64::from(state.progress_percent),
			state.import_stage.as_deref(),
			last_known_percent,
		);

		Ok(ProgressResponse {
			import_status: state.import_status.as_str().to_string(),
			progress_percent: state.progress_percent,
			import_stage: state.import_stage,
			import_error: state.import_error,
			embedding_status: state.embedding_status.as_str().to_string(),
			embedding_progress: state.embedding_progress,
			view,
		})
	}
}
