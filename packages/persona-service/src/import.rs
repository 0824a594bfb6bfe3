//! Import triggering and the background job that turns an uploaded export into a profile.

use std::{sync::Arc, time::Duration as StdDuration};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::{
	sync::mpsc::{UnboundedReceiver, UnboundedSender},
	task::JoinHandle,
};
use uuid::Uuid;

use persona_domain::{
	ExportSummary, ParsedConversation, ProfileSections, SampleParams,
	chunking::{ChunkParams, chunk_conversations},
	export::parse_export,
	profile::fallback_profile_text,
};
use persona_storage::{
	BoxFuture,
	models::{BeginImport, ImportCompletion, ImportStatus, NewChunk, ProfileRecord},
};

use crate::{Error, PersonaService, Result, redact};

pub const STAGE_DOWNLOADING: &str = "Downloading export";
pub const STAGE_PARSING: &str = "Parsing conversations";
pub const STAGE_GENERATING: &str = "Generating profile";
pub const STAGE_BUILDING: &str = "Building profile";

const SUPPORTED_FILE_TYPE: &str = "json";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRequest {
	pub storage_path: String,
	pub file_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerResponse {
	pub success: bool,
	pub status: String,
	pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportJob {
	pub user_id: String,
	pub storage_path: String,
	pub file_type: String,
}

/// Hands accepted imports to whatever runs them.
pub trait JobDispatcher
where
	Self: Send + Sync,
{
	fn dispatch(&self, job: ImportJob) -> BoxFuture<'_, Result<()>>;
}

/// Queues jobs for [`spawn_import_runner`] in the same process.
pub struct ChannelDispatcher {
	tx: UnboundedSender<ImportJob>,
}
impl ChannelDispatcher {
	pub fn new(tx: UnboundedSender<ImportJob>) -> Self {
		Self { tx }
	}
}

impl JobDispatcher for ChannelDispatcher {
	fn dispatch(&self, job: ImportJob) -> BoxFuture<'_, Result<()>> {
		Box::pin(async move {
			self.tx
				.send(job)
				.map_err(|_| Error::Dispatch { message: "Import queue is closed.".to_string() })
		})
	}
}

/// Consumes queued jobs, running each one in its own task.
pub fn spawn_import_runner(
	service: Arc<PersonaService>,
	mut rx: UnboundedReceiver<ImportJob>,
) -> JoinHandle<()> {
	tokio::spawn(async move {
		while let Some(job) = rx.recv().await {
			let service = service.clone();

			tokio::spawn(async move { service.run_import(job).await });
		}

		tracing::info!("Import queue closed.");
	})
}

impl PersonaService {
	/// Starts an import of an assembled upload.
	///
	/// A user with an import in `processing` that started less than
	/// `import.stuck_threshold_minutes` ago gets a conflict. Older ones are treated as stuck and
	/// superseded. The check is advisory: two triggers in the same instant can both pass it.
	pub async fn trigger_import(
		&self,
		user_id: &str,
		req: TriggerRequest,
	) -> Result<TriggerResponse> {
		let storage_path = req.storage_path.trim();
		let file_type = req.file_type.trim().to_ascii_lowercase();

		if storage_path.is_empty() {
			return Err(Error::InvalidRequest { message: "storagePath is required.".to_string() });
		}
		if !storage_path.starts_with(&format!("{user_id}/")) {
			return Err(Error::InvalidRequest {
				message: "storagePath does not belong to the caller.".to_string(),
			});
		}
		if file_type == "zip" {
			return Err(Error::InvalidRequest {
				message: "ZIP uploads are not supported. Upload the extracted conversations.json."
					.to_string(),
			});
		}
		if file_type != SUPPORTED_FILE_TYPE {
			return Err(Error::InvalidRequest {
				message: format!("Unsupported fileType {file_type:?}."),
			});
		}

		let now = OffsetDateTime::now_utc();

		if let Some(state) = self.store.import_state(user_id).await?
			&& state.import_status == ImportStatus::Processing
		{
			let started = state.processing_started_at.unwrap_or(state.updated_at);
			let elapsed_minutes = (now - started).whole_minutes();

			if elapsed_minutes < self.cfg.import.stuck_threshold_minutes {
				return Err(Error::Conflict {
					message: "An import is already in progress.".to_string(),
					elapsed_minutes: Some(elapsed_minutes),
				});
			}

			tracing::warn!(user_id, elapsed_minutes, "Superseding stuck import.");
		}

		self.start_import(ImportJob {
			user_id: user_id.to_string(),
			storage_path: storage_path.to_string(),
			file_type,
		})
		.await
	}

	/// Restarts a failed import from its stored upload.
	pub async fn retry_import(&self, user_id: &str) -> Result<TriggerResponse> {
		let state = match self.store.import_state(user_id).await? {
			Some(state) if state.import_status == ImportStatus::Failed => state,
			other => {
				let current_status = other.map_or(ImportStatus::None, |state| state.import_status);

				return Err(Error::NotRetryable {
					current_status: current_status.as_str().to_string(),
				});
			},
		};
		let (Some(storage_path), Some(file_type)) = (state.storage_path, state.file_type) else {
			return Err(Error::InvalidRequest {
				message: "The failed import has no stored upload to retry.".to_string(),
			});
		};

		self.start_import(ImportJob { user_id: user_id.to_string(), storage_path, file_type })
			.await
	}

	async fn start_import(&self, job: ImportJob) -> Result<TriggerResponse> {
		let user_id = job.user_id.clone();

		self.store
			.begin_import(BeginImport {
				user_id: &user_id,
				storage_path: &job.storage_path,
				file_type: &job.file_type,
				now: OffsetDateTime::now_utc(),
			})
			.await?;

		let timeout = StdDuration::from_millis(self.cfg.import.accept_timeout_ms);

		match tokio::time::timeout(timeout, self.dispatcher.dispatch(job)).await {
			Ok(Ok(())) => {},
			Ok(Err(err)) => {
				let message =
					redact::sanitize_error(&err.to_string(), self.cfg.import.max_error_chars);

				tracing::error!(error = %err, user_id = user_id.as_str(), "Import dispatch failed.");

				if let Err(store_err) = self.store.fail_import(&user_id, &message).await {
					tracing::error!(
						error = %store_err,
						user_id = user_id.as_str(),
						"Failed to record dispatch failure."
					);
				}

				return Err(err);
			},
			Err(_) => {
				// The job may still be running, so the trigger stays accepted.
				tracing::warn!(
					user_id = user_id.as_str(),
					timeout_ms = timeout.as_millis() as u64,
					"Import dispatch timed out."
				);
			},
		}

		tracing::info!(user_id = user_id.as_str(), "Import accepted.");

		Ok(TriggerResponse {
			success: true,
			status: ImportStatus::Processing.as_str().to_string(),
			message: "Import started. You can close this page once progress passes 55%.".to_string(),
		})
	}

	/// Runs one import job to completion, persisting any failure on the user's state.
	pub async fn run_import(&self, job: ImportJob) {
		if let Err(err) = self.run_import_stages(&job).await {
			let message = redact::sanitize_error(&err.to_string(), self.cfg.import.max_error_chars);

			tracing::error!(error = %err, user_id = job.user_id.as_str(), "Import failed.");

			if let Err(store_err) = self.store.fail_import(&job.user_id, &message).await {
				tracing::error!(
					error = %store_err,
					user_id = job.user_id.as_str(),
					"Failed to record import failure."
				);
			}
		}
	}

	async fn run_import_stages(&self, job: &ImportJob) -> Result<()> {
		let user_id = job.user_id.as_str();

		self.store.update_import_progress(user_id, STAGE_DOWNLOADING, 10).await?;

		let bytes = self.objects.get(&job.storage_path).await?;

		self.store.update_import_progress(user_id, STAGE_PARSING, 50).await?;

		let conversations = parse_export(&bytes)
			.map_err(|err| Error::InvalidRequest { message: format!("Unreadable export: {err}") })?;
		let summary = ExportSummary::of(&conversations);

		tracing::info!(
			user_id,
			conversations = summary.conversations,
			messages = summary.messages,
			"Export parsed."
		);

		self.store.update_import_progress(user_id, STAGE_GENERATING, 60).await?;

		let sampled = persona_domain::sample(
			&conversations,
			self.cfg.sampling.target_tokens,
			&sample_params(&self.cfg.sampling),
		);
		let quick_pass = self.quick_pass(&sampled).await;

		self.store.update_import_progress(user_id, STAGE_BUILDING, 80).await?;
		self.store.save_profile(&profile_record(user_id, quick_pass, summary)?).await?;

		let chunks = self.build_chunks(user_id, &conversations);
		let stored = self
			.store
			.replace_chunks(user_id, &chunks, self.cfg.import.insert_batch_size)
			.await?;

		self.store
			.complete_import(ImportCompletion {
				user_id,
				total_chunks: stored as i64,
				total_conversations: summary.conversations as i64,
				total_messages: summary.messages as i64,
			})
			.await?;

		tracing::info!(user_id, chunks = stored, "Import complete.");

		self.remove_consumed_exports(user_id, &job.storage_path).await;

		Ok(())
	}

	/// Deletes the processed export and every earlier export of the user. Later uploads are kept
	/// because they may still be waiting for a trigger.
	async fn remove_consumed_exports(&self, user_id: &str, storage_path: &str) {
		let keys = match self.objects.list(&format!("{user_id}/")).await {
			Ok(keys) => keys,
			Err(err) => {
				tracing::warn!(error = %err, user_id, "Failed to list stored exports.");

				return;
			},
		};

		// Keys are `{user}/{unix_ms}-conversations.json`, so key order is upload order.
		for key in keys.iter().filter(|key| key.as_str() <= storage_path) {
			if let Err(err) = self.objects.delete(key).await {
				tracing::warn!(error = %err, user_id, key = key.as_str(), "Failed to delete export.");
			}
		}
	}

	fn build_chunks(&self, user_id: &str, conversations: &[ParsedConversation]) -> Vec<NewChunk> {
		let params = ChunkParams {
			max_messages: self.cfg.import.chunk_max_messages,
			max_chars: self.cfg.import.chunk_max_chars,
		};

		chunk_conversations(conversations, &params)
			.into_iter()
			.map(|draft| NewChunk {
				chunk_id: chunk_id_for(user_id, &draft.conversation_id, draft.chunk_index),
				user_id: user_id.to_string(),
				conversation_id: draft.conversation_id,
				chunk_index: i32::try_from(draft.chunk_index).unwrap_or(i32::MAX),
				title: draft.title,
				content: draft.content,
				message_count: i32::try_from(draft.message_count).unwrap_or(i32::MAX),
				created_at: draft.created_at,
			})
			.collect()
	}
}

pub(crate) fn sample_params(cfg: &persona_config::Sampling) -> SampleParams {
	SampleParams {
		min_messages: cfg.min_messages,
		chars_per_token: cfg.chars_per_token,
		min_selected: cfg.min_selected,
		max_selected: cfg.max_selected,
	}
}

fn chunk_id_for(user_id: &str, conversation_id: &str, chunk_index: usize) -> Uuid {
	let name = format!("{user_id}:{conversation_id}:{chunk_index}");

	Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}

fn profile_record(
	user_id: &str,
	quick_pass: Option<persona_domain::QuickPassResult>,
	summary: ExportSummary,
) -> Result<ProfileRecord> {
	let generated_at = OffsetDateTime::now_utc();
	let record = match quick_pass {
		Some(result) => {
			let profile_text = result.to_markdown();
			let ai_name = Some(result.ai_name().to_string());
			let archetype = Some(result.archetype().to_string());
			let sections = serde_json::to_value(ProfileSections::from(result))
				.map_err(|err| Error::Storage { message: format!("Failed to encode profile: {err}") })?;

			ProfileRecord {
				user_id: user_id.to_string(),
				source: "quick_pass".to_string(),
				ai_name,
				archetype,
				sections,
				profile_text,
				generated_at,
			}
		},
		None => ProfileRecord {
			user_id: user_id.to_string(),
			source: "fallback".to_string(),
			ai_name: None,
			archetype: None,
			sections: serde_json::Value::Null,
			profile_text: fallback_profile_text(summary),
			generated_at,
		},
	};

	Ok(record)
}
