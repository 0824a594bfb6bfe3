use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImportStatus {
	None,
	Processing,
	Complete,
	Failed,
}
impl ImportStatus {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::None => "none",
			Self::Processing => "processing",
			Self::Complete => "complete",
			Self::Failed => "failed",
		}
	}

	pub fn parse(raw: &str) -> Result<Self> {
		match raw {
			"none" => Ok(Self::None),
			"processing" => Ok(Self::Processing),
			"complete" => Ok(Self::Complete),
			"failed" => Ok(Self::Failed),
			other => Err(Error::InvalidArgument(format!("Unknown import status {other:?}."))),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmbeddingStatus {
	None,
	Pending,
	Processing,
	Complete,
	Failed,
}
impl EmbeddingStatus {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::None => "none",
			Self::Pending => "pending",
			Self::Processing => "processing",
			Self::Complete => "complete",
			Self::Failed => "failed",
		}
	}

	pub fn parse(raw: &str) -> Result<Self> {
		match raw {
			"none" => Ok(Self::None),
			"pending" => Ok(Self::Pending),
			"processing" => Ok(Self::Processing),
			"complete" => Ok(Self::Complete),
			"failed" => Ok(Self::Failed),
			other => Err(Error::InvalidArgument(format!("Unknown embedding status {other:?}."))),
		}
	}
}

/// Per-user import state. The single source of truth for progress reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportProfileState {
	pub user_id: String,
	pub import_status: ImportStatus,
	pub import_stage: Option<String>,
	pub progress_percent: i32,
	pub import_error: Option<String>,
	pub processing_started_at: Option<OffsetDateTime>,
	pub storage_path: Option<String>,
	pub file_type: Option<String>,
	pub embedding_status: EmbeddingStatus,
	pub embedding_progress: i32,
	pub processed_chunks: i64,
	pub total_chunks: i64,
	pub total_conversations: i64,
	pub total_messages: i64,
	pub updated_at: OffsetDateTime,
}
impl ImportProfileState {
	pub fn new(user_id: impl Into<String>, now: OffsetDateTime) -> Self {
		Self {
			user_id: user_id.into(),
			import_status: ImportStatus::None,
			import_stage: None,
			progress_percent: 0,
			import_error: None,
			processing_started_at: None,
			storage_path: None,
			file_type: None,
			embedding_status: EmbeddingStatus::None,
			embedding_progress: 0,
			processed_chunks: 0,
			total_chunks: 0,
			total_conversations: 0,
			total_messages: 0,
			updated_at: now,
		}
	}
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ImportProfileStateRow {
	pub user_id: String,
	pub import_status: String,
	pub import_stage: Option<String>,
	pub progress_percent: i32,
	pub import_error: Option<String>,
	pub processing_started_at: Option<OffsetDateTime>,
	pub storage_path: Option<String>,
	pub file_type: Option<String>,
	pub embedding_status: String,
	pub embedding_progress: i32,
	pub processed_chunks: i64,
	pub total_chunks: i64,
	pub total_conversations: i64,
	pub total_messages: i64,
	pub updated_at: OffsetDateTime,
}
impl TryFrom<ImportProfileStateRow> for ImportProfileState {
	type Error = Error;

	fn try_from(row: ImportProfileStateRow) -> Result<Self> {
		Ok(Self {
			import_status: ImportStatus::parse(&row.import_status)?,
			embedding_status: EmbeddingStatus::parse(&row.embedding_status)?,
			user_id: row.user_id,
			import_stage: row.import_stage,
			progress_percent: row.progress_percent,
			import_error: row.import_error,
			processing_started_at: row.processing_started_at,
			storage_path: row.storage_path,
			file_type: row.file_type,
			embedding_progress: row.embedding_progress,
			processed_chunks: row.processed_chunks,
			total_chunks: row.total_chunks,
			total_conversations: row.total_conversations,
			total_messages: row.total_messages,
			updated_at: row.updated_at,
		})
	}
}

#[derive(Debug, Clone)]
pub struct BeginImport<'a> {
	pub user_id: &'a str,
	pub storage_path: &'a str,
	pub file_type: &'a str,
	pub now: OffsetDateTime,
}

#[derive(Debug, Clone, Copy)]
pub struct ImportCompletion<'a> {
	pub user_id: &'a str,
	pub total_chunks: i64,
	pub total_conversations: i64,
	pub total_messages: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct EmbeddingUpdate<'a> {
	pub user_id: &'a str,
	pub status: EmbeddingStatus,
	pub progress: i32,
	pub processed_chunks: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewChunk {
	pub chunk_id: Uuid,
	pub user_id: String,
	pub conversation_id: String,
	pub chunk_index: i32,
	pub title: String,
	pub content: String,
	pub message_count: i32,
	pub created_at: OffsetDateTime,
}

/// A chunk still waiting for its embedding.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct PendingChunk {
	pub chunk_id: Uuid,
	pub content: String,
	pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkCounts {
	pub total: i64,
	pub embedded: i64,
}
impl ChunkCounts {
	/// Whole-number share of embedded chunks, 100 when there is nothing to embed.
	pub fn percent(&self) -> i32 {
		if self.total <= 0 {
			return 100;
		}

		((self.embedded.clamp(0, self.total) * 100) / self.total) as i32
	}
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ProfileRecord {
	pub user_id: String,
	/// `quick_pass` or `fallback`.
	pub source: String,
	pub ai_name: Option<String>,
	pub archetype: Option<String>,
	pub sections: Value,
	pub profile_text: String,
	pub generated_at: OffsetDateTime,
}
