//! In-process [`ImportStore`] used by tests and single-node development runs.

use std::collections::{HashMap, HashSet};

use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
	BoxFuture, Error, ImportStore, Result,
	models::{
		BeginImport, ChunkCounts, EmbeddingStatus, EmbeddingUpdate, ImportCompletion,
		ImportProfileState, ImportStatus, NewChunk, PendingChunk, ProfileRecord,
	},
};

#[derive(Debug, Clone)]
struct StoredChunk {
	chunk: NewChunk,
	embedding: Option<Vec<f32>>,
	embedding_writes: usize,
}

#[derive(Debug, Default)]
struct Inner {
	states: HashMap<String, ImportProfileState>,
	chunks: Vec<StoredChunk>,
	profiles: HashMap<String, ProfileRecord>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
	inner: RwLock<Inner>,
}
impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Seeds or overwrites a user's state.
	pub async fn put_state(&self, state: ImportProfileState) {
		self.inner.write().await.states.insert(state.user_id.clone(), state);
	}

	pub async fn chunks(&self, user_id: &str) -> Vec<NewChunk> {
		self.inner
			.read()
			.await
			.chunks
			.iter()
			.filter(|stored| stored.chunk.user_id == user_id)
			.map(|stored| stored.chunk.clone())
			.collect()
	}

	pub async fn embedding(&self, chunk_id: Uuid) -> Option<Vec<f32>> {
		self.inner
			.read()
			.await
			.chunks
			.iter()
			.find(|stored| stored.chunk.chunk_id == chunk_id)
			.and_then(|stored| stored.embedding.clone())
	}

	/// Number of times an embedding was written for the chunk.
	pub async fn embedding_writes(&self, chunk_id: Uuid) -> usize {
		self.inner
			.read()
			.await
			.chunks
			.iter()
			.find(|stored| stored.chunk.chunk_id == chunk_id)
			.map(|stored| stored.embedding_writes)
			.unwrap_or(0)
	}
}

impl ImportStore for MemoryStore {
	fn import_state<'a>(
		&'a self,
		user_id: &'a str,
	) -> BoxFuture<'a, Result<Option<ImportProfileState>>> {
		Box::pin(async move { Ok(self.inner.read().await.states.get(user_id).cloned()) })
	}

	fn begin_import<'a>(&'a self, args: BeginImport<'a>) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let mut inner = self.inner.write().await;
			let state = inner
				.states
				.entry(args.user_id.to_string())
				.or_insert_with(|| ImportProfileState::new(args.user_id, args.now));

			state.import_status = ImportStatus::Processing;
			state.import_stage = Some("Starting...".to_string());
			state.progress_percent = 0;
			state.import_error = None;
			state.processing_started_at = Some(args.now);
			state.storage_path = Some(args.storage_path.to_string());
			state.file_type = Some(args.file_type.to_string());
			state.embedding_status = EmbeddingStatus::None;
			state.embedding_progress = 0;
			state.processed_chunks = 0;
			state.total_chunks = 0;
			state.updated_at = args.now;

			Ok(())
		})
	}

	fn update_import_progress<'a>(
		&'a self,
		user_id: &'a str,
		stage: &'a str,
		percent: i32,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let mut inner = self.inner.write().await;
			let state = state_mut(&mut inner, user_id)?;

			state.import_stage = Some(stage.to_string());
			state.progress_percent = percent.clamp(0, 100);
			state.updated_at = OffsetDateTime::now_utc();

			Ok(())
		})
	}

	fn fail_import<'a>(&'a self, user_id: &'a str, error: &'a str) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let mut inner = self.inner.write().await;
			let state = state_mut(&mut inner, user_id)?;

			state.import_status = ImportStatus::Failed;
			state.import_stage = Some("Failed".to_string());
			state.import_error = Some(error.to_string());
			state.updated_at = OffsetDateTime::now_utc();

			Ok(())
		})
	}

	fn complete_import<'a>(&'a self, args: ImportCompletion<'a>) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let mut inner = self.inner.write().await;
			let state = state_mut(&mut inner, args.user_id)?;
			let has_chunks = args.total_chunks > 0;

			state.import_status = ImportStatus::Complete;
			state.import_stage = Some("Complete".to_string());
			state.progress_percent = 100;
			state.import_error = None;
			state.embedding_status =
				if has_chunks { EmbeddingStatus::Pending } else { EmbeddingStatus::Complete };
			state.embedding_progress = if has_chunks { 0 } else { 100 };
			state.processed_chunks = 0;
			state.total_chunks = args.total_chunks;
			state.total_conversations = args.total_conversations;
			state.total_messages = args.total_messages;
			state.updated_at = OffsetDateTime::now_utc();

			Ok(())
		})
	}

	fn update_embedding_state<'a>(
		&'a self,
		args: EmbeddingUpdate<'a>,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let mut inner = self.inner.write().await;
			let state = state_mut(&mut inner, args.user_id)?;

			state.embedding_status = args.status;
			state.embedding_progress = args.progress.clamp(0, 100);
			state.processed_chunks = args.processed_chunks;
			state.updated_at = OffsetDateTime::now_utc();

			Ok(())
		})
	}

	fn users_pending_embeddings<'a>(&'a self, limit: i64) -> BoxFuture<'a, Result<Vec<String>>> {
		Box::pin(async move {
			let inner = self.inner.read().await;
			let mut pending = inner
				.states
				.values()
				.filter(|state| {
					state.import_status == ImportStatus::Complete
						&& matches!(
							state.embedding_status,
							EmbeddingStatus::Pending | EmbeddingStatus::Processing
						)
				})
				.collect::<Vec<_>>();

			pending.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));

			Ok(pending
				.into_iter()
				.take(limit.max(0) as usize)
				.map(|state| state.user_id.clone())
				.collect())
		})
	}

	fn replace_chunks<'a>(
		&'a self,
		user_id: &'a str,
		chunks: &'a [NewChunk],
		_batch_size: usize,
	) -> BoxFuture<'a, Result<u64>> {
		Box::pin(async move {
			let mut inner = self.inner.write().await;

			let mut ids = HashSet::with_capacity(chunks.len());

			for chunk in chunks {
				if chunk.user_id != user_id {
					return Err(Error::InvalidArgument(format!(
						"Chunk {} belongs to another user.",
						chunk.chunk_id
					)));
				}
				if !ids.insert(chunk.chunk_id) {
					return Err(Error::Conflict(format!("Chunk {} is repeated.", chunk.chunk_id)));
				}
			}

			inner.chunks.retain(|stored| stored.chunk.user_id != user_id);
			inner.chunks.extend(chunks.iter().map(|chunk| StoredChunk {
				chunk: chunk.clone(),
				embedding: None,
				embedding_writes: 0,
			}));

			Ok(chunks.len() as u64)
		})
	}

	fn pending_chunks<'a>(
		&'a self,
		user_id: &'a str,
		limit: i64,
		exclude: &'a [Uuid],
	) -> BoxFuture<'a, Result<Vec<PendingChunk>>> {
		Box::pin(async move {
			let inner = self.inner.read().await;
			let mut pending = inner
				.chunks
				.iter()
				.filter(|stored| {
					stored.chunk.user_id == user_id
						&& stored.embedding.is_none()
						&& !exclude.contains(&stored.chunk.chunk_id)
				})
				.map(|stored| PendingChunk {
					chunk_id: stored.chunk.chunk_id,
					content: stored.chunk.content.clone(),
					created_at: stored.chunk.created_at,
				})
				.collect::<Vec<_>>();

			pending.sort_by(|a, b| {
				b.created_at.cmp(&a.created_at).then_with(|| a.chunk_id.cmp(&b.chunk_id))
			});
			pending.truncate(limit.max(0) as usize);

			Ok(pending)
		})
	}

	fn attach_embedding<'a>(
		&'a self,
		chunk_id: Uuid,
		embedding: &'a [f32],
	) -> BoxFuture<'a, Result<bool>> {
		Box::pin(async move {
			let mut inner = self.inner.write().await;
			let Some(stored) = inner.chunks.iter_mut().find(|stored| stored.chunk.chunk_id == chunk_id)
			else {
				return Ok(false);
			};

			if stored.embedding.is_some() {
				return Ok(false);
			}

			stored.embedding = Some(embedding.to_vec());
			stored.embedding_writes += 1;

			Ok(true)
		})
	}

	fn chunk_counts<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<ChunkCounts>> {
		Box::pin(async move {
			let inner = self.inner.read().await;
			let mut counts = ChunkCounts::default();

			for stored in inner.chunks.iter().filter(|stored| stored.chunk.user_id == user_id) {
				counts.total += 1;

				if stored.embedding.is_some() {
					counts.embedded += 1;
				}
			}

			Ok(counts)
		})
	}

	fn save_profile<'a>(&'a self, profile: &'a ProfileRecord) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			self.inner.write().await.profiles.insert(profile.user_id.clone(), profile.clone());

			Ok(())
		})
	}

	fn profile<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<Option<ProfileRecord>>> {
		Box::pin(async move { Ok(self.inner.read().await.profiles.get(user_id).cloned()) })
	}
}

fn state_mut<'a>(inner: &'a mut Inner, user_id: &str) -> Result<&'a mut ImportProfileState> {
	inner
		.states
		.get_mut(user_id)
		.ok_or_else(|| Error::NotFound(format!("No import state for user {user_id}.")))
}
