use std::{future::Future, pin::Pin};

use uuid::Uuid;

use crate::{
	Result,
	models::{
		BeginImport, ChunkCounts, EmbeddingUpdate, ImportCompletion, ImportProfileState,
		NewChunk, PendingChunk, ProfileRecord,
	},
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Persistence for import state, conversation chunks and synthesized profiles.
pub trait ImportStore
where
	Self: Send + Sync,
{
	fn import_state<'a>(
		&'a self,
		user_id: &'a str,
	) -> BoxFuture<'a, Result<Option<ImportProfileState>>>;

	/// Resets the user's state to a fresh `processing` run.
	fn begin_import<'a>(&'a self, args: BeginImport<'a>) -> BoxFuture<'a, Result<()>>;

	fn update_import_progress<'a>(
		&'a self,
		user_id: &'a str,
		stage: &'a str,
		percent: i32,
	) -> BoxFuture<'a, Result<()>>;

	fn fail_import<'a>(&'a self, user_id: &'a str, error: &'a str) -> BoxFuture<'a, Result<()>>;

	/// Marks the import complete and queues the user's chunks for embedding.
	fn complete_import<'a>(&'a self, args: ImportCompletion<'a>) -> BoxFuture<'a, Result<()>>;

	fn update_embedding_state<'a>(&'a self, args: EmbeddingUpdate<'a>)
	-> BoxFuture<'a, Result<()>>;

	/// Users whose completed import still has embedding work, oldest first.
	fn users_pending_embeddings<'a>(&'a self, limit: i64) -> BoxFuture<'a, Result<Vec<String>>>;

	/// Replaces every chunk of the user with `chunks`, inserting in batches.
	fn replace_chunks<'a>(
		&'a self,
		user_id: &'a str,
		chunks: &'a [NewChunk],
		batch_size: usize,
	) -> BoxFuture<'a, Result<u64>>;

	/// Chunks without an embedding, newest first, skipping `exclude`.
	fn pending_chunks<'a>(
		&'a self,
		user_id: &'a str,
		limit: i64,
		exclude: &'a [Uuid],
	) -> BoxFuture<'a, Result<Vec<PendingChunk>>>;

	/// Attaches an embedding unless the chunk already has one. Returns whether it was written.
	fn attach_embedding<'a>(
		&'a self,
		chunk_id: Uuid,
		embedding: &'a [f32],
	) -> BoxFuture<'a, Result<bool>>;

	fn chunk_counts<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<ChunkCounts>>;

	/// Stores the profile, superseding any earlier one.
	fn save_profile<'a>(&'a self, profile: &'a ProfileRecord) -> BoxFuture<'a, Result<()>>;

	fn profile<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<Option<ProfileRecord>>>;
}
