use std::sync::{Arc, atomic::Ordering};

use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use persona_config::Config;
use persona_service::{EmbeddingProcessor, PassOutcome};
use persona_storage::{
	BoxFuture, ImportStore, MemoryStore, Result as StorageResult,
	models::{
		BeginImport, ChunkCounts, EmbeddingStatus, EmbeddingUpdate, ImportCompletion,
		ImportProfileState, NewChunk, PendingChunk, ProfileRecord,
	},
};

use super::support::{StubEmbedding, VECTOR_DIM, test_config};

async fn seed(store: &MemoryStore, count: usize) -> Vec<Uuid> {
	let base = OffsetDateTime::UNIX_EPOCH + Duration::days(19_000);
	let chunks = (0..count)
		.map(|i| NewChunk {
			chunk_id: Uuid::new_v4(),
			user_id: "u1".to_string(),
			conversation_id: format!("conv-{i}"),
			chunk_index: 0,
			title: format!("Conversation {i}"),
			content: format!("user: message {i}"),
			message_count: 1,
			created_at: base + Duration::minutes(i as i64),
		})
		.collect::<Vec<_>>();

	store.put_state(ImportProfileState::new("u1", base)).await;
	store.replace_chunks("u1", &chunks, 100).await.expect("Seed failed.");

	chunks.into_iter().map(|chunk| chunk.chunk_id).collect()
}

fn processor(cfg: Config, store: &Arc<MemoryStore>, embedding: &Arc<StubEmbedding>) -> EmbeddingProcessor {
	EmbeddingProcessor::new(cfg, store.clone(), embedding.clone())
}

#[tokio::test]
async fn interrupted_passes_resume_without_rework() {
	let store = Arc::new(MemoryStore::new());
	let embedding = Arc::new(StubEmbedding::new());
	let ids = seed(&store, 5).await;
	let mut cfg = test_config();

	cfg.embedding_pass.batch_size = 2;
	cfg.embedding_pass.max_batches_per_pass = Some(1);

	let worker = processor(cfg, &store, &embedding);
	let mut outcomes = Vec::new();

	for _ in 0..4 {
		let report = worker.run_pass("u1").await.expect("Pass failed.");

		outcomes.push((report.processed, report.outcome));
	}

	assert_eq!(outcomes, vec![
		(2, PassOutcome::Pending),
		(2, PassOutcome::Pending),
		(1, PassOutcome::Pending),
		(0, PassOutcome::Complete),
	]);

	for id in ids {
		assert_eq!(store.embedding_writes(id).await, 1);
		assert_eq!(store.embedding(id).await.map(|v| v.len()), Some(VECTOR_DIM as usize));
	}

	let state = store.import_state("u1").await.expect("Read failed.").expect("Missing state.");

	assert_eq!(state.embedding_status, EmbeddingStatus::Complete);
	assert_eq!(state.embedding_progress, 100);
	assert_eq!(state.processed_chunks, 5);
}

#[tokio::test]
async fn newest_chunks_are_embedded_first() {
	let store = Arc::new(MemoryStore::new());
	let embedding = Arc::new(StubEmbedding::new());
	let ids = seed(&store, 4).await;
	let mut cfg = test_config();

	cfg.embedding_pass.batch_size = 2;
	cfg.embedding_pass.max_batches_per_pass = Some(1);

	processor(cfg, &store, &embedding).run_pass("u1").await.expect("Pass failed.");

	assert!(store.embedding(ids[3]).await.is_some());
	assert!(store.embedding(ids[2]).await.is_some());
	assert!(store.embedding(ids[0]).await.is_none());

	let state = store.import_state("u1").await.expect("Read failed.").expect("Missing state.");

	assert_eq!(state.embedding_status, EmbeddingStatus::Pending);
	assert_eq!(state.embedding_progress, 50);
}

#[tokio::test]
async fn exhausted_time_budget_leaves_user_pending() {
	let store = Arc::new(MemoryStore::new());
	let embedding = Arc::new(StubEmbedding::new());

	seed(&store, 3).await;

	let mut cfg = test_config();

	cfg.embedding_pass.time_budget_seconds = 0;

	let report = processor(cfg, &store, &embedding).run_pass("u1").await.expect("Pass failed.");

	assert_eq!(report.outcome, PassOutcome::Pending);
	assert_eq!(report.batches, 0);
	assert_eq!(embedding.calls.load(Ordering::SeqCst), 0);

	let state = store.import_state("u1").await.expect("Read failed.").expect("Missing state.");

	assert_eq!(state.embedding_status, EmbeddingStatus::Pending);
}

#[tokio::test]
async fn throttled_batches_are_retried() {
	let store = Arc::new(MemoryStore::new());
	let embedding = Arc::new(StubEmbedding::new());

	embedding.throttle_calls.store(2, Ordering::SeqCst);
	seed(&store, 2).await;

	let report =
		processor(test_config(), &store, &embedding).run_pass("u1").await.expect("Pass failed.");

	assert_eq!(report.processed, 2);
	assert_eq!(report.outcome, PassOutcome::Complete);
	assert_eq!(embedding.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn failed_batches_are_skipped_for_the_rest_of_the_pass() {
	let store = Arc::new(MemoryStore::new());
	let embedding = Arc::new(StubEmbedding { fail_hard: true, ..StubEmbedding::new() });
	let ids = seed(&store, 3).await;
	let mut cfg = test_config();

	cfg.embedding_pass.batch_size = 2;

	let report = processor(cfg, &store, &embedding).run_pass("u1").await.expect("Pass failed.");

	assert_eq!(report.processed, 0);
	assert_eq!(report.failed, 3);
	assert_eq!(report.batches, 2);
	assert_eq!(report.outcome, PassOutcome::Complete);

	for id in ids {
		assert!(store.embedding(id).await.is_none());
	}
}

#[tokio::test]
async fn vectors_with_wrong_dimensions_are_not_written() {
	let store = Arc::new(MemoryStore::new());
	let embedding = Arc::new(StubEmbedding { dim: 2, ..StubEmbedding::new() });
	let ids = seed(&store, 2).await;
	let report =
		processor(test_config(), &store, &embedding).run_pass("u1").await.expect("Pass failed.");

	assert_eq!(report.processed, 0);
	assert_eq!(report.failed, 2);

	for id in ids {
		assert_eq!(store.embedding_writes(id).await, 0);
	}
}

/// Refuses embedding writes for one chunk, as if its row could never be filled.
struct RefusingStore {
	inner: MemoryStore,
	refused: Uuid,
}

impl ImportStore for RefusingStore {
	fn import_state<'a>(
		&'a self,
		user_id: &'a str,
	) -> BoxFuture<'a, StorageResult<Option<ImportProfileState>>> {
		self.inner.import_state(user_id)
	}

	fn begin_import<'a>(&'a self, args: BeginImport<'a>) -> BoxFuture<'a, StorageResult<()>> {
		self.inner.begin_import(args)
	}

	fn update_import_progress<'a>(
		&'a self,
		user_id: &'a str,
		stage: &'a str,
		percent: i32,
	) -> BoxFuture<'a, StorageResult<()>> {
		self.inner.update_import_progress(user_id, stage, percent)
	}

	fn fail_import<'a>(&'a self, user_id: &'a str, error: &'a str) -> BoxFuture<'a, StorageResult<()>> {
		self.inner.fail_import(user_id, error)
	}

	fn complete_import<'a>(&'a self, args: ImportCompletion<'a>) -> BoxFuture<'a, StorageResult<()>> {
		self.inner.complete_import(args)
	}

	fn update_embedding_state<'a>(
		&'a self,
		args: EmbeddingUpdate<'a>,
	) -> BoxFuture<'a, StorageResult<()>> {
		self.inner.update_embedding_state(args)
	}

	fn users_pending_embeddings<'a>(&'a self, limit: i64) -> BoxFuture<'a, StorageResult<Vec<String>>> {
		self.inner.users_pending_embeddings(limit)
	}

	fn replace_chunks<'a>(
		&'a self,
		user_id: &'a str,
		chunks: &'a [NewChunk],
		batch_size: usize,
	) -> BoxFuture<'a, StorageResult<u64>> {
		self.inner.replace_chunks(user_id, chunks, batch_size)
	}

	fn pending_chunks<'a>(
		&'a self,
		user_id: &'a str,
		limit: i64,
		exclude: &'a [Uuid],
	) -> BoxFuture<'a, StorageResult<Vec<PendingChunk>>> {
		self.inner.pending_chunks(user_id, limit, exclude)
	}

	fn attach_embedding<'a>(
		&'a self,
		chunk_id: Uuid,
		embedding: &'a [f32],
	) -> BoxFuture<'a, StorageResult<bool>> {
		if chunk_id == self.refused {
			return Box::pin(async { Ok(false) });
		}

		self.inner.attach_embedding(chunk_id, embedding)
	}

	fn chunk_counts<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, StorageResult<ChunkCounts>> {
		self.inner.chunk_counts(user_id)
	}

	fn save_profile<'a>(&'a self, profile: &'a ProfileRecord) -> BoxFuture<'a, StorageResult<()>> {
		self.inner.save_profile(profile)
	}

	fn profile<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, StorageResult<Option<ProfileRecord>>> {
		self.inner.profile(user_id)
	}
}

#[tokio::test]
async fn unwritable_chunks_do_not_stall_the_pass() {
	let inner = MemoryStore::new();
	let ids = seed(&inner, 3).await;
	let store = Arc::new(RefusingStore { inner, refused: ids[1] });
	let embedding = Arc::new(StubEmbedding::new());
	let mut cfg = test_config();

	cfg.embedding_pass.batch_size = 1;
	cfg.embedding_pass.max_batches_per_pass = Some(10);

	let report = EmbeddingProcessor::new(cfg, store.clone(), embedding.clone())
		.run_pass("u1")
		.await
		.expect("Pass failed.");

	assert_eq!(report.processed, 2);
	assert_eq!(report.failed, 1);
	assert_eq!(report.batches, 3);
	assert_eq!(report.outcome, PassOutcome::Complete);
	assert!(store.inner.embedding(ids[1]).await.is_none());
}
