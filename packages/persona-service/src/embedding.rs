//! Time-boxed embedding of persisted conversation chunks.
//!
//! A pass embeds the newest chunks first, in batches, until nothing is left or its wall-clock
//! budget runs out. Chunks without an embedding are the checkpoint: an interrupted pass leaves the
//! user `pending` and the next pass picks up the remaining chunks. Writes only fill empty
//! embeddings, so no chunk is embedded twice.

use std::{
	sync::Arc,
	time::{Duration, Instant},
};

use serde::Serialize;
use tokio::task::JoinSet;
use uuid::Uuid;

use persona_config::Config;
use persona_providers::backoff;
use persona_storage::{
	ImportStore,
	models::{ChunkCounts, EmbeddingStatus, EmbeddingUpdate, PendingChunk},
};

use crate::{EmbeddingProvider, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassOutcome {
	/// No chunk is waiting for an embedding.
	Complete,
	/// The pass stopped early; the user stays queued.
	Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PassReport {
	pub processed: u64,
	pub failed: u64,
	pub batches: u64,
	pub outcome: PassOutcome,
}

pub struct EmbeddingProcessor {
	cfg: Config,
	store: Arc<dyn ImportStore>,
	provider: Arc<dyn EmbeddingProvider>,
}
impl EmbeddingProcessor {
	pub fn new(cfg: Config, store: Arc<dyn ImportStore>, provider: Arc<dyn EmbeddingProvider>) -> Self {
		Self { cfg, store, provider }
	}

	pub async fn run_pass(&self, user_id: &str) -> Result<PassReport> {
		let pass = &self.cfg.embedding_pass;
		let budget = Duration::from_secs(pass.time_budget_seconds);
		let started = Instant::now();
		let counts = self.store.chunk_counts(user_id).await?;
		let mut embedded = counts.embedded;
		let mut skipped: Vec<Uuid> = Vec::new();
		let mut since_checkpoint = 0_usize;
		let mut report =
			PassReport { processed: 0, failed: 0, batches: 0, outcome: PassOutcome::Pending };

		self.save_state(user_id, EmbeddingStatus::Processing, counts).await?;

		loop {
			if let Some(max_batches) = pass.max_batches_per_pass
				&& report.batches >= max_batches as u64
			{
				break;
			}
			if started.elapsed() >= budget {
				break;
			}

			let batch =
				self.store.pending_chunks(user_id, pass.batch_size as i64, &skipped).await?;

			if batch.is_empty() {
				report.outcome = PassOutcome::Complete;

				break;
			}

			report.batches += 1;

			let written = match self.embed_batch(&batch).await {
				Ok(vectors) => self.write_batch(user_id, &batch, vectors, &mut skipped).await,
				Err(err) => {
					tracing::warn!(
						error = %err,
						user_id,
						chunks = batch.len(),
						"Embedding batch failed. Skipping its chunks for this pass."
					);
					skipped.extend(batch.iter().map(|chunk| chunk.chunk_id));

					0
				},
			};

			report.processed += written;
			report.failed = skipped.len() as u64;
			embedded += written as i64;
			since_checkpoint += written as usize;

			if since_checkpoint >= pass.progress_interval {
				since_checkpoint = 0;

				self.save_state(
					user_id,
					EmbeddingStatus::Processing,
					ChunkCounts { total: counts.total, embedded },
				)
				.await?;
			}

			tokio::time::sleep(Duration::from_millis(pass.inter_batch_delay_ms)).await;
		}

		let counts = self.store.chunk_counts(user_id).await?;

		match report.outcome {
			PassOutcome::Complete => {
				if !skipped.is_empty() {
					tracing::warn!(
						user_id,
						skipped = skipped.len(),
						"Embedding pass finished with chunks left unembedded."
					);
				}

				self.store
					.update_embedding_state(EmbeddingUpdate {
						user_id,
						status: EmbeddingStatus::Complete,
						progress: 100,
						processed_chunks: counts.embedded,
					})
					.await?;
			},
			PassOutcome::Pending => {
				self.save_state(user_id, EmbeddingStatus::Pending, counts).await?;
			},
		}

		tracing::info!(
			user_id,
			processed = report.processed,
			failed = report.failed,
			batches = report.batches,
			outcome = ?report.outcome,
			elapsed_ms = started.elapsed().as_millis() as u64,
			"Embedding pass finished."
		);

		Ok(report)
	}

	async fn embed_batch(&self, batch: &[PendingChunk]) -> persona_providers::Result<Vec<Vec<f32>>> {
		let cfg = &self.cfg.providers.embedding;
		let provider = self.provider.as_ref();
		let texts = batch
			.iter()
			.map(|chunk| truncate_chars(&chunk.content, cfg.max_input_chars))
			.collect::<Vec<_>>();
		let texts = texts.as_slice();
		let vectors = backoff::retry_throttled(&self.cfg.providers.retry, "embedding", || {
			provider.embed(cfg, texts)
		})
		.await?;

		if vectors.len() != batch.len() {
			return Err(persona_providers::Error::InvalidResponse {
				message: format!(
					"Embedding provider returned {} vectors for {} inputs.",
					vectors.len(),
					batch.len()
				),
			});
		}

		Ok(vectors)
	}

	/// Writes vectors in parallel. Returns how many chunks received an embedding.
	async fn write_batch(
		&self,
		user_id: &str,
		batch: &[PendingChunk],
		vectors: Vec<Vec<f32>>,
		skipped: &mut Vec<Uuid>,
	) -> u64 {
		let dimensions = self.cfg.providers.embedding.dimensions as usize;
		let mut writes = JoinSet::new();

		for (chunk, vector) in batch.iter().zip(vectors) {
			if vector.len() != dimensions {
				tracing::warn!(
					user_id,
					chunk_id = %chunk.chunk_id,
					expected = dimensions,
					actual = vector.len(),
					"Embedding dimension mismatch. Skipping chunk."
				);
				skipped.push(chunk.chunk_id);

				continue;
			}

			let store = self.store.clone();
			let chunk_id = chunk.chunk_id;

			writes.spawn(async move {
				let result = store.attach_embedding(chunk_id, &vector).await;

				(chunk_id, result)
			});
		}

		let mut written = 0;

		while let Some(joined) = writes.join_next().await {
			match joined {
				Ok((_, Ok(true))) => written += 1,
				Ok((chunk_id, Ok(false))) => {
					tracing::debug!(%chunk_id, "Chunk was not written. Skipping it for this pass.");
					skipped.push(chunk_id);
				},
				Ok((chunk_id, Err(err))) => {
					tracing::warn!(error = %err, user_id, %chunk_id, "Embedding write failed.");
					skipped.push(chunk_id);
				},
				Err(err) => {
					tracing::error!(error = %err, user_id, "Embedding write task failed.");
				},
			}
		}

		written
	}

	async fn save_state(
		&self,
		user_id: &str,
		status: EmbeddingStatus,
		counts: ChunkCounts,
	) -> Result<()> {
		self.store
			.update_embedding_state(EmbeddingUpdate {
				user_id,
				status,
				progress: counts.percent(),
				processed_chunks: counts.embedded,
			})
			.await?;

		Ok(())
	}
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
	match text.char_indices().nth(max_chars) {
		Some((cut, _)) => text[..cut].to_string(),
		None => text.to_string(),
	}
}
