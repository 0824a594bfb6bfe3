use sqlx::{PgPool, postgres::PgPoolOptions};
use uuid::Uuid;

use crate::{
	BoxFuture, ImportStore, Result,
	models::{
		BeginImport, ChunkCounts, EmbeddingUpdate, ImportCompletion, ImportProfileState,
		NewChunk, PendingChunk, ProfileRecord,
	},
	queries, schema,
};

const SCHEMA_LOCK_ID: i64 = 7_120_114;

pub struct Db {
	pub pool: PgPool,
}
impl Db {
	pub async fn connect(cfg: &persona_config::Postgres) -> Result<Self> {
		let pool =
			PgPoolOptions::new().max_connections(cfg.pool_max_conns).connect(&cfg.dsn).await?;

		Ok(Self { pool })
	}

	pub async fn ensure_schema(&self, vector_dim: u32) -> Result<()> {
		let sql = schema::render_schema(vector_dim);
		// Advisory locks are held per connection, so scope the lock to a single transaction.
		let mut tx = self.pool.begin().await?;

		sqlx::query("SELECT pg_advisory_xact_lock($1)")
			.bind(SCHEMA_LOCK_ID)
			.execute(&mut *tx)
			.await?;

		for statement in sql.split(';') {
			let trimmed = statement.trim();

			if trimmed.is_empty() {
				continue;
			}

			sqlx::query(trimmed).execute(&mut *tx).await?;
		}

		tx.commit().await?;

		Ok(())
	}

	async fn replace_chunks_tx(
		&self,
		user_id: &str,
		chunks: &[NewChunk],
		batch_size: usize,
	) -> Result<u64> {
		let mut tx = self.pool.begin().await?;
		let removed = queries::delete_chunks(&mut *tx, user_id).await?;
		let mut inserted = 0;

		for batch in chunks.chunks(batch_size.max(1)) {
			inserted += queries::insert_chunks(&mut *tx, batch).await?;
		}

		tx.commit().await?;

		tracing::debug!(user_id, removed, inserted, "Replaced conversation chunks.");

		Ok(inserted)
	}
}

impl ImportStore for Db {
	fn import_state<'a>(
		&'a self,
		user_id: &'a str,
	) -> BoxFuture<'a, Result<Option<ImportProfileState>>> {
		Box::pin(queries::fetch_import_state(&self.pool, user_id))
	}

	fn begin_import<'a>(&'a self, args: BeginImport<'a>) -> BoxFuture<'a, Result<()>> {
		Box::pin(queries::begin_import(&self.pool, args))
	}

	fn update_import_progress<'a>(
		&'a self,
		user_id: &'a str,
		stage: &'a str,
		percent: i32,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(queries::update_import_progress(&self.pool, user_id, stage, percent))
	}

	fn fail_import<'a>(&'a self, user_id: &'a str, error: &'a str) -> BoxFuture<'a, Result<()>> {
		Box::pin(queries::fail_import(&self.pool, user_id, error))
	}

	fn complete_import<'a>(&'a self, args: ImportCompletion<'a>) -> BoxFuture<'a, Result<()>> {
		Box::pin(queries::complete_import(&self.pool, args))
	}

	fn update_embedding_state<'a>(
		&'a self,
		args: EmbeddingUpdate<'a>,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(queries::update_embedding_state(&self.pool, args))
	}

	fn users_pending_embeddings<'a>(&'a self, limit: i64) -> BoxFuture<'a, Result<Vec<String>>> {
		Box::pin(queries::users_pending_embeddings(&self.pool, limit))
	}

	fn replace_chunks<'a>(
		&'a self,
		user_id: &'a str,
		chunks: &'a [NewChunk],
		batch_size: usize,
	) -> BoxFuture<'a, Result<u64>> {
		Box::pin(self.replace_chunks_tx(user_id, chunks, batch_size))
	}

	fn pending_chunks<'a>(
		&'a self,
		user_id: &'a str,
		limit: i64,
		exclude: &'a [Uuid],
	) -> BoxFuture<'a, Result<Vec<PendingChunk>>> {
		Box::pin(queries::fetch_pending_chunks(&self.pool, user_id, limit, exclude))
	}

	fn attach_embedding<'a>(
		&'a self,
		chunk_id: Uuid,
		embedding: &'a [f32],
	) -> BoxFuture<'a, Result<bool>> {
		Box::pin(queries::attach_embedding(&self.pool, chunk_id, embedding))
	}

	fn chunk_counts<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<ChunkCounts>> {
		Box::pin(queries::count_chunks(&self.pool, user_id))
	}

	fn save_profile<'a>(&'a self, profile: &'a ProfileRecord) -> BoxFuture<'a, Result<()>> {
		Box::pin(queries::upsert_profile(&self.pool, profile))
	}

	fn profile<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<Option<ProfileRecord>>> {
		Box::pin(queries::fetch_profile(&self.pool, user_id))
	}
}
