use sqlx::{PgExecutor, Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	Error, Result,
	models::{
		BeginImport, ChunkCounts, EmbeddingUpdate, ImportCompletion, ImportProfileState,
		ImportProfileStateRow, NewChunk, PendingChunk, ProfileRecord,
	},
};

const STATE_COLUMNS: &str = "\
user_id,
	import_status,
	import_stage,
	progress_percent,
	import_error,
	processing_started_at,
	storage_path,
	file_type,
	embedding_status,
	embedding_progress,
	processed_chunks,
	total_chunks,
	total_conversations,
	total_messages,
	updated_at";

pub fn vector_to_pg(vec: &[f32]) -> String {
	let mut out = String::with_capacity(vec.len() * 8);

	out.push('[');

	for (i, value) in vec.iter().enumerate() {
		if i > 0 {
			out.push(',');
		}

		out.push_str(&value.to_string());
	}

	out.push(']');

	out
}

pub async fn fetch_import_state<'e, E>(
	executor: E,
	user_id: &str,
) -> Result<Option<ImportProfileState>>
where
	E: PgExecutor<'e>,
{
	let sql = format!("SELECT\n\t{STATE_COLUMNS}\nFROM import_profile_state\nWHERE user_id = $1");
	let row: Option<ImportProfileStateRow> =
		sqlx::query_as(&sql).bind(user_id).fetch_optional(executor).await?;

	row.map(ImportProfileState::try_from).transpose()
}

pub async fn begin_import<'e, E>(executor: E, args: BeginImport<'_>) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO import_profile_state (
	user_id,
	import_status,
	import_stage,
	progress_percent,
	import_error,
	processing_started_at,
	storage_path,
	file_type,
	embedding_status,
	embedding_progress,
	processed_chunks,
	total_chunks,
	total_conversations,
	total_messages,
	updated_at
)
VALUES ($1, 'processing', 'Starting...', 0, NULL, $2, $3, $4, 'none', 0, 0, 0, 0, 0, $2)
ON CONFLICT (user_id) DO UPDATE
SET
	import_status = 'processing',
	import_stage = 'Starting...',
	progress_percent = 0,
	import_error = NULL,
	processing_started_at = EXCLUDED.processing_started_at,
	storage_path = EXCLUDED.storage_path,
	file_type = EXCLUDED.file_type,
	embedding_status = 'none',
	embedding_progress = 0,
	processed_chunks = 0,
	total_chunks = 0,
	updated_at = EXCLUDED.updated_at",
	)
	.bind(args.user_id)
	.bind(args.now)
	.bind(args.storage_path)
	.bind(args.file_type)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn update_import_progress<'e, E>(
	executor: E,
	user_id: &str,
	stage: &str,
	percent: i32,
) -> Result<()>
where
	E: PgExecutor<'e>,
{
	let result = sqlx::query(
		"\
UPDATE import_profile_state
SET import_stage = $2, progress_percent = $3, updated_at = $4
WHERE user_id = $1",
	)
	.bind(user_id)
	.bind(stage)
	.bind(percent.clamp(0, 100))
	.bind(OffsetDateTime::now_utc())
	.execute(executor)
	.await?;

	require_row(result.rows_affected(), user_id)
}

pub async fn fail_import<'e, E>(executor: E, user_id: &str, error: &str) -> Result<()>
where
	E: PgExecutor<'e>,
{
	let result = sqlx::query(
		"\
UPDATE import_profile_state
SET import_status = 'failed', import_stage = 'Failed', import_error = $2, updated_at = $3
WHERE user_id = $1",
	)
	.bind(user_id)
	.bind(error)
	.bind(OffsetDateTime::now_utc())
	.execute(executor)
	.await?;

	require_row(result.rows_affected(), user_id)
}

pub async fn complete_import<'e, E>(executor: E, args: ImportCompletion<'_>) -> Result<()>
where
	E: PgExecutor<'e>,
{
	let result = sqlx::query(
		"\
UPDATE import_profile_state
SET
	import_status = 'complete',
	import_stage = 'Complete',
	progress_percent = 100,
	import_error = NULL,
	embedding_status = CASE WHEN $2 > 0 THEN 'pending' ELSE 'complete' END,
	embedding_progress = CASE WHEN $2 > 0 THEN 0 ELSE 100 END,
	processed_chunks = 0,
	total_chunks = $2,
	total_conversations = $3,
	total_messages = $4,
	updated_at = $5
WHERE user_id = $1",
	)
	.bind(args.user_id)
	.bind(args.total_chunks)
	.bind(args.total_conversations)
	.bind(args.total_messages)
	.bind(OffsetDateTime::now_utc())
	.execute(executor)
	.await?;

	require_row(result.rows_affected(), args.user_id)
}

pub async fn update_embedding_state<'e, E>(executor: E, args: EmbeddingUpdate<'_>) -> Result<()>
where
	E: PgExecutor<'e>,
{
	let result = sqlx::query(
		"\
UPDATE import_profile_state
SET embedding_status = $2, embedding_progress = $3, processed_chunks = $4, updated_at = $5
WHERE user_id = $1",
	)
	.bind(args.user_id)
	.bind(args.status.as_str())
	.bind(args.progress.clamp(0, 100))
	.bind(args.processed_chunks)
	.bind(OffsetDateTime::now_utc())
	.execute(executor)
	.await?;

	require_row(result.rows_affected(), args.user_id)
}

pub async fn users_pending_embeddings<'e, E>(executor: E, limit: i64) -> Result<Vec<String>>
where
	E: PgExecutor<'e>,
{
	let users: Vec<(String,)> = sqlx::query_as(
		"\
SELECT user_id
FROM import_profile_state
WHERE import_status = 'complete'
	AND embedding_status IN ('pending', 'processing')
ORDER BY updated_at ASC
LIMIT $1",
	)
	.bind(limit)
	.fetch_all(executor)
	.await?;

	Ok(users.into_iter().map(|(user_id,)| user_id).collect())
}

pub async fn delete_chunks<'e, E>(executor: E, user_id: &str) -> Result<u64>
where
	E: PgExecutor<'e>,
{
	let result = sqlx::query("DELETE FROM conversation_chunks WHERE user_id = $1")
		.bind(user_id)
		.execute(executor)
		.await?;

	Ok(result.rows_affected())
}

pub async fn insert_chunks<'e, E>(executor: E, chunks: &[NewChunk]) -> Result<u64>
where
	E: PgExecutor<'e>,
{
	if chunks.is_empty() {
		return Ok(0);
	}

	let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
		"\
INSERT INTO conversation_chunks (
	chunk_id,
	user_id,
	conversation_id,
	chunk_index,
	title,
	content,
	message_count,
	created_at
) ",
	);

	builder.push_values(chunks, |mut row, chunk| {
		row.push_bind(chunk.chunk_id)
			.push_bind(chunk.user_id.as_str())
			.push_bind(chunk.conversation_id.as_str())
			.push_bind(chunk.chunk_index)
			.push_bind(chunk.title.as_str())
			.push_bind(chunk.content.as_str())
			.push_bind(chunk.message_count)
			.push_bind(chunk.created_at);
	});

	let result = builder.build().execute(executor).await?;

	Ok(result.rows_affected())
}

pub async fn fetch_pending_chunks<'e, E>(
	executor: E,
	user_id: &str,
	limit: i64,
	exclude: &[Uuid],
) -> Result<Vec<PendingChunk>>
where
	E: PgExecutor<'e>,
{
	let rows = sqlx::query_as(
		"\
SELECT chunk_id, content, created_at
FROM conversation_chunks
WHERE user_id = $1
	AND embedding IS NULL
	AND NOT (chunk_id = ANY($2))
ORDER BY created_at DESC, chunk_id ASC
LIMIT $3",
	)
	.bind(user_id)
	.bind(exclude)
	.bind(limit)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}

pub async fn attach_embedding<'e, E>(executor: E, chunk_id: Uuid, embedding: &[f32]) -> Result<bool>
where
	E: PgExecutor<'e>,
{
	let vec_text = vector_to_pg(embedding);
	let result = sqlx::query(
		"\
UPDATE conversation_chunks
SET embedding = $2::text::vector, embedded_at = $3
WHERE chunk_id = $1 AND embedding IS NULL",
	)
	.bind(chunk_id)
	.bind(vec_text.as_str())
	.bind(OffsetDateTime::now_utc())
	.execute(executor)
	.await?;

	Ok(result.rows_affected() == 1)
}

pub async fn count_chunks<'e, E>(executor: E, user_id: &str) -> Result<ChunkCounts>
where
	E: PgExecutor<'e>,
{
	let (total, embedded): (i64, i64) = sqlx::query_as(
		"\
SELECT
	COUNT(*)::bigint,
	COUNT(embedding)::bigint
FROM conversation_chunks
WHERE user_id = $1",
	)
	.bind(user_id)
	.fetch_one(executor)
	.await?;

	Ok(ChunkCounts { total, embedded })
}

pub async fn upsert_profile<'e, E>(executor: E, profile: &ProfileRecord) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO user_profiles (
	user_id,
	source,
	ai_name,
	archetype,
	sections,
	profile_text,
	generated_at
)
VALUES ($1, $2, $3, $4, $5, $6, $7)
ON CONFLICT (user_id) DO UPDATE
SET
	source = EXCLUDED.source,
	ai_name = EXCLUDED.ai_name,
	archetype = EXCLUDED.archetype,
	sections = EXCLUDED.sections,
	profile_text = EXCLUDED.profile_text,
	generated_at = EXCLUDED.generated_at",
	)
	.bind(profile.user_id.as_str())
	.bind(profile.source.as_str())
	.bind(profile.ai_name.as_deref())
	.bind(profile.archetype.as_deref())
	.bind(&profile.sections)
	.bind(profile.profile_text.as_str())
	.bind(profile.generated_at)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn fetch_profile<'e, E>(executor: E, user_id: &str) -> Result<Option<ProfileRecord>>
where
	E: PgExecutor<'e>,
{
	let row = sqlx::query_as(
		"\
SELECT user_id, source, ai_name, archetype, sections, profile_text, generated_at
FROM user_profiles
WHERE user_id = $1",
	)
	.bind(user_id)
	.fetch_optional(executor)
	.await?;

	Ok(row)
}

fn require_row(affected: u64, user_id: &str) -> Result<()> {
	if affected == 0 {
		return Err(Error::NotFound(format!("No import state for user {user_id}.")));
	}

	Ok(())
}
