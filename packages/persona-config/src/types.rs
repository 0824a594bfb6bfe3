use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	#[serde(default)]
	pub upload: Upload,
	#[serde(default)]
	pub sampling: Sampling,
	#[serde(default)]
	pub import: Import,
	#[serde(default)]
	pub embedding_pass: EmbeddingPass,
	#[serde(default)]
	pub security: Security,
	#[serde(default)]
	pub rate_limit: RateLimit,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
	pub objects: Objects,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

/// Filesystem-backed object storage for assembled uploads.
#[derive(Debug, Clone, Deserialize)]
pub struct Objects {
	pub root: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
	pub llm: LlmProviderConfig,
	pub memory: MemoryServiceConfig,
	#[serde(default)]
	pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
	/// Inputs longer than this many characters are cut before embedding.
	#[serde(default = "default_max_input_chars")]
	pub max_input_chars: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmProviderConfig {
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	#[serde(default = "default_llm_temperature")]
	pub temperature: f32,
	#[serde(default = "default_llm_max_tokens")]
	pub max_tokens: u32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryServiceConfig {
	pub api_base: String,
	#[serde(default = "default_memory_query_timeout_ms")]
	pub query_timeout_ms: u64,
	#[serde(default = "default_memory_health_timeout_ms")]
	pub health_timeout_ms: u64,
}

/// Backoff applied when a provider reports throttling.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
	pub max_retries: u32,
	pub base_delay_ms: u64,
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self { max_retries: 5, base_delay_ms: 1_000 }
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Upload {
	pub session_ttl_seconds: u64,
	pub max_chunks: u32,
	pub max_upload_bytes: u64,
	pub max_chunk_bytes: usize,
	/// Bytes held across every open upload session.
	pub max_buffered_bytes: u64,
}
impl Default for Upload {
	fn default() -> Self {
		Self {
			session_ttl_seconds: 30 * 60,
			max_chunks: 2_048,
			max_upload_bytes: 2 * 1024 * 1024 * 1024,
			max_chunk_bytes: 16 * 1024 * 1024,
			max_buffered_bytes: 4 * 1024 * 1024 * 1024,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Sampling {
	pub min_messages: usize,
	pub target_tokens: usize,
	pub chars_per_token: usize,
	pub min_selected: usize,
	pub max_selected: usize,
	pub max_message_chars: usize,
}
impl Default for Sampling {
	fn default() -> Self {
		Self {
			min_messages: 4,
			target_tokens: 50_000,
			chars_per_token: 4,
			min_selected: 5,
			max_selected: 50,
			max_message_chars: 2_000,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Import {
	/// A `processing` import older than this is considered stuck and may be superseded.
	pub stuck_threshold_minutes: i64,
	pub accept_timeout_ms: u64,
	pub max_error_chars: usize,
	pub chunk_max_messages: usize,
	pub chunk_max_chars: usize,
	pub insert_batch_size: usize,
}
impl Default for Import {
	fn default() -> Self {
		Self {
			stuck_threshold_minutes: 15,
			accept_timeout_ms: 10_000,
			max_error_chars: 200,
			chunk_max_messages: 15,
			chunk_max_chars: 3_000,
			insert_batch_size: 100,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingPass {
	pub time_budget_seconds: u64,
	pub batch_size: usize,
	pub progress_interval: usize,
	pub inter_batch_delay_ms: u64,
	pub poll_interval_ms: u64,
	pub max_batches_per_pass: Option<usize>,
}
impl Default for EmbeddingPass {
	fn default() -> Self {
		Self {
			time_budget_seconds: 280,
			batch_size: 50,
			progress_interval: 100,
			inter_batch_delay_ms: 500,
			poll_interval_ms: 5_000,
			max_batches_per_pass: None,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Security {
	pub bind_localhost_only: bool,
	pub api_auth_token: Option<String>,
}
impl Default for Security {
	fn default() -> Self {
		Self { bind_localhost_only: true, api_auth_token: None }
	}
}

/// Per-user request quotas, in requests per minute, for each endpoint tier.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimit {
	pub enabled: bool,
	/// Chunk uploads. Bursty, so the quota is the largest.
	pub upload_per_minute: u32,
	/// Import trigger and retry.
	pub expensive_per_minute: u32,
	/// Memory queries and profile reads.
	pub standard_per_minute: u32,
}
impl Default for RateLimit {
	fn default() -> Self {
		Self {
			enabled: true,
			upload_per_minute: 100,
			expensive_per_minute: 20,
			standard_per_minute: 60,
		}
	}
}

fn default_max_input_chars() -> usize {
	8_000
}

fn default_llm_temperature() -> f32 {
	0.7
}

fn default_llm_max_tokens() -> u32 {
	8_192
}

fn default_memory_query_timeout_ms() -> u64 {
	30_000
}

fn default_memory_health_timeout_ms() -> u64 {
	2_000
}
