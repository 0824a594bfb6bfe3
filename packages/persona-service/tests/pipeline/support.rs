use std::{
	sync::{
		Arc, Mutex,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration,
};

use serde_json::{Map, Value, json};

use persona_config::{
	Config, EmbeddingPass, EmbeddingProviderConfig, Import, LlmProviderConfig, MemoryServiceConfig,
	Objects, Postgres, Providers as ProviderConfigs, RateLimit, RetryPolicy, Sampling, Security, Service,
	Storage, Upload,
};
use persona_providers::{
	Error as ProviderError,
	memory::{MemoryQuery, MemoryResponse},
};
use persona_service::{
	EmbeddingProvider, Error, ImportJob, JobDispatcher, LlmProvider, MemoryProvider, PersonaService,
	Providers, Result,
};
use persona_storage::{BoxFuture, MemoryObjectStore, MemoryStore};

pub const VECTOR_DIM: u32 = 3;

pub const PROFILE_JSON: &str = r#"{
	"soul": { "communication_style": "Direct", "personality_traits": ["curious", "warm"] },
	"identity": { "ai_name": "Juniper", "archetype": "The Curious Builder" },
	"user": { "name": "Sam", "interests": ["climbing"] },
	"agents": { "response_style": "Concise" },
	"tools": { "likely_usage": ["coding"] }
}"#;

pub fn test_config() -> Config {
	Config {
		service: Service { http_bind: "127.0.0.1:0".to_string(), log_level: "info".to_string() },
		storage: Storage {
			postgres: Postgres { dsn: "postgres://unused".to_string(), pool_max_conns: 1 },
			objects: Objects { root: "unused".to_string() },
		},
		providers: ProviderConfigs {
			embedding: EmbeddingProviderConfig {
				api_base: "http://127.0.0.1:1".to_string(),
				api_key: "test-key".to_string(),
				path: "/v1/embeddings".to_string(),
				model: "test".to_string(),
				dimensions: VECTOR_DIM,
				timeout_ms: 1_000,
				default_headers: Map::new(),
				max_input_chars: 8_000,
			},
			llm: LlmProviderConfig {
				api_base: "http://127.0.0.1:1".to_string(),
				api_key: "test-key".to_string(),
				path: "/v1/chat/completions".to_string(),
				model: "test".to_string(),
				temperature: 0.7,
				max_tokens: 8_192,
				timeout_ms: 1_000,
				default_headers: Map::new(),
			},
			memory: MemoryServiceConfig {
				api_base: "http://127.0.0.1:1".to_string(),
				query_timeout_ms: 1_000,
				health_timeout_ms: 200,
			},
			retry: RetryPolicy { max_retries: 3, base_delay_ms: 1 },
		},
		upload: Upload::default(),
		sampling: Sampling::default(),
		import: Import { accept_timeout_ms: 200, ..Import::default() },
		embedding_pass: EmbeddingPass { inter_batch_delay_ms: 0, ..EmbeddingPass::default() },
		security: Security::default(),
		rate_limit: RateLimit::default(),
	}
}

/// Returns one vector per input, failing with throttling for the first `throttle_calls` calls.
#[derive(Default)]
pub struct StubEmbedding {
	pub dim: usize,
	pub throttle_calls: AtomicUsize,
	pub fail_hard: bool,
	pub calls: AtomicUsize,
}
impl StubEmbedding {
	pub fn new() -> Self {
		Self { dim: VECTOR_DIM as usize, ..Self::default() }
	}
}

impl EmbeddingProvider for StubEmbedding {
	fn embed<'a>(
		&'a self,
		_cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, persona_providers::Result<Vec<Vec<f32>>>> {
		Box::pin(async move {
			self.calls.fetch_add(1, Ordering::SeqCst);

			if self.fail_hard {
				return Err(ProviderError::Status { status: 500, message: "boom".to_string() });
			}

			let throttled = self
				.throttle_calls
				.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
				.is_ok();

			if throttled {
				return Err(ProviderError::Throttled { message: "slow down".to_string() });
			}

			Ok(texts.iter().map(|text| vec![text.len() as f32; self.dim]).collect())
		})
	}
}

pub struct StubLlm {
	pub reply: std::result::Result<String, u16>,
	pub calls: AtomicUsize,
}
impl StubLlm {
	pub fn replying(reply: &str) -> Self {
		Self { reply: Ok(reply.to_string()), calls: AtomicUsize::new(0) }
	}

	pub fn failing(status: u16) -> Self {
		Self { reply: Err(status), calls: AtomicUsize::new(0) }
	}
}

impl LlmProvider for StubLlm {
	fn complete<'a>(
		&'a self,
		_cfg: &'a LlmProviderConfig,
		_system: &'a str,
		_user: &'a str,
	) -> BoxFuture<'a, persona_providers::Result<String>> {
		Box::pin(async move {
			self.calls.fetch_add(1, Ordering::SeqCst);

			match &self.reply {
				Ok(reply) => Ok(reply.clone()),
				Err(status) =>
					Err(ProviderError::Status { status: *status, message: "failed".to_string() }),
			}
		})
	}
}

pub struct StubMemory {
	pub response: MemoryResponse,
	pub healthy: bool,
}

impl MemoryProvider for StubMemory {
	fn query<'a>(&'a self, _query: MemoryQuery<'a>) -> BoxFuture<'a, MemoryResponse> {
		let response = self.response.clone();

		Box::pin(async move { response })
	}

	fn health(&self) -> BoxFuture<'_, bool> {
		let healthy = self.healthy;

		Box::pin(async move { healthy })
	}
}

pub enum DispatchMode {
	Record,
	Closed,
	Hang,
}

pub struct TestDispatcher {
	pub mode: DispatchMode,
	pub jobs: Mutex<Vec<ImportJob>>,
}
impl TestDispatcher {
	pub fn new(mode: DispatchMode) -> Self {
		Self { mode, jobs: Mutex::new(Vec::new()) }
	}

	pub fn take_jobs(&self) -> Vec<ImportJob> {
		std::mem::take(&mut *self.jobs.lock().expect("Dispatcher lock poisoned."))
	}
}

impl JobDispatcher for TestDispatcher {
	fn dispatch(&self, job: ImportJob) -> BoxFuture<'_, Result<()>> {
		Box::pin(async move {
			match self.mode {
				DispatchMode::Record => {
					self.jobs.lock().expect("Dispatcher lock poisoned.").push(job);

					Ok(())
				},
				DispatchMode::Closed =>
					Err(Error::Dispatch { message: "Import queue is closed.".to_string() }),
				DispatchMode::Hang => {
					tokio::time::sleep(Duration::from_secs(5)).await;

					Ok(())
				},
			}
		})
	}
}

pub struct Harness {
	pub service: PersonaService,
	pub store: Arc<MemoryStore>,
	pub objects: Arc<MemoryObjectStore>,
	pub embedding: Arc<StubEmbedding>,
	pub llm: Arc<StubLlm>,
	pub dispatcher: Arc<TestDispatcher>,
}

pub fn harness(llm: StubLlm, mode: DispatchMode) -> Harness {
	harness_with(test_config(), llm, mode, MemoryResponse::unavailable("offline"))
}

pub fn harness_with(
	cfg: Config,
	llm: StubLlm,
	mode: DispatchMode,
	memory: MemoryResponse,
) -> Harness {
	let store = Arc::new(MemoryStore::new());
	let objects = Arc::new(MemoryObjectStore::new());
	let embedding = Arc::new(StubEmbedding::new());
	let llm = Arc::new(llm);
	let dispatcher = Arc::new(TestDispatcher::new(mode));
	let providers = Providers::new(
		embedding.clone(),
		llm.clone(),
		Arc::new(StubMemory { response: memory, healthy: true }),
	);
	let service =
		PersonaService::new(cfg, store.clone(), objects.clone(), providers, dispatcher.clone());

	Harness { service, store, objects, embedding, llm, dispatcher }
}

/// A message-tree export with `conversations` linear conversations of `messages` turns each.
pub fn export_json(conversations: usize, messages: usize) -> Vec<u8> {
	let items = (0..conversations)
		.map(|c| {
			let mut mapping = Map::new();
			let mut parent: Option<String> = None;

			for m in 0..messages {
				let id = format!("c{c}-m{m}");
				let role = if m % 2 == 0 { "user" } else { "assistant" };

				mapping.insert(
					id.clone(),
					json!({
						"message": {
							"author": { "role": role },
							"content": { "content_type": "text", "parts": [format!("conversation {c} message {m}")] },
							"create_time": 1_700_000_000.0 + (c * 100 + m) as f64
						},
						"parent": parent,
					}),
				);

				parent = Some(id);
			}

			json!({
				"id": format!("conv-{c}"),
				"title": format!("Conversation {c}"),
				"create_time": 1_700_000_000.0 + (c * 100) as f64,
				"current_node": parent,
				"mapping": Value::Object(mapping),
			})
		})
		.collect::<Vec<_>>();

	Value::Array(items).to_string().into_bytes()
}
