pub mod embedding;
pub mod import;
pub mod memory;
pub mod profile;
pub mod progress;
pub mod quick_pass;
pub mod redact;
pub mod upload;

mod error;

pub use embedding::{EmbeddingProcessor, PassOutcome, PassReport};
pub use error::{Error, Result};
pub use import::{
	ChannelDispatcher, ImportJob, JobDispatcher, TriggerRequest, TriggerResponse,
	spawn_import_runner,
};
pub use memory::MemoryQueryRequest;
pub use profile::{ChatContext, ProfileResponse};
pub use progress::ProgressResponse;
pub use upload::{ChunkReceipt, ChunkUpload, Reassembler, spawn_upload_sweeper};

use std::sync::Arc;

use persona_config::{Config, EmbeddingProviderConfig, LlmProviderConfig};
use persona_providers::{
	embedding as embedding_api, llm,
	memory::{MemoryClient, MemoryQuery, MemoryResponse},
};
use persona_storage::{BoxFuture, ImportStore, ObjectStore};

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, persona_providers::Result<Vec<Vec<f32>>>>;
}

pub trait LlmProvider
where
	Self: Send + Sync,
{
	fn complete<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		system: &'a str,
		user: &'a str,
	) -> BoxFuture<'a, persona_providers::Result<String>>;
}

/// Access to the external memory service. Implementations degrade instead of failing.
pub trait MemoryProvider
where
	Self: Send + Sync,
{
	fn query<'a>(&'a self, query: MemoryQuery<'a>) -> BoxFuture<'a, MemoryResponse>;

	fn health(&self) -> BoxFuture<'_, bool>;
}

#[derive(Clone)]
pub struct Providers {
	pub embedding: Arc<dyn EmbeddingProvider>,
	pub llm: Arc<dyn LlmProvider>,
	pub memory: Arc<dyn MemoryProvider>,
}
impl Providers {
	pub fn new(
		embedding: Arc<dyn EmbeddingProvider>,
		llm: Arc<dyn LlmProvider>,
		memory: Arc<dyn MemoryProvider>,
	) -> Self {
		Self { embedding, llm, memory }
	}

	/// HTTP-backed providers built from the provider config.
	pub fn from_config(cfg: &Config) -> Result<Self> {
		let http = Arc::new(HttpProviders);
		let memory = Arc::new(MemoryClient::new(&cfg.providers.memory)?);

		Ok(Self { embedding: http.clone(), llm: http, memory })
	}
}

struct HttpProviders;

impl EmbeddingProvider for HttpProviders {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, persona_providers::Result<Vec<Vec<f32>>>> {
		Box::pin(embedding_api::embed(cfg, texts))
	}
}

impl LlmProvider for HttpProviders {
	fn complete<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		system: &'a str,
		user: &'a str,
	) -> BoxFuture<'a, persona_providers::Result<String>> {
		Box::pin(llm::complete(cfg, system, user))
	}
}

impl MemoryProvider for MemoryClient {
	fn query<'a>(&'a self, query: MemoryQuery<'a>) -> BoxFuture<'a, MemoryResponse> {
		Box::pin(async move { MemoryClient::query(self, &query).await })
	}

	fn health(&self) -> BoxFuture<'_, bool> {
		Box::pin(MemoryClient::health(self))
	}
}

/// The import-to-profile pipeline behind the HTTP surface.
pub struct PersonaService {
	pub cfg: Config,
	pub store: Arc<dyn ImportStore>,
	pub objects: Arc<dyn ObjectStore>,
	pub providers: Providers,
	pub uploads: Reassembler,
	pub dispatcher: Arc<dyn JobDispatcher>,
}
impl PersonaService {
	pub fn new(
		cfg: Config,
		store: Arc<dyn ImportStore>,
		objects: Arc<dyn ObjectStore>,
		providers: Providers,
		dispatcher: Arc<dyn JobDispatcher>,
	) -> Self {
		let uploads = Reassembler::new(cfg.upload.clone());

		Self { cfg, store, objects, providers, uploads, dispatcher }
	}
}
