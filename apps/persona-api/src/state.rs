use std::sync::Arc;

use tokio::sync::mpsc;

use persona_service::{
	ChannelDispatcher, PersonaService, Providers, spawn_import_runner, spawn_upload_sweeper,
};
use persona_storage::{Db, FsObjectStore};

use crate::rate_limit::RateLimits;

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<PersonaService>,
	pub limits: Option<Arc<RateLimits>>,
}
impl AppState {
	/// Connects storage and providers, then starts the in-process import runner.
	pub async fn new(config: persona_config::Config) -> color_eyre::Result<Self> {
		let db = Db::connect(&config.storage.postgres).await?;

		db.ensure_schema(config.providers.embedding.dimensions).await?;

		let objects = FsObjectStore::new(&config.storage.objects.root);
		let providers = Providers::from_config(&config)?;
		let (tx, rx) = mpsc::unbounded_channel();
		let service = Arc::new(PersonaService::new(
			config,
			Arc::new(db),
			Arc::new(objects),
			providers,
			Arc::new(ChannelDispatcher::new(tx)),
		));

		spawn_import_runner(service.clone(), rx);
		spawn_upload_sweeper(service.clone());

		Ok(Self::from_service(service))
	}

	pub fn from_service(service: Arc<PersonaService>) -> Self {
		let limits = RateLimits::from_config(&service.cfg.rate_limit).map(Arc::new);

		Self { service, limits }
	}
}
