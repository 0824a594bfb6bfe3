pub mod worker;

mod error;

pub use error::{Error, Result};

use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use persona_service::{EmbeddingProcessor, Providers};
use persona_storage::Db;

#[derive(Debug, Parser)]
#[command(
	version = persona_cli::VERSION,
	rename_all = "kebab",
	styles = persona_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = persona_config::load(&args.config)?;
	let filter = EnvFilter::new(config.service.log_level.clone());

	tracing_subscriber::fmt().with_env_filter(filter).init();

	let db = Db::connect(&config.storage.postgres).await?;

	db.ensure_schema(config.providers.embedding.dimensions).await?;

	let store = Arc::new(db);
	let providers = Providers::from_config(&config)?;
	let state = worker::WorkerState::new(
		EmbeddingProcessor::new(config.clone(), store.clone(), providers.embedding),
		store,
		&config.embedding_pass,
	);

	worker::run_worker(state).await;

	Ok(())
}
