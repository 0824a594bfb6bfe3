mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Config, EmbeddingPass, EmbeddingProviderConfig, Import, LlmProviderConfig,
	MemoryServiceConfig, Objects, Postgres, Providers, RateLimit, RetryPolicy, Sampling, Security,
	Service, Storage, Upload,
};

use std::{fs, path::Path};

/// Health probes must never hold up the request that issued them for longer than this.
pub const MAX_HEALTH_TIMEOUT_MS: u64 = 2_000;

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.http_bind.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.http_bind must be non-empty.".to_string(),
		});
	}
	if cfg.storage.postgres.pool_max_conns == 0 {
		return Err(Error::Validation {
			message: "storage.postgres.pool_max_conns must be greater than zero.".to_string(),
		});
	}
	if cfg.storage.objects.root.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.objects.root must be non-empty.".to_string(),
		});
	}

	validate_providers(&cfg.providers)?;
	validate_upload(&cfg.upload)?;
	validate_sampling(&cfg.sampling)?;
	validate_import(&cfg.import)?;
	validate_embedding_pass(&cfg.embedding_pass)?;
	validate_rate_limit(&cfg.rate_limit)?;

	Ok(())
}

fn validate_providers(providers: &Providers) -> Result<()> {
	let embedding = &providers.embedding;

	if embedding.dimensions == 0 {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must be greater than zero.".to_string(),
		});
	}
	if embedding.max_input_chars == 0 {
		return Err(Error::Validation {
			message: "providers.embedding.max_input_chars must be greater than zero.".to_string(),
		});
	}
	if embedding.timeout_ms == 0 || providers.llm.timeout_ms == 0 {
		return Err(Error::Validation {
			message: "Provider timeout_ms values must be greater than zero.".to_string(),
		});
	}
	if !(0.0..=2.0).contains(&providers.llm.temperature) {
		return Err(Error::Validation {
			message: "providers.llm.temperature must be between 0.0 and 2.0.".to_string(),
		});
	}
	if providers.llm.max_tokens == 0 {
		return Err(Error::Validation {
			message: "providers.llm.max_tokens must be greater than zero.".to_string(),
		});
	}
	if providers.memory.api_base.trim().is_empty() {
		return Err(Error::Validation {
			message: "providers.memory.api_base must be non-empty.".to_string(),
		});
	}
	if providers.memory.query_timeout_ms == 0 {
		return Err(Error::Validation {
			message: "providers.memory.query_timeout_ms must be greater than zero.".to_string(),
		});
	}
	if providers.memory.health_timeout_ms == 0
		|| providers.memory.health_timeout_ms > MAX_HEALTH_TIMEOUT_MS
	{
		return Err(Error::Validation {
			message: format!(
				"providers.memory.health_timeout_ms must be between 1 and {MAX_HEALTH_TIMEOUT_MS}."
			),
		});
	}
	if providers.retry.base_delay_ms == 0 {
		return Err(Error::Validation {
			message: "providers.retry.base_delay_ms must be greater than zero.".to_string(),
		});
	}
	if providers.retry.max_retries > 10 {
		return Err(Error::Validation {
			message: "providers.retry.max_retries must be 10 or less.".to_string(),
		});
	}

	Ok(())
}

fn validate_upload(upload: &Upload) -> Result<()> {
	if upload.session_ttl_seconds == 0 {
		return Err(Error::Validation {
			message: "upload.session_ttl_seconds must be greater than zero.".to_string(),
		});
	}
	if upload.max_chunks == 0 {
		return Err(Error::Validation {
			message: "upload.max_chunks must be greater than zero.".to_string(),
		});
	}
	if upload.max_chunk_bytes == 0 || upload.max_upload_bytes == 0 {
		return Err(Error::Validation {
			message: "upload.max_chunk_bytes and upload.max_upload_bytes must be greater than zero."
				.to_string(),
		});
	}
	if upload.max_chunk_bytes as u64 > upload.max_upload_bytes {
		return Err(Error::Validation {
			message: "upload.max_chunk_bytes must not exceed upload.max_upload_bytes.".to_string(),
		});
	}
	if upload.max_buffered_bytes < upload.max_upload_bytes {
		return Err(Error::Validation {
			message: "upload.max_buffered_bytes must be at least upload.max_upload_bytes.".to_string(),
		});
	}

	Ok(())
}

fn validate_sampling(sampling: &Sampling) -> Result<()> {
	for (name, value) in [
		("sampling.target_tokens", sampling.target_tokens),
		("sampling.chars_per_token", sampling.chars_per_token),
		("sampling.max_selected", sampling.max_selected),
		("sampling.max_message_chars", sampling.max_message_chars),
	] {
		if value == 0 {
			return Err(Error::Validation {
				message: format!("{name} must be greater than zero."),
			});
		}
	}

	if sampling.min_selected > sampling.max_selected {
		return Err(Error::Validation {
			message: "sampling.min_selected must not exceed sampling.max_selected.".to_string(),
		});
	}

	Ok(())
}

fn validate_import(import: &Import) -> Result<()> {
	if import.stuck_threshold_minutes <= 0 {
		return Err(Error::Validation {
			message: "import.stuck_threshold_minutes must be greater than zero.".to_string(),
		});
	}
	if import.accept_timeout_ms == 0 {
		return Err(Error::Validation {
			message: "import.accept_timeout_ms must be greater than zero.".to_string(),
		});
	}
	if import.chunk_max_messages == 0 || import.chunk_max_chars == 0 {
		return Err(Error::Validation {
			message: "import.chunk_max_messages and import.chunk_max_chars must be greater than zero."
				.to_string(),
		});
	}
	if import.insert_batch_size == 0 {
		return Err(Error::Validation {
			message: "import.insert_batch_size must be greater than zero.".to_string(),
		});
	}
	if import.max_error_chars < 16 {
		return Err(Error::Validation {
			message: "import.max_error_chars must be at least 16.".to_string(),
		});
	}

	Ok(())
}

fn validate_embedding_pass(pass: &EmbeddingPass) -> Result<()> {
	if pass.time_budget_seconds == 0 {
		return Err(Error::Validation {
			message: "embedding_pass.time_budget_seconds must be greater than zero.".to_string(),
		});
	}
	if pass.batch_size == 0 {
		return Err(Error::Validation {
			message: "embedding_pass.batch_size must be greater than zero.".to_string(),
		});
	}
	if pass.progress_interval == 0 {
		return Err(Error::Validation {
			message: "embedding_pass.progress_interval must be greater than zero.".to_string(),
		});
	}
	if pass.poll_interval_ms == 0 {
		return Err(Error::Validation {
			message: "embedding_pass.poll_interval_ms must be greater than zero.".to_string(),
		});
	}
	if pass.max_batches_per_pass == Some(0) {
		return Err(Error::Validation {
			message: "embedding_pass.max_batches_per_pass must be greater than zero when set."
				.to_string(),
		});
	}

	Ok(())
}

fn validate_rate_limit(rate_limit: &RateLimit) -> Result<()> {
	for (name, value) in [
		("upload_per_minute", rate_limit.upload_per_minute),
		("expensive_per_minute", rate_limit.expensive_per_minute),
		("standard_per_minute", rate_limit.standard_per_minute),
	] {
		if value == 0 {
			return Err(Error::Validation {
				message: format!("rate_limit.{name} must be greater than zero."),
			});
		}
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	if cfg.security.api_auth_token.as_deref().map(|token| token.trim().is_empty()).unwrap_or(false)
	{
		cfg.security.api_auth_token = None;
	}

	for base in [
		&mut cfg.providers.embedding.api_base,
		&mut cfg.providers.llm.api_base,
		&mut cfg.providers.memory.api_base,
	] {
		let trimmed = base.trim().trim_end_matches('/').to_string();

		*base = trimmed;
	}
}
