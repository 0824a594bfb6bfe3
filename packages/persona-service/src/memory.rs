use serde::Deserialize;

use persona_providers::memory::{DEFAULT_MAX_RESULTS, HistoryTurn, MemoryQuery, MemoryResponse};

use crate::{Error, PersonaService, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryQueryRequest {
	pub query: String,
	#[serde(default)]
	pub history: Vec<HistoryTurn>,
	#[serde(default)]
	pub max_results: Option<u32>,
}

impl PersonaService {
	/// Queries the external memory service. An unreachable service yields an unsuccessful, empty
	/// response rather than an error.
	pub async fn query_memories(
		&self,
		user_id: &str,
		req: &MemoryQueryRequest,
	) -> Result<MemoryResponse> {
		let query = req.query.trim();

		if query.is_empty() {
			return Err(Error::InvalidRequest { message: "query must not be empty.".to_string() });
		}

		let max_results = req.max_results.unwrap_or(DEFAULT_MAX_RESULTS);

		if max_results == 0 {
			return Err(Error::InvalidRequest {
				message: "max_results must be greater than zero.".to_string(),
			});
		}

		Ok(self
			.providers
			.memory
			.query(MemoryQuery { user_id, query, history: &req.history, max_results })
			.await)
	}

	pub async fn memory_health(&self) -> bool {
		self.providers.memory.health().await
	}
}
