//! Client for the external memory-exploration service.
//!
//! Memory is optional context: every failure path yields an unsuccessful, empty response instead
//! of an error so callers can carry on without it.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::Result;

pub const DEFAULT_MAX_RESULTS: u32 = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Significance {
	High,
	Medium,
	Low,
	#[default]
	#[serde(other)]
	Unknown,
}
impl Significance {
	pub fn tag(self) -> &'static str {
		match self {
			Self::High => "HIGH",
			Self::Medium => "MEDIUM",
			Self::Low => "LOW",
			Self::Unknown => "UNKNOWN",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryResult {
	pub content: String,
	#[serde(default)]
	pub significance: Significance,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
	pub role: String,
	pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryQuery<'a> {
	pub user_id: &'a str,
	pub query: &'a str,
	pub history: &'a [HistoryTurn],
	pub max_results: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryResponse {
	#[serde(default)]
	pub relevant_memories: Vec<MemoryResult>,
	#[serde(default)]
	pub patterns_detected: Vec<String>,
	#[serde(default)]
	pub user_context: String,
	#[serde(default = "default_success")]
	pub success: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}
impl MemoryResponse {
	pub fn unavailable(error: impl Into<String>) -> Self {
		Self {
			relevant_memories: Vec::new(),
			patterns_detected: Vec::new(),
			user_context: String::new(),
			success: false,
			error: Some(error.into()),
		}
	}
}

pub struct MemoryClient {
	client: Client,
	api_base: String,
	query_timeout: Duration,
	health_timeout: Duration,
}
impl MemoryClient {
	pub fn new(cfg: &persona_config::MemoryServiceConfig) -> Result<Self> {
		Ok(Self {
			client: Client::builder().build()?,
			api_base: cfg.api_base.clone(),
			query_timeout: Duration::from_millis(cfg.query_timeout_ms),
			health_timeout: Duration::from_millis(cfg.health_timeout_ms),
		})
	}

	pub async fn query(&self, query: &MemoryQuery<'_>) -> MemoryResponse {
		match self.try_query(query).await {
			Ok(response) => response,
			Err(err) => {
				tracing::warn!(error = %err, user_id = query.user_id, "Memory query failed.");

				MemoryResponse::unavailable(err.to_string())
			},
		}
	}

	pub async fn health(&self) -> bool {
		let url = format!("{}/health", self.api_base);

		match self.client.get(url).timeout(self.health_timeout).send().await {
			Ok(res) => res.status().is_success(),
			Err(err) => {
				tracing::debug!(error = %err, "Memory service health probe failed.");

				false
			},
		}
	}

	async fn try_query(&self, query: &MemoryQuery<'_>) -> Result<MemoryResponse> {
		let url = format!("{}/query", self.api_base);
		let res = self.client.post(url).timeout(self.query_timeout).json(query).send().await?;

		Ok(crate::check_status(res).await?.json().await?)
	}
}

/// Renders memories as a prompt block. Returns an empty string when there is nothing to add.
pub fn format_memories_for_prompt(response: &MemoryResponse) -> String {
	if !response.success {
		return String::new();
	}

	let mut blocks = Vec::new();

	if !response.relevant_memories.is_empty() {
		let mut lines = vec!["## Relevant Memories".to_string()];

		for memory in &response.relevant_memories {
			let mut line = format!("[{}] \"{}\"", memory.significance.tag(), memory.content);

			if let Some(context) = memory.context.as_deref().filter(|c| !c.trim().is_empty()) {
				line.push_str(" - ");
				line.push_str(context);
			}

			lines.push(line);
		}

		blocks.push(lines.join("\n"));
	}
	if !response.patterns_detected.is_empty() {
		blocks.push(format!("**User Patterns:** {}", response.patterns_detected.join(", ")));
	}
	if !response.user_context.trim().is_empty() {
		blocks.push(format!("**Context:** {}", response.user_context.trim()));
	}

	blocks.join("\n\n")
}

fn default_success() -> bool {
	true
}
