use serde::Serialize;
use time::OffsetDateTime;

use persona_domain::ProfileSections;
use persona_providers::memory::{DEFAULT_MAX_RESULTS, HistoryTurn, MemoryQuery, format_memories_for_prompt};
use persona_storage::models::ProfileRecord;

use crate::{Error, PersonaService, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileResponse {
	pub source: String,
	pub ai_name: Option<String>,
	pub archetype: Option<String>,
	pub sections: ProfileSections,
	pub markdown: String,
	#[serde(with = "persona_domain::time_serde")]
	pub generated_at: OffsetDateTime,
}

/// System context for a personalized chat turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatContext {
	pub context: String,
	pub has_profile: bool,
	pub memory_available: bool,
}

impl PersonaService {
	pub async fn profile(&self, user_id: &str) -> Result<ProfileResponse> {
		let Some(record) = self.store.profile(user_id).await? else {
			return Err(Error::NotFound { message: "No profile has been generated yet.".to_string() });
		};
		let sections = decode_sections(&record)?;

		Ok(ProfileResponse {
			source: record.source,
			ai_name: record.ai_name,
			archetype: record.archetype,
			sections,
			markdown: record.profile_text,
			generated_at: record.generated_at,
		})
	}

	/// Composes the profile (with generic guidance for anything missing) and relevant memories
	/// into one system context.
	pub async fn chat_context(
		&self,
		user_id: &str,
		query: &str,
		history: &[HistoryTurn],
	) -> Result<ChatContext> {
		let record = self.store.profile(user_id).await?;
		let mut blocks = Vec::new();

		match &record {
			Some(record) => {
				let sections = decode_sections(record)?;

				if sections.is_empty() {
					blocks.push(record.profile_text.clone());
				}

				blocks.push(sections.to_markdown());
			},
			None => blocks.push(ProfileSections::default().to_markdown()),
		}

		let mut memory_available = false;

		if !query.trim().is_empty() {
			let response = self
				.providers
				.memory
				.query(MemoryQuery {
					user_id,
					query: query.trim(),
					history,
					max_results: DEFAULT_MAX_RESULTS,
				})
				.await;
			let block = format_memories_for_prompt(&response);

			memory_available = response.success;

			if !block.is_empty() {
				blocks.push(block);
			}
		}

		Ok(ChatContext { context: blocks.join("\n\n"), has_profile: record.is_some(), memory_available })
	}
}

fn decode_sections(record: &ProfileRecord) -> Result<ProfileSections> {
	if record.sections.is_null() {
		return Ok(ProfileSections::default());
	}

	serde_json::from_value(record.sections.clone()).map_err(|err| Error::Storage {
		message: format!("Stored profile for {} is unreadable: {err}", record.user_id),
	})
}
