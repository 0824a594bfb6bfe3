use serde_json::json;
use time::OffsetDateTime;

use persona_providers::memory::{MemoryResponse, MemoryResult, Significance};
use persona_service::{Error, MemoryQueryRequest};
use persona_storage::{
	ImportStore,
	models::{ImportProfileState, ImportStatus, ProfileRecord},
};

use super::support::{DispatchMode, PROFILE_JSON, StubLlm, harness, harness_with, test_config};

fn memories() -> MemoryResponse {
	MemoryResponse {
		relevant_memories: vec![MemoryResult {
			content: "Training for a spring marathon".to_string(),
			significance: Significance::High,
			context: Some("mentioned weekly".to_string()),
		}],
		patterns_detected: vec!["early riser".to_string()],
		user_context: String::new(),
		success: true,
		error: None,
	}
}

fn partial_profile() -> ProfileRecord {
	ProfileRecord {
		user_id: "u1".to_string(),
		source: "quick_pass".to_string(),
		ai_name: Some("Juniper".to_string()),
		archetype: None,
		sections: json!({
			"identity": {
				"ai_name": "Juniper",
				"archetype": "The Curious Builder",
				"vibe": "steady",
				"emoji_style": "none",
				"signature_greeting": "Hey there"
			}
		}),
		profile_text: "## Your AI Identity".to_string(),
		generated_at: OffsetDateTime::now_utc(),
	}
}

#[tokio::test]
async fn progress_defaults_for_unknown_users() {
	let h = harness(StubLlm::replying(PROFILE_JSON), DispatchMode::Record);
	let progress = h.service.import_progress("nobody", 0.0).await.expect("Read failed.");

	assert_eq!(progress.import_status, "none");
	assert_eq!(progress.embedding_status, "none");
	assert_eq!(progress.progress_percent, 0);
	assert_eq!(progress.view.stage_index, 0);
	assert!(!progress.view.safe_to_close);
}

#[tokio::test]
async fn progress_view_never_moves_backward() {
	let h = harness(StubLlm::replying(PROFILE_JSON), DispatchMode::Record);
	let mut state = ImportProfileState::new("u1", OffsetDateTime::now_utc());

	state.import_status = ImportStatus::Processing;
	state.progress_percent = 50;
	state.import_stage = Some("Parsing conversations".to_string());

	h.store.put_state(state).await;

	let progress = h.service.import_progress("u1", 62.0).await.expect("Read failed.");

	assert_eq!(progress.progress_percent, 50);
	assert_eq!(progress.view.display_percent, 62.0);
	assert_eq!(progress.view.stage_index, 2);
	assert!(progress.view.safe_to_close);
}

#[tokio::test]
async fn missing_profile_is_not_found() {
	let h = harness(StubLlm::replying(PROFILE_JSON), DispatchMode::Record);
	let err = h.service.profile("u1").await.expect_err("Expected not found.");

	assert!(matches!(err, Error::NotFound { .. }));
}

#[tokio::test]
async fn profile_fills_missing_sections() {
	let h = harness(StubLlm::replying(PROFILE_JSON), DispatchMode::Record);

	h.store.save_profile(&partial_profile()).await.expect("Seed failed.");

	let profile = h.service.profile("u1").await.expect("Read failed.");

	assert_eq!(profile.ai_name.as_deref(), Some("Juniper"));
	assert!(profile.sections.identity.is_some());
	assert!(profile.sections.soul.is_none());
}

#[tokio::test]
async fn chat_context_combines_profile_fallbacks_and_memories() {
	let h = harness_with(
		test_config(),
		StubLlm::replying(PROFILE_JSON),
		DispatchMode::Record,
		memories(),
	);

	h.store.save_profile(&partial_profile()).await.expect("Seed failed.");

	let ctx = h.service.chat_context("u1", "how is training going?", &[]).await.expect("Failed.");

	assert!(ctx.has_profile);
	assert!(ctx.memory_available);
	assert!(ctx.context.contains("**Ai Name:** Juniper"));
	assert!(ctx.context.contains("Communicate clearly and warmly."));
	assert!(ctx.context.contains("[HIGH] \"Training for a spring marathon\" - mentioned weekly"));
	assert!(ctx.context.contains("**User Patterns:** early riser"));
}

#[tokio::test]
async fn chat_context_without_profile_or_memory_uses_generic_guidance() {
	let h = harness(StubLlm::replying(PROFILE_JSON), DispatchMode::Record);
	let ctx = h.service.chat_context("u1", "hello", &[]).await.expect("Failed.");

	assert!(!ctx.has_profile);
	assert!(!ctx.memory_available);
	assert!(ctx.context.contains("You are a helpful personal assistant"));
	assert!(!ctx.context.contains("Relevant Memories"));
}

#[tokio::test]
async fn memory_queries_are_validated() {
	let h = harness(StubLlm::replying(PROFILE_JSON), DispatchMode::Record);

	for req in [
		MemoryQueryRequest { query: "   ".to_string(), history: Vec::new(), max_results: None },
		MemoryQueryRequest { query: "x".to_string(), history: Vec::new(), max_results: Some(0) },
	] {
		let err = h.service.query_memories("u1", &req).await.expect_err("Expected rejection.");

		assert!(matches!(err, Error::InvalidRequest { .. }));
	}

	let req = MemoryQueryRequest { query: "marathon".to_string(), history: Vec::new(), max_results: None };
	let response = h.service.query_memories("u1", &req).await.expect("Query failed.");

	assert!(!response.success);
	assert!(response.relevant_memories.is_empty());
}
