use time::{Duration, OffsetDateTime};

use std::collections::HashSet;

use serde_json::Value;

use persona_service::{EmbeddingProcessor, Error, PassOutcome, TriggerRequest};
use persona_storage::{
	ImportStore, ObjectStore,
	models::{EmbeddingStatus, ImportProfileState, ImportStatus},
};

use super::support::{
	DispatchMode, Harness, PROFILE_JSON, StubLlm, export_json, harness, test_config,
};

const PATH: &str = "u1/1700000000000-conversations.json";

fn request(path: &str) -> TriggerRequest {
	TriggerRequest { storage_path: path.to_string(), file_type: "json".to_string() }
}

async fn trigger_and_run(h: &Harness) {
	h.service.trigger_import("u1", request(PATH)).await.expect("Trigger failed.");

	for job in h.dispatcher.take_jobs() {
		h.service.run_import(job).await;
	}
}

#[tokio::test]
async fn second_trigger_while_processing_conflicts() {
	let h = harness(StubLlm::replying(PROFILE_JSON), DispatchMode::Record);
	let first = h.service.trigger_import("u1", request(PATH)).await.expect("Trigger failed.");

	assert!(first.success);
	assert_eq!(first.status, "processing");

	let err = h.service.trigger_import("u1", request(PATH)).await.expect_err("Expected conflict.");

	assert!(matches!(err, Error::Conflict { elapsed_minutes: Some(0), .. }), "Unexpected: {err}");
	assert_eq!(h.dispatcher.take_jobs().len(), 1);
}

#[tokio::test]
async fn stuck_import_is_superseded() {
	let h = harness(StubLlm::replying(PROFILE_JSON), DispatchMode::Record);
	let now = OffsetDateTime::now_utc();
	let mut state = ImportProfileState::new("u1", now);

	state.import_status = ImportStatus::Processing;
	state.processing_started_at = Some(now - Duration::minutes(20));

	h.store.put_state(state).await;
	h.service.trigger_import("u1", request(PATH)).await.expect("Trigger failed.");

	let state = h.store.import_state("u1").await.expect("Read failed.").expect("Missing state.");

	assert_eq!(state.progress_percent, 0);
	assert!(state.processing_started_at.is_some_and(|started| now - started < Duration::minutes(1)));
}

#[tokio::test]
async fn rejects_foreign_paths_and_zip_uploads() {
	let h = harness(StubLlm::replying(PROFILE_JSON), DispatchMode::Record);

	for req in [
		request("u2/1-conversations.json"),
		request(""),
		TriggerRequest { storage_path: PATH.to_string(), file_type: "zip".to_string() },
	] {
		let err = h.service.trigger_import("u1", req).await.expect_err("Expected rejection.");

		assert!(matches!(err, Error::InvalidRequest { .. }), "Unexpected: {err}");
	}

	assert!(h.store.import_state("u1").await.expect("Read failed.").is_none());
}

#[tokio::test]
async fn closed_queue_marks_import_failed() {
	let h = harness(StubLlm::replying(PROFILE_JSON), DispatchMode::Closed);
	let err = h.service.trigger_import("u1", request(PATH)).await.expect_err("Expected failure.");

	assert!(matches!(err, Error::Dispatch { .. }));

	let state = h.store.import_state("u1").await.expect("Read failed.").expect("Missing state.");

	assert_eq!(state.import_status, ImportStatus::Failed);
	assert!(state.import_error.is_some());
}

#[tokio::test]
async fn slow_dispatch_is_still_accepted() {
	let h = harness(StubLlm::replying(PROFILE_JSON), DispatchMode::Hang);
	let accepted = h.service.trigger_import("u1", request(PATH)).await.expect("Trigger failed.");

	assert!(accepted.success);
}

#[tokio::test]
async fn import_builds_profile_and_queues_embeddings() {
	let h = harness(StubLlm::replying(&format!("```json\n{PROFILE_JSON}\n```")), DispatchMode::Record);

	h.objects.put(PATH, &export_json(6, 20)).await.expect("Seed failed.");
	trigger_and_run(&h).await;

	let state = h.store.import_state("u1").await.expect("Read failed.").expect("Missing state.");

	assert_eq!(state.import_status, ImportStatus::Complete);
	assert_eq!(state.progress_percent, 100);
	assert_eq!(state.embedding_status, EmbeddingStatus::Pending);
	assert_eq!(state.total_conversations, 6);
	assert_eq!(state.total_messages, 120);
	// 20 messages per conversation split into windows of 15.
	assert_eq!(state.total_chunks, 12);
	assert_eq!(h.store.chunks("u1").await.len(), 12);

	let profile = h.store.profile("u1").await.expect("Read failed.").expect("Missing profile.");

	assert_eq!(profile.source, "quick_pass");
	assert_eq!(profile.ai_name.as_deref(), Some("Juniper"));
	assert!(profile.profile_text.contains("## Your AI Identity"));
	assert_eq!(h.llm.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn completed_import_removes_consumed_exports() {
	let h = harness(StubLlm::replying(PROFILE_JSON), DispatchMode::Record);
	let older = "u1/1600000000000-conversations.json";
	let newer = "u1/1800000000000-conversations.json";
	let foreign = "u2/1600000000000-conversations.json";

	for key in [older, PATH, newer, foreign] {
		h.objects.put(key, &export_json(1, 4)).await.expect("Seed failed.");
	}

	trigger_and_run(&h).await;

	assert_eq!(h.objects.list("u1/").await.expect("List failed."), vec![newer.to_string()]);
	assert_eq!(h.objects.list("u2/").await.expect("List failed."), vec![foreign.to_string()]);
}

#[tokio::test]
async fn failed_import_keeps_its_export_for_retry() {
	let h = harness(StubLlm::replying(PROFILE_JSON), DispatchMode::Record);

	h.objects.put(PATH, b"[]").await.expect("Seed failed.");
	trigger_and_run(&h).await;

	assert_eq!(h.objects.list("u1/").await.expect("List failed."), vec![PATH.to_string()]);
}

#[tokio::test]
async fn repeated_conversation_ids_import_and_embed() {
	let h = harness(StubLlm::replying(PROFILE_JSON), DispatchMode::Record);
	let mut export: Value = serde_json::from_slice(&export_json(2, 4)).expect("Bad export.");

	for conversation in export.as_array_mut().expect("Expected array.") {
		conversation["id"] = Value::from("dup");
	}

	h.objects.put(PATH, export.to_string().as_bytes()).await.expect("Seed failed.");
	trigger_and_run(&h).await;

	let state = h.store.import_state("u1").await.expect("Read failed.").expect("Missing state.");
	let chunks = h.store.chunks("u1").await;
	let unique = chunks.iter().map(|chunk| chunk.chunk_id).collect::<HashSet<_>>();

	assert_eq!(state.import_status, ImportStatus::Complete);
	assert_eq!(chunks.len(), 2);
	assert_eq!(unique.len(), 2);

	let mut cfg = test_config();

	cfg.embedding_pass.max_batches_per_pass = Some(5);

	let report = EmbeddingProcessor::new(cfg, h.store.clone(), h.embedding.clone())
		.run_pass("u1")
		.await
		.expect("Pass failed.");

	assert_eq!(report.processed, 2);
	assert_eq!(report.outcome, PassOutcome::Complete);
}

#[tokio::test]
async fn malformed_model_output_falls_back_without_failing() {
	let h = harness(StubLlm::replying("Sure! Here is the profile you asked for."), DispatchMode::Record);

	h.objects.put(PATH, &export_json(2, 4)).await.expect("Seed failed.");
	trigger_and_run(&h).await;

	let state = h.store.import_state("u1").await.expect("Read failed.").expect("Missing state.");
	let profile = h.store.profile("u1").await.expect("Read failed.").expect("Missing profile.");

	assert_eq!(state.import_status, ImportStatus::Complete);
	assert_eq!(profile.source, "fallback");
	assert!(profile.profile_text.starts_with("You've had 8 messages across 2 conversations."));
}

#[tokio::test]
async fn model_failure_falls_back_without_failing() {
	let h = harness(StubLlm::failing(500), DispatchMode::Record);

	h.objects.put(PATH, &export_json(1, 4)).await.expect("Seed failed.");
	trigger_and_run(&h).await;

	let profile = h.store.profile("u1").await.expect("Read failed.").expect("Missing profile.");

	assert_eq!(profile.source, "fallback");
}

#[tokio::test]
async fn unreadable_export_fails_with_bounded_error() {
	let h = harness(StubLlm::replying(PROFILE_JSON), DispatchMode::Record);

	h.objects.put(PATH, b"[]").await.expect("Seed failed.");
	trigger_and_run(&h).await;

	let state = h.store.import_state("u1").await.expect("Read failed.").expect("Missing state.");
	let error = state.import_error.expect("Missing error.");

	assert_eq!(state.import_status, ImportStatus::Failed);
	assert!(error.contains("No valid conversations"));
	assert!(error.chars().count() <= 200);
	assert_eq!(h.llm.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn retry_requires_failed_status() {
	let h = harness(StubLlm::replying(PROFILE_JSON), DispatchMode::Record);
	let err = h.service.retry_import("u1").await.expect_err("Expected rejection.");

	assert!(matches!(err, Error::NotRetryable { ref current_status } if current_status == "none"));

	// Missing upload fails the first run.
	trigger_and_run(&h).await;

	let state = h.store.import_state("u1").await.expect("Read failed.").expect("Missing state.");

	assert_eq!(state.import_status, ImportStatus::Failed);

	h.objects.put(PATH, &export_json(1, 4)).await.expect("Seed failed.");
	h.service.retry_import("u1").await.expect("Retry failed.");

	let jobs = h.dispatcher.take_jobs();

	assert_eq!(jobs.len(), 1);
	assert_eq!(jobs[0].storage_path, PATH);

	for job in jobs {
		h.service.run_import(job).await;
	}

	let err = h.service.retry_import("u1").await.expect_err("Expected rejection.");

	assert!(matches!(err, Error::NotRetryable { ref current_status } if current_status == "complete"));
}
