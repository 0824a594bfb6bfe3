//! Polls for users whose chunks still need embeddings and runs one time-boxed pass per user.

use std::{collections::HashMap, sync::Arc, time::Duration as StdDuration};

use time::{Duration, OffsetDateTime};

use persona_config::EmbeddingPass;
use persona_service::{EmbeddingProcessor, PassOutcome, PassReport};
use persona_storage::ImportStore;

use crate::Result;

const USERS_PER_POLL: i64 = 16;
const BASE_BACKOFF_MS: i64 = 500;
const MAX_BACKOFF_MS: i64 = 30_000;

#[derive(Debug, Clone, Copy)]
struct Backoff {
	attempts: i32,
	next_at: OffsetDateTime,
}

pub struct WorkerState {
	processor: EmbeddingProcessor,
	store: Arc<dyn ImportStore>,
	poll_interval: StdDuration,
	backoff: HashMap<String, Backoff>,
}
impl WorkerState {
	pub fn new(
		processor: EmbeddingProcessor,
		store: Arc<dyn ImportStore>,
		cfg: &EmbeddingPass,
	) -> Self {
		Self {
			processor,
			store,
			poll_interval: StdDuration::from_millis(cfg.poll_interval_ms),
			backoff: HashMap::new(),
		}
	}
}

pub async fn run_worker(mut state: WorkerState) {
	loop {
		match process_pending_once(&mut state, OffsetDateTime::now_utc()).await {
			// Some user still has work, so poll again right away.
			Ok(passes) if passes.iter().any(|report| report.outcome == PassOutcome::Pending) =>
				continue,
			Ok(_) => {},
			Err(err) => {
				tracing::error!(error = %err, "Embedding queue poll failed.");
			},
		}

		tokio::time::sleep(state.poll_interval).await;
	}
}

/// Runs one pass for every queued user not currently backing off.
pub async fn process_pending_once(
	state: &mut WorkerState,
	now: OffsetDateTime,
) -> Result<Vec<PassReport>> {
	let users = state.store.users_pending_embeddings(USERS_PER_POLL).await?;
	let mut reports = Vec::with_capacity(users.len());

	for user_id in users {
		if state.backoff.get(&user_id).is_some_and(|backoff| backoff.next_at > now) {
			continue;
		}

		match state.processor.run_pass(&user_id).await {
			Ok(report) => {
				state.backoff.remove(&user_id);
				reports.push(report);
			},
			Err(err) => {
				let attempts = state.backoff.get(&user_id).map_or(0, |backoff| backoff.attempts) + 1;
				let delay = backoff_for_attempt(attempts);

				tracing::error!(
					error = %err,
					user_id = user_id.as_str(),
					attempts,
					retry_in_ms = delay.whole_milliseconds() as i64,
					"Embedding pass failed."
				);
				state.backoff.insert(user_id, Backoff { attempts, next_at: now + delay });
			},
		}
	}

	Ok(reports)
}

fn backoff_for_attempt(attempt: i32) -> Duration {
	let attempts = attempt.max(1) as u32;
	let exp = attempts.saturating_sub(1).min(6);
	let base = BASE_BACKOFF_MS.saturating_mul(1 << exp);

	Duration::milliseconds(base.min(MAX_BACKOFF_MS))
}
