//! Exponential backoff for throttled provider calls.

use std::{future::Future, time::Duration};

use persona_config::RetryPolicy;

use crate::Result;

const MAX_EXPONENT: u32 = 16;

/// `base * 2^attempt`, with `attempt` counted from zero.
pub fn delay_for_attempt(policy: &RetryPolicy, attempt: u32) -> Duration {
	let factor = 1_u64 << attempt.min(MAX_EXPONENT);

	Duration::from_millis(policy.base_delay_ms.saturating_mul(factor))
}

/// Runs `op`, retrying throttled failures up to `policy.max_retries` times. Any other error is
/// returned immediately, as is the last throttled error once retries run out.
pub async fn retry_throttled<T, F, Fut>(policy: &RetryPolicy, provider: &str, mut op: F) -> Result<T>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T>>,
{
	let mut attempt = 0;

	loop {
		match op().await {
			Ok(value) => return Ok(value),
			Err(err) if err.is_throttled() && attempt < policy.max_retries => {
				let delay = delay_for_attempt(policy, attempt);

				tracing::warn!(
					provider,
					attempt = attempt + 1,
					delay_ms = delay.as_millis() as u64,
					error = %err,
					"Provider throttled. Backing off."
				);
				tokio::time::sleep(delay).await;

				attempt += 1;
			},
			Err(err) => return Err(err),
		}
	}
}
