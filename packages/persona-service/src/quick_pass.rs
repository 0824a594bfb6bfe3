use std::time::Instant;

use persona_domain::{
	ParsedConversation, QuickPassResult,
	profile::parse_quick_pass,
	prompt::{QUICK_PASS_SYSTEM_PROMPT, format_conversations, quick_pass_user_prompt},
};
use persona_providers::backoff;

use crate::PersonaService;

pub const TRACE_TARGET: &str = "persona::quick_pass";

impl PersonaService {
	/// Synthesizes a profile from sampled conversations with a single model call.
	///
	/// Returns `None` on any failure; callers fall back to a statistics-only profile.
	pub async fn quick_pass(&self, sampled: &[&ParsedConversation]) -> Option<QuickPassResult> {
		let formatted = format_conversations(sampled, self.cfg.sampling.max_message_chars);

		if formatted.trim().is_empty() {
			return None;
		}

		let cfg = &self.cfg.providers.llm;
		let llm = self.providers.llm.as_ref();
		let user_prompt = quick_pass_user_prompt(&formatted);
		let user_prompt = user_prompt.as_str();
		let started = Instant::now();
		let raw = backoff::retry_throttled(&self.cfg.providers.retry, "llm", || {
			llm.complete(cfg, QUICK_PASS_SYSTEM_PROMPT, user_prompt)
		})
		.await;
		let duration_ms = started.elapsed().as_millis() as u64;
		let result = match raw {
			Ok(raw) => match parse_quick_pass(&raw) {
				Ok(result) => Some(result),
				Err(err) => {
					tracing::warn!(error = %err, "Quick pass output failed validation.");

					None
				},
			},
			Err(err) => {
				tracing::warn!(error = %err, "Quick pass model call failed.");

				None
			},
		};

		match &result {
			Some(profile) => tracing::info!(
				target: TRACE_TARGET,
				prompt_chars = formatted.chars().count(),
				conversations = sampled.len(),
				duration_ms,
				success = true,
				ai_name = profile.ai_name(),
				archetype = profile.archetype(),
				trait_count = profile.trait_count(),
				"Quick pass finished."
			),
			None => tracing::info!(
				target: TRACE_TARGET,
				prompt_chars = formatted.chars().count(),
				conversations = sampled.len(),
				duration_ms,
				success = false,
				"Quick pass finished."
			),
		}

		result
	}
}
