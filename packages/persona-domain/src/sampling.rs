//! Richness scoring and token-budgeted selection of conversations for profile synthesis.

use crate::conversation::{ParsedConversation, Role};

const MESSAGE_WEIGHT: f64 = 10.0;
const USER_CHARS_CAP: usize = 500;
const BALANCE_WEIGHT: f64 = 20.0;
const RECENCY_DIVISOR: f64 = 1e12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleParams {
	/// Conversations with fewer messages are not scored.
	pub min_messages: usize,
	pub chars_per_token: usize,
	/// Selection is forced up to this many conversations even past the budget.
	pub min_selected: usize,
	pub max_selected: usize,
}
impl Default for SampleParams {
	fn default() -> Self {
		Self { min_messages: 4, chars_per_token: 4, min_selected: 5, max_selected: 50 }
	}
}

#[derive(Debug, Clone, Copy)]
pub struct ScoredConversation<'a> {
	pub conversation: &'a ParsedConversation,
	pub score: f64,
	pub chars: usize,
}

/// `10 * messages + sum(min(user chars, 500)) + 20 * min(user, assistant) + created_ms / 1e12`.
pub fn score(conversation: &ParsedConversation) -> f64 {
	let user_chars: usize = conversation
		.messages
		.iter()
		.filter(|message| message.role == Role::User)
		.map(|message| message.chars().min(USER_CHARS_CAP))
		.sum();
	let balance =
		conversation.count_role(Role::User).min(conversation.count_role(Role::Assistant));
	let created_ms = (conversation.created_at.unix_timestamp_nanos() / 1_000_000) as f64;

	MESSAGE_WEIGHT * conversation.message_count() as f64
		+ user_chars as f64
		+ BALANCE_WEIGHT * balance as f64
		+ created_ms / RECENCY_DIVISOR
}

/// Ranks eligible conversations by score, highest first. Equal scores keep input order.
pub fn rank<'a>(
	conversations: &'a [ParsedConversation],
	params: &SampleParams,
) -> Vec<ScoredConversation<'a>> {
	let mut scored = conversations
		.iter()
		.filter(|conversation| conversation.message_count() >= params.min_messages)
		.map(|conversation| ScoredConversation {
			conversation,
			score: score(conversation),
			chars: conversation.total_chars(),
		})
		.collect::<Vec<_>>();

	scored.sort_by(|a, b| b.score.total_cmp(&a.score));

	scored
}

/// Selects the richest conversations that fit in `target_tokens`.
///
/// Walks the ranking in order. A conversation that would push the running character total past
/// `target_tokens * chars_per_token` is still taken while fewer than `min_selected` are selected,
/// and skipped otherwise (later, smaller conversations may still fit). Selection stops at
/// `max_selected`. When no conversation meets `min_messages`, the first `max_selected`
/// conversations are returned as-is.
pub fn sample<'a>(
	conversations: &'a [ParsedConversation],
	target_tokens: usize,
	params: &SampleParams,
) -> Vec<&'a ParsedConversation> {
	let ranked = rank(conversations, params);

	if ranked.is_empty() {
		return conversations.iter().take(params.max_selected).collect();
	}

	let budget = target_tokens.saturating_mul(params.chars_per_token);
	let mut selected = Vec::new();
	let mut total_chars = 0_usize;

	for candidate in ranked {
		if selected.len() >= params.max_selected {
			break;
		}

		if total_chars.saturating_add(candidate.chars) > budget {
			if selected.len() < params.min_selected {
				selected.push(candidate.conversation);

				total_chars = total_chars.saturating_add(candidate.chars);
			}

			continue;
		}

		selected.push(candidate.conversation);

		total_chars += candidate.chars;
	}

	selected
}
