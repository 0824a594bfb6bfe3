use crate::conversation::ParsedConversation;

pub const TRUNCATION_MARKER: &str = "... [truncated]";

pub const QUICK_PASS_SYSTEM_PROMPT: &str = "\
You study a person's chat history and describe how they communicate, who they are, and how an \
assistant should work with them. The conversations below are a sample of their richest exchanges \
with an AI assistant.

Respond with a single JSON object and nothing else: no prose, no markdown, no code fences. Use \
exactly this shape:

{
  \"soul\": {
    \"communication_style\": string,
    \"personality_traits\": [string],
    \"tone_preferences\": string,
    \"boundaries\": string,
    \"humor_style\": string,
    \"formality_level\": string,
    \"emotional_patterns\": string
  },
  \"identity\": {
    \"ai_name\": string,
    \"archetype\": string,
    \"vibe\": string,
    \"emoji_style\": string,
    \"signature_greeting\": string
  },
  \"user\": {
    \"name\": string,
    \"location\": string,
    \"occupation\": string,
    \"relationships\": [string],
    \"interests\": [string],
    \"life_context\": string,
    \"preferred_address\": string
  },
  \"agents\": {
    \"response_style\": string,
    \"behavioral_rules\": [string],
    \"context_adaptation\": string,
    \"memory_directives\": string,
    \"do_not\": [string]
  },
  \"tools\": {
    \"likely_usage\": [string],
    \"capabilities_emphasis\": [string],
    \"output_preferences\": string,
    \"depth_preference\": string
  }
}

Rules:
- Ground every field in the conversations. When the evidence is missing, write \"not enough data\" \
for strings and use an empty list for lists.
- identity.ai_name is a short, original name for an assistant that would suit this person; do not \
use generic names such as Assistant or AI.
- identity.archetype is two to four words, for example \"The Curious Builder\".
- Keep list items short and concrete; at most eight items per list.";

/// Renders sampled conversations as delimited transcript blocks for the quick-pass prompt.
pub fn format_conversations(
	conversations: &[&ParsedConversation],
	max_message_chars: usize,
) -> String {
	conversations
		.iter()
		.map(|conversation| format_conversation(conversation, max_message_chars))
		.collect::<Vec<_>>()
		.join("\n\n")
}

pub fn quick_pass_user_prompt(formatted: &str) -> String {
	format!(
		"Here are the conversations to analyze:\n\n{formatted}\n\nReturn the JSON profile now."
	)
}

fn format_conversation(conversation: &ParsedConversation, max_message_chars: usize) -> String {
	let date = conversation.created_at.date();
	let mut lines = vec![format!(
		"=== Conversation: \"{}\" ({:04}-{:02}-{:02}) ===",
		conversation.title,
		date.year(),
		u8::from(date.month()),
		date.day(),
	)];

	for message in &conversation.messages {
		lines.push(format!(
			"{}: {}",
			message.role.label(),
			truncate_chars(&message.content, max_message_chars)
		));
	}

	lines.join("\n")
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
	match text.char_indices().nth(max_chars) {
		Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &text[..cut]),
		None => text.to_string(),
	}
}
