use time::OffsetDateTime;

use crate::conversation::ParsedConversation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
	pub max_messages: usize,
	pub max_chars: usize,
}
impl Default for ChunkParams {
	fn default() -> Self {
		Self { max_messages: 15, max_chars: 3_000 }
	}
}

/// A conversation fragment ready to be persisted and embedded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDraft {
	pub conversation_id: String,
	pub chunk_index: usize,
	pub title: String,
	pub content: String,
	pub message_count: usize,
	pub created_at: OffsetDateTime,
}

/// Splits each conversation into windows of consecutive messages rendered as `role: content`
/// lines. Window text is capped at `max_chars` characters.
pub fn chunk_conversations(
	conversations: &[ParsedConversation],
	params: &ChunkParams,
) -> Vec<ChunkDraft> {
	let window = params.max_messages.max(1);
	let mut drafts = Vec::new();

	for conversation in conversations {
		for (chunk_index, messages) in conversation.messages.chunks(window).enumerate() {
			let content = messages
				.iter()
				.map(|message| format!("{}: {}", message.role.as_str(), message.content))
				.collect::<Vec<_>>()
				.join("\n");

			drafts.push(ChunkDraft {
				conversation_id: conversation.id.clone(),
				chunk_index,
				title: conversation.title.clone(),
				content: cap_chars(content, params.max_chars),
				message_count: messages.len(),
				created_at: conversation.created_at,
			});
		}
	}

	drafts
}

fn cap_chars(mut text: String, max_chars: usize) -> String {
	if let Some((cut, _)) = text.char_indices().nth(max_chars) {
		text.truncate(cut);
	}

	text
}
