use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
	User,
	Assistant,
}
impl Role {
	pub fn parse(raw: &str) -> Option<Self> {
		match raw.trim() {
			"user" => Some(Self::User),
			"assistant" => Some(Self::Assistant),
			_ => None,
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Self::User => "user",
			Self::Assistant => "assistant",
		}
	}

	/// Speaker prefix used in prompts.
	pub fn label(self) -> &'static str {
		match self {
			Self::User => "User",
			Self::Assistant => "Assistant",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
	pub role: Role,
	pub content: String,
}
impl Message {
	pub fn new(role: Role, content: impl Into<String>) -> Self {
		Self { role, content: content.into() }
	}

	pub fn chars(&self) -> usize {
		self.content.chars().count()
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedConversation {
	pub id: String,
	pub title: String,
	pub messages: Vec<Message>,
	#[serde(with = "crate::time_serde")]
	pub created_at: OffsetDateTime,
}
impl ParsedConversation {
	pub fn message_count(&self) -> usize {
		self.messages.len()
	}

	pub fn count_role(&self, role: Role) -> usize {
		self.messages.iter().filter(|message| message.role == role).count()
	}

	pub fn total_chars(&self) -> usize {
		self.messages.iter().map(Message::chars).sum()
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSummary {
	pub conversations: usize,
	pub messages: usize,
}
impl ExportSummary {
	pub fn of(conversations: &[ParsedConversation]) -> Self {
		Self {
			conversations: conversations.len(),
			messages: conversations.iter().map(ParsedConversation::message_count).sum(),
		}
	}
}
