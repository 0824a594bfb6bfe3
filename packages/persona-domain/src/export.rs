//! Parser for the hierarchical message-tree export.
//!
//! An export is a JSON array of conversations (or an object with a `conversations` array). Each
//! conversation stores its messages as nodes in a `mapping` keyed by node id, linked through
//! `parent`. The active branch is recovered by walking from `current_node` back to the root;
//! exports without a usable `current_node` fall back to ordering every node by its timestamp.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use serde_json::Value;
use time::OffsetDateTime;

use crate::conversation::{Message, ParsedConversation, Role};

pub const UNTITLED: &str = "Untitled";

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
	#[error("Export is not valid JSON: {0}")]
	Json(#[from] serde_json::Error),
	#[error("Export must be a JSON array of conversations.")]
	UnexpectedShape,
	#[error("No valid conversations found in export. The file may be empty or in an unexpected format.")]
	NoConversations,
}

#[derive(Debug, Deserialize)]
struct RawConversation {
	#[serde(default)]
	id: Option<String>,
	#[serde(default)]
	conversation_id: Option<String>,
	#[serde(default)]
	title: Option<String>,
	#[serde(default)]
	create_time: Option<f64>,
	#[serde(default)]
	current_node: Option<String>,
	#[serde(default)]
	mapping: HashMap<String, RawNode>,
}

#[derive(Debug, Deserialize)]
struct RawNode {
	#[serde(default)]
	message: Option<RawMessage>,
	#[serde(default)]
	parent: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
	#[serde(default)]
	author: Option<RawAuthor>,
	#[serde(default)]
	content: Option<RawContent>,
	#[serde(default)]
	create_time: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawAuthor {
	#[serde(default)]
	role: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawContent {
	#[serde(default)]
	parts: Vec<Value>,
}

/// Parses raw export bytes. Conversations without any user or assistant text are dropped; an
/// export that yields no conversations at all is an error.
pub fn parse_export(bytes: &[u8]) -> Result<Vec<ParsedConversation>, ExportError> {
	let root: Value = serde_json::from_slice(bytes)?;
	let items = match root {
		Value::Array(items) => items,
		Value::Object(mut map) => match map.remove("conversations") {
			Some(Value::Array(items)) => items,
			_ => return Err(ExportError::UnexpectedShape),
		},
		_ => return Err(ExportError::UnexpectedShape),
	};
	let mut conversations = Vec::with_capacity(items.len());
	let mut seen_ids = HashSet::new();

	for (index, item) in items.into_iter().enumerate() {
		// Entries that do not look like conversations are skipped rather than failing the export.
		let Ok(raw) = serde_json::from_value::<RawConversation>(item) else {
			continue;
		};

		if let Some(mut conversation) = convert(raw, index) {
			// Chunk ids derive from the conversation id, so repeated ids get a positional suffix.
			if !seen_ids.insert(conversation.id.clone()) {
				let mut suffix = index;

				loop {
					let candidate = format!("{}-{suffix}", conversation.id);

					if seen_ids.insert(candidate.clone()) {
						conversation.id = candidate;

						break;
					}

					suffix += 1;
				}
			}

			conversations.push(conversation);
		}
	}

	if conversations.is_empty() {
		return Err(ExportError::NoConversations);
	}

	Ok(conversations)
}

fn convert(raw: RawConversation, index: usize) -> Option<ParsedConversation> {
	let messages = ordered_node_ids(&raw)
		.into_iter()
		.filter_map(|node_id| raw.mapping.get(node_id).and_then(|node| node.message.as_ref()))
		.filter_map(to_message)
		.collect::<Vec<_>>();

	if messages.is_empty() {
		return None;
	}

	let id = raw
		.id
		.or(raw.conversation_id)
		.filter(|id| !id.trim().is_empty())
		.unwrap_or_else(|| format!("conversation-{index}"));
	let title = raw
		.title
		.map(|title| title.trim().to_string())
		.filter(|title| !title.is_empty())
		.unwrap_or_else(|| UNTITLED.to_string());

	Some(ParsedConversation {
		id,
		title,
		messages,
		created_at: raw.create_time.map(timestamp).unwrap_or(OffsetDateTime::UNIX_EPOCH),
	})
}

fn ordered_node_ids(raw: &RawConversation) -> Vec<&str> {
	if let Some(current) = raw.current_node.as_deref()
		&& raw.mapping.contains_key(current)
	{
		let mut branch = Vec::new();
		let mut seen = HashSet::new();
		let mut cursor = Some(current);

		while let Some(node_id) = cursor {
			// Guard against malformed exports whose parent links form a cycle.
			if !seen.insert(node_id) {
				break;
			}

			branch.push(node_id);

			cursor = raw.mapping.get(node_id).and_then(|node| node.parent.as_deref());
		}

		branch.reverse();

		return branch;
	}

	let mut nodes = raw
		.mapping
		.iter()
		.map(|(node_id, node)| {
			let ts = node.message.as_ref().and_then(|message| message.create_time).unwrap_or(0.0);

			(ts, node_id.as_str())
		})
		.collect::<Vec<_>>();

	nodes.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(b.1)));

	nodes.into_iter().map(|(_, node_id)| node_id).collect()
}

fn to_message(raw: &RawMessage) -> Option<Message> {
	let role = raw.author.as_ref().and_then(|author| author.role.as_deref()).and_then(Role::parse)?;
	let content = raw
		.content
		.as_ref()?
		.parts
		.iter()
		.filter_map(Value::as_str)
		.map(str::trim)
		.filter(|part| !part.is_empty())
		.collect::<Vec<_>>()
		.join("\n");

	if content.is_empty() {
		return None;
	}

	Some(Message { role, content })
}

fn timestamp(seconds: f64) -> OffsetDateTime {
	if !seconds.is_finite() {
		return OffsetDateTime::UNIX_EPOCH;
	}

	let nanos = (seconds * 1_000_000_000.0) as i128;

	OffsetDateTime::from_unix_timestamp_nanos(nanos).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}
