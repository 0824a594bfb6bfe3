//! The five-section profile produced by the quick pass.
//!
//! Model output is validated once, at [`parse_quick_pass`]: type mismatches are rejected, while
//! missing or blank strings become [`NOT_ENOUGH_DATA`] and missing lists become empty. Everything
//! downstream works with fully populated sections.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conversation::ExportSummary;

pub const NOT_ENOUGH_DATA: &str = "not enough data";

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
	#[error("Model output is not valid JSON: {0}")]
	Json(#[source] serde_json::Error),
	#[error("Model output must be a JSON object.")]
	NotAnObject,
	#[error("Model output does not match the profile schema: {0}")]
	Schema(#[source] serde_json::Error),
}

/// A labeled profile field as rendered to markdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field<'a> {
	Text(&'a str),
	List(&'a [String]),
}

pub trait Section {
	/// Key of the section in the model's JSON object.
	const KEY: &'static str;
	const HEADING: &'static str;
	/// Context supplied in place of the section when a profile lacks it.
	const FALLBACK: &'static str;

	fn fields(&self) -> Vec<(&'static str, Field<'_>)>;

	fn to_markdown(&self) -> String {
		let mut lines = vec![format!("## {}", Self::HEADING)];

		for (name, field) in self.fields() {
			let label = field_label(name);

			match field {
				Field::Text(value) => {
					let value = if value.trim().is_empty() { NOT_ENOUGH_DATA } else { value };

					lines.push(format!("**{label}:** {value}"));
				},
				Field::List(items) if items.is_empty() => {
					lines.push(format!("**{label}:** {NOT_ENOUGH_DATA}"));
				},
				Field::List(items) => {
					lines.push(format!("**{label}:**"));
					lines.extend(items.iter().map(|item| format!("- {item}")));
				},
			}
		}

		lines.join("\n")
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoulSection {
	pub communication_style: String,
	pub personality_traits: Vec<String>,
	pub tone_preferences: String,
	pub boundaries: String,
	pub humor_style: String,
	pub formality_level: String,
	pub emotional_patterns: String,
}
impl Section for SoulSection {
	const FALLBACK: &'static str =
		"Communicate clearly and warmly. Match the user's tone as it becomes apparent.";
	const HEADING: &'static str = "Communication Style & Personality";
	const KEY: &'static str = "soul";

	fn fields(&self) -> Vec<(&'static str, Field<'_>)> {
		vec![
			("communication_style", Field::Text(&self.communication_style)),
			("personality_traits", Field::List(&self.personality_traits)),
			("tone_preferences", Field::Text(&self.tone_preferences)),
			("boundaries", Field::Text(&self.boundaries)),
			("humor_style", Field::Text(&self.humor_style)),
			("formality_level", Field::Text(&self.formality_level)),
			("emotional_patterns", Field::Text(&self.emotional_patterns)),
		]
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySection {
	pub ai_name: String,
	pub archetype: String,
	pub vibe: String,
	pub emoji_style: String,
	pub signature_greeting: String,
}
impl Section for IdentitySection {
	const FALLBACK: &'static str = "You are a helpful personal assistant still getting to know the user.";
	const HEADING: &'static str = "Your AI Identity";
	const KEY: &'static str = "identity";

	fn fields(&self) -> Vec<(&'static str, Field<'_>)> {
		vec![
			("ai_name", Field::Text(&self.ai_name)),
			("archetype", Field::Text(&self.archetype)),
			("vibe", Field::Text(&self.vibe)),
			("emoji_style", Field::Text(&self.emoji_style)),
			("signature_greeting", Field::Text(&self.signature_greeting)),
		]
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSection {
	pub name: String,
	pub location: String,
	pub occupation: String,
	pub relationships: Vec<String>,
	pub interests: Vec<String>,
	pub life_context: String,
	pub preferred_address: String,
}
impl Section for UserSection {
	const FALLBACK: &'static str = "Little is known about the user yet. Ask before assuming.";
	const HEADING: &'static str = "About You";
	const KEY: &'static str = "user";

	fn fields(&self) -> Vec<(&'static str, Field<'_>)> {
		vec![
			("name", Field::Text(&self.name)),
			("location", Field::Text(&self.location)),
			("occupation", Field::Text(&self.occupation)),
			("relationships", Field::List(&self.relationships)),
			("interests", Field::List(&self.interests)),
			("life_context", Field::Text(&self.life_context)),
			("preferred_address", Field::Text(&self.preferred_address)),
		]
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentsSection {
	pub response_style: String,
	pub behavioral_rules: Vec<String>,
	pub context_adaptation: String,
	pub memory_directives: String,
	pub do_not: Vec<String>,
}
impl Section for AgentsSection {
	const FALLBACK: &'static str =
		"Give direct, well-organized answers and adapt length to the question.";
	const HEADING: &'static str = "How I Operate";
	const KEY: &'static str = "agents";

	fn fields(&self) -> Vec<(&'static str, Field<'_>)> {
		vec![
			("response_style", Field::Text(&self.response_style)),
			("behavioral_rules", Field::List(&self.behavioral_rules)),
			("context_adaptation", Field::Text(&self.context_adaptation)),
			("memory_directives", Field::Text(&self.memory_directives)),
			("do_not", Field::List(&self.do_not)),
		]
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolsSection {
	pub likely_usage: Vec<String>,
	pub capabilities_emphasis: Vec<String>,
	pub output_preferences: String,
	pub depth_preference: String,
}
impl Section for ToolsSection {
	const FALLBACK: &'static str = "Offer general-purpose help across writing, research and planning.";
	const HEADING: &'static str = "My Capabilities";
	const KEY: &'static str = "tools";

	fn fields(&self) -> Vec<(&'static str, Field<'_>)> {
		vec![
			("likely_usage", Field::List(&self.likely_usage)),
			("capabilities_emphasis", Field::List(&self.capabilities_emphasis)),
			("output_preferences", Field::Text(&self.output_preferences)),
			("depth_preference", Field::Text(&self.depth_preference)),
		]
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickPassResult {
	pub soul: SoulSection,
	pub identity: IdentitySection,
	pub user: UserSection,
	pub agents: AgentsSection,
	pub tools: ToolsSection,
}
impl QuickPassResult {
	pub fn ai_name(&self) -> &str {
		&self.identity.ai_name
	}

	pub fn archetype(&self) -> &str {
		&self.identity.archetype
	}

	pub fn trait_count(&self) -> usize {
		self.soul.personality_traits.len()
	}

	pub fn to_markdown(&self) -> String {
		[
			self.soul.to_markdown(),
			self.identity.to_markdown(),
			self.user.to_markdown(),
			self.agents.to_markdown(),
			self.tools.to_markdown(),
		]
		.join("\n\n")
	}
}

/// A stored profile as consumers see it. Any section may be absent, for example when the import
/// fell back to a statistics-only profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSections {
	pub soul: Option<SoulSection>,
	pub identity: Option<IdentitySection>,
	pub user: Option<UserSection>,
	pub agents: Option<AgentsSection>,
	pub tools: Option<ToolsSection>,
}
impl ProfileSections {
	pub fn is_empty(&self) -> bool {
		self.soul.is_none()
			&& self.identity.is_none()
			&& self.user.is_none()
			&& self.agents.is_none()
			&& self.tools.is_none()
	}

	/// Renders every section, substituting generic guidance for the missing ones.
	pub fn to_markdown(&self) -> String {
		[
			render_or_fallback(self.soul.as_ref()),
			render_or_fallback(self.identity.as_ref()),
			render_or_fallback(self.user.as_ref()),
			render_or_fallback(self.agents.as_ref()),
			render_or_fallback(self.tools.as_ref()),
		]
		.join("\n\n")
	}
}
impl From<QuickPassResult> for ProfileSections {
	fn from(result: QuickPassResult) -> Self {
		Self {
			soul: Some(result.soul),
			identity: Some(result.identity),
			user: Some(result.user),
			agents: Some(result.agents),
			tools: Some(result.tools),
		}
	}
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawQuickPass {
	soul: Option<RawSoul>,
	identity: Option<RawIdentity>,
	user: Option<RawUser>,
	agents: Option<RawAgents>,
	tools: Option<RawTools>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSoul {
	communication_style: Option<String>,
	personality_traits: Option<Vec<String>>,
	tone_preferences: Option<String>,
	boundaries: Option<String>,
	humor_style: Option<String>,
	formality_level: Option<String>,
	emotional_patterns: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawIdentity {
	ai_name: Option<String>,
	archetype: Option<String>,
	vibe: Option<String>,
	emoji_style: Option<String>,
	signature_greeting: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawUser {
	name: Option<String>,
	location: Option<String>,
	occupation: Option<String>,
	relationships: Option<Vec<String>>,
	interests: Option<Vec<String>>,
	life_context: Option<String>,
	preferred_address: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawAgents {
	response_style: Option<String>,
	behavioral_rules: Option<Vec<String>>,
	context_adaptation: Option<String>,
	memory_directives: Option<String>,
	do_not: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawTools {
	likely_usage: Option<Vec<String>>,
	capabilities_emphasis: Option<Vec<String>>,
	output_preferences: Option<String>,
	depth_preference: Option<String>,
}

impl RawQuickPass {
	fn normalize(self) -> QuickPassResult {
		let soul = self.soul.unwrap_or_default();
		let identity = self.identity.unwrap_or_default();
		let user = self.user.unwrap_or_default();
		let agents = self.agents.unwrap_or_default();
		let tools = self.tools.unwrap_or_default();

		QuickPassResult {
			soul: SoulSection {
				communication_style: text(soul.communication_style),
				personality_traits: list(soul.personality_traits),
				tone_preferences: text(soul.tone_preferences),
				boundaries: text(soul.boundaries),
				humor_style: text(soul.humor_style),
				formality_level: text(soul.formality_level),
				emotional_patterns: text(soul.emotional_patterns),
			},
			identity: IdentitySection {
				ai_name: text(identity.ai_name),
				archetype: text(identity.archetype),
				vibe: text(identity.vibe),
				emoji_style: text(identity.emoji_style),
				signature_greeting: text(identity.signature_greeting),
			},
			user: UserSection {
				name: text(user.name),
				location: text(user.location),
				occupation: text(user.occupation),
				relationships: list(user.relationships),
				interests: list(user.interests),
				life_context: text(user.life_context),
				preferred_address: text(user.preferred_address),
			},
			agents: AgentsSection {
				response_style: text(agents.response_style),
				behavioral_rules: list(agents.behavioral_rules),
				context_adaptation: text(agents.context_adaptation),
				memory_directives: text(agents.memory_directives),
				do_not: list(agents.do_not),
			},
			tools: ToolsSection {
				likely_usage: list(tools.likely_usage),
				capabilities_emphasis: list(tools.capabilities_emphasis),
				output_preferences: text(tools.output_preferences),
				depth_preference: text(tools.depth_preference),
			},
		}
	}
}

/// Removes a surrounding markdown code fence (with or without a `json` tag) from model output.
pub fn strip_code_fences(raw: &str) -> &str {
	let mut text = raw.trim();

	if let Some(rest) = text.strip_prefix("```json") {
		text = rest;
	} else if let Some(rest) = text.strip_prefix("```") {
		text = rest;
	}
	if let Some(rest) = text.strip_suffix("```") {
		text = rest;
	}

	text.trim()
}

/// Parses and validates raw model output into a fully populated profile.
pub fn parse_quick_pass(raw: &str) -> Result<QuickPassResult, ProfileError> {
	let value: Value = serde_json::from_str(strip_code_fences(raw)).map_err(ProfileError::Json)?;

	if !value.is_object() {
		return Err(ProfileError::NotAnObject);
	}

	let parsed: RawQuickPass = serde_json::from_value(value).map_err(ProfileError::Schema)?;

	Ok(parsed.normalize())
}

/// Profile text stored when the quick pass produced nothing usable.
pub fn fallback_profile_text(summary: ExportSummary) -> String {
	format!(
		"You've had {} messages across {} conversations. A detailed profile will be available after a re-import.",
		summary.messages, summary.conversations
	)
}

/// `communication_style` becomes `Communication Style`.
pub fn field_label(name: &str) -> String {
	name.split('_')
		.filter(|word| !word.is_empty())
		.map(|word| {
			let mut chars = word.chars();

			match chars.next() {
				Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
				None => String::new(),
			}
		})
		.collect::<Vec<_>>()
		.join(" ")
}

fn render_or_fallback<S>(section: Option<&S>) -> String
where
	S: Section,
{
	match section {
		Some(section) => section.to_markdown(),
		None => format!("## {}\n{}", S::HEADING, S::FALLBACK),
	}
}

fn text(value: Option<String>) -> String {
	value
		.map(|value| value.trim().to_string())
		.filter(|value| !value.is_empty())
		.unwrap_or_else(|| NOT_ENOUGH_DATA.to_string())
}

fn list(value: Option<Vec<String>>) -> Vec<String> {
	value
		.unwrap_or_default()
		.into_iter()
		.map(|item| item.trim().to_string())
		.filter(|item| !item.is_empty())
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn strips_tagged_and_bare_fences() {
		assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
		assert_eq!(strip_code_fences("```\n{}\n```"), "{}");
		assert_eq!(strip_code_fences("  {}  "), "{}");
	}

	#[test]
	fn labels_title_case_each_word() {
		assert_eq!(field_label("communication_style"), "Communication Style");
		assert_eq!(field_label("do_not"), "Do Not");
		assert_eq!(field_label("ai_name"), "Ai Name");
	}
}
