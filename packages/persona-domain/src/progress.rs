//! Maps backend import progress onto four user-facing stages.

use serde::{Deserialize, Serialize};

/// Past this percent the upload is committed and the client may disconnect.
pub const SAFE_TO_CLOSE_PERCENT: f64 = 55.0;
pub const COMPLETE_LABEL: &str = "Complete!";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stage {
	pub name: &'static str,
	pub min: u8,
	pub max: u8,
}

/// Bands are half-open on the upper side except the last: a percent belongs to the last stage
/// whose `min` it reaches.
pub const STAGES: [Stage; 4] = [
	Stage { name: "Upload", min: 0, max: 49 },
	Stage { name: "Extract", min: 50, max: 59 },
	Stage { name: "Analyze", min: 60, max: 79 },
	Stage { name: "Build Profile", min: 80, max: 100 },
];

const STAGE_LABELS: [&str; 4] = [
	"Uploading your data...",
	"Extracting conversations...",
	"Analyzing your personality...",
	"Building your profile...",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressView {
	pub stage_index: usize,
	pub stage_label: String,
	pub display_percent: f64,
	pub is_complete: bool,
	pub safe_to_close: bool,
}

pub fn map_progress(
	backend_percent: f64,
	backend_stage: Option<&str>,
	last_known_percent: f64,
) -> ProgressView {
	let display_percent =
		finite_or_zero(backend_percent).max(finite_or_zero(last_known_percent)).clamp(0.0, 100.0);
	let stage_index = stage_index(display_percent);

	ProgressView {
		stage_index,
		stage_label: stage_label(display_percent, stage_index, backend_stage),
		display_percent,
		is_complete: display_percent >= 100.0,
		safe_to_close: display_percent >= SAFE_TO_CLOSE_PERCENT,
	}
}

pub fn stage_index(percent: f64) -> usize {
	STAGES.iter().rposition(|stage| percent >= f64::from(stage.min)).unwrap_or(0)
}

/// Position within a stage's band, 0 to 100. Unknown stages report 0.
pub fn stage_progress(stage_index: usize, percent: f64) -> f64 {
	let Some(stage) = STAGES.get(stage_index) else {
		return 0.0;
	};
	let min = f64::from(stage.min);
	let span = f64::from(stage.max) - min;

	if span <= 0.0 {
		return 0.0;
	}

	((finite_or_zero(percent) - min) / span * 100.0).clamp(0.0, 100.0)
}

fn stage_label(percent: f64, stage_index: usize, backend_stage: Option<&str>) -> String {
	if percent >= 100.0 {
		return COMPLETE_LABEL.to_string();
	}

	let Some(stage) = backend_stage.map(str::trim).filter(|stage| !stage.is_empty()) else {
		return STAGE_LABELS[stage_index.min(STAGE_LABELS.len() - 1)].to_string();
	};
	let lowered = stage.to_lowercase();

	if lowered.contains("download") || lowered.contains("upload") {
		return STAGE_LABELS[0].to_string();
	}
	if lowered.contains("pars") {
		return STAGE_LABELS[1].to_string();
	}
	if lowered.contains("generat") || lowered.contains("analyz") {
		return STAGE_LABELS[2].to_string();
	}
	if lowered.contains("build") || lowered.contains("profile") {
		return STAGE_LABELS[3].to_string();
	}

	capitalize_first(stage)
}

fn capitalize_first(text: &str) -> String {
	let mut chars = text.chars();

	match chars.next() {
		Some(first) => first.to_uppercase().chain(chars).collect(),
		None => String::new(),
	}
}

fn finite_or_zero(value: f64) -> f64 {
	if value.is_nan() { 0.0 } else { value }
}
