const SECRET_KEYS: [&str; 5] = ["api_key", "apikey", "password", "secret", "token"];

/// Masks bearer tokens and `key=value` secrets, then caps the text at `max_chars` characters.
pub fn sanitize_error(text: &str, max_chars: usize) -> String {
	let mut parts = Vec::new();
	let mut redact_next = false;

	for raw in text.split_whitespace() {
		let mut word = raw.to_string();

		if redact_next {
			word = "[REDACTED]".to_string();
			redact_next = false;
		}
		if raw.eq_ignore_ascii_case("bearer") {
			redact_next = true;
		}

		let lowered = raw.to_ascii_lowercase();

		for key in SECRET_KEYS {
			if lowered.contains(key) && (lowered.contains('=') || lowered.contains(':')) {
				let sep = if raw.contains('=') { '=' } else { ':' };
				let prefix = raw.split(sep).next().unwrap_or(raw);

				word = format!("{prefix}{sep}[REDACTED]");

				break;
			}
		}

		parts.push(word);
	}

	let out = parts.join(" ");

	match out.char_indices().nth(max_chars) {
		Some((cut, _)) => out[..cut].to_string(),
		None => out,
	}
}
