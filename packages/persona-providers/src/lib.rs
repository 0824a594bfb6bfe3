pub mod backoff;
pub mod embedding;
pub mod llm;
pub mod memory;

mod error;

pub use error::{Error, Result};

use reqwest::{
	Response, StatusCode,
	header::{AUTHORIZATION, HeaderMap, HeaderName},
};
use serde_json::{Map, Value};

const MAX_ERROR_BODY_CHARS: usize = 512;

pub fn auth_headers(api_key: &str, default_headers: &Map<String, Value>) -> Result<HeaderMap> {
	let mut headers = HeaderMap::new();

	headers.insert(AUTHORIZATION, format!("Bearer {api_key}").parse()?);

	for (key, value) in default_headers {
		let Some(raw) = value.as_str() else {
			return Err(Error::InvalidConfig {
				message: format!("Default header {key:?} must be a string."),
			});
		};

		headers.insert(HeaderName::from_bytes(key.as_bytes())?, raw.parse()?);
	}

	Ok(headers)
}

/// Passes successful responses through and turns the rest into typed errors. Rate limiting is
/// recognized by status 429 or 503, or by a throttling message in the body.
pub async fn check_status(res: Response) -> Result<Response> {
	let status = res.status();

	if status.is_success() {
		return Ok(res);
	}

	let body = res.text().await.unwrap_or_default();
	let message = body.chars().take(MAX_ERROR_BODY_CHARS).collect::<String>();

	if matches!(status, StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE)
		|| is_throttle_message(&message)
	{
		return Err(Error::Throttled { message: format!("HTTP {}: {message}", status.as_u16()) });
	}

	Err(Error::Status { status: status.as_u16(), message })
}

pub fn is_throttle_message(message: &str) -> bool {
	let lowered = message.to_ascii_lowercase();

	["throttl", "too many requests", "rate limit"].iter().any(|needle| lowered.contains(needle))
}
