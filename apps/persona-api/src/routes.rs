use axum::{
	Json, Router,
	body::Bytes,
	extract::{DefaultBodyLimit, FromRequestParts, Query, State},
	http::{HeaderMap, HeaderValue, StatusCode, header, request::Parts},
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use persona_providers::memory::MemoryResponse;
use persona_service::{
	ChatContext, ChunkReceipt, ChunkUpload, Error as ServiceError, MemoryQueryRequest,
	ProfileResponse, ProgressResponse, TriggerRequest, TriggerResponse,
};

use crate::{rate_limit::Tier, state::AppState};

pub const HEADER_USER_ID: &str = "X-Persona-User-Id";
pub const HEADER_UPLOAD_ID: &str = "X-Upload-Id";
pub const HEADER_CHUNK_INDEX: &str = "X-Chunk-Index";
pub const HEADER_TOTAL_CHUNKS: &str = "X-Total-Chunks";
pub const HEADER_TOTAL_SIZE: &str = "X-Total-Size";

pub fn router(state: AppState) -> Router {
	let chunk_limit = state.service.cfg.upload.max_chunk_bytes;

	Router::new()
		.route("/health", get(health))
		.route(
			"/v1/import/chunks",
			post(upload_chunk).layer(DefaultBodyLimit::max(chunk_limit)),
		)
		.route("/v1/import/trigger", post(trigger_import))
		.route("/v1/import/retry", post(retry_import))
		.route("/v1/import/progress", get(import_progress))
		.route("/v1/profile", get(profile))
		.route("/v1/chat/context", get(chat_context))
		.route("/v1/memory/query", post(query_memories))
		.route("/v1/memory/health", get(memory_health))
		.with_state(state)
}

/// The authenticated caller.
pub struct AuthUser(pub String);

impl FromRequestParts<AppState> for AuthUser {
	type Rejection = ApiError;

	async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
		if let Some(token) = state.service.cfg.security.api_auth_token.as_deref() {
			let presented = header_str(&parts.headers, header::AUTHORIZATION.as_str())
				.and_then(|value| value.strip_prefix("Bearer "));

			if presented != Some(token) {
				return Err(unauthorized("A valid bearer token is required."));
			}
		}

		match header_str(&parts.headers, HEADER_USER_ID).map(str::trim) {
			Some(user_id) if !user_id.is_empty() => Ok(Self(user_id.to_string())),
			_ => Err(unauthorized(format!("{HEADER_USER_ID} header is required."))),
		}
	}
}

#[derive(Debug, Deserialize)]
struct ProgressQuery {
	last_known_percent: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ChatContextQuery {
	#[serde(default)]
	query: String,
}

#[derive(Debug, Serialize)]
struct MemoryHealth {
	available: bool,
}

async fn health() -> StatusCode {
	StatusCode::OK
}

async fn upload_chunk(
	State(state): State<AppState>,
	AuthUser(user_id): AuthUser,
	headers: HeaderMap,
	body: Bytes,
) -> Result<Json<ChunkReceipt>, ApiError> {
	enforce_rate_limit(&state, Tier::Upload, &user_id)?;

	let upload_id = header_str(&headers, HEADER_UPLOAD_ID).unwrap_or_default();
	let chunk_index = required_number(&headers, HEADER_CHUNK_INDEX)?;
	let total_chunks = required_number(&headers, HEADER_TOTAL_CHUNKS)?;
	let total_size_hint = match header_str(&headers, HEADER_TOTAL_SIZE) {
		Some(raw) => Some(parse_number(HEADER_TOTAL_SIZE, raw)?),
		None => None,
	};
	let receipt = state
		.service
		.receive_chunk(ChunkUpload {
			user_id: &user_id,
			upload_id,
			chunk_index,
			total_chunks,
			total_size_hint,
			bytes: body.to_vec(),
		})
		.await?;

	Ok(Json(receipt))
}

async fn trigger_import(
	State(state): State<AppState>,
	AuthUser(user_id): AuthUser,
	Json(payload): Json<TriggerRequest>,
) -> Result<(StatusCode, Json<TriggerResponse>), ApiError> {
	enforce_rate_limit(&state, Tier::Expensive, &user_id)?;

	let response = state.service.trigger_import(&user_id, payload).await?;

	Ok((StatusCode::ACCEPTED, Json(response)))
}

async fn retry_import(
	State(state): State<AppState>,
	AuthUser(user_id): AuthUser,
) -> Result<(StatusCode, Json<TriggerResponse>), ApiError> {
	enforce_rate_limit(&state, Tier::Expensive, &user_id)?;

	let response = state.service.retry_import(&user_id).await?;

	Ok((StatusCode::ACCEPTED, Json(response)))
}

async fn import_progress(
	State(state): State<AppState>,
	AuthUser(user_id): AuthUser,
	Query(query): Query<ProgressQuery>,
) -> Result<Json<ProgressResponse>, ApiError> {
	let response =
		state.service.import_progress(&user_id, query.last_known_percent.unwrap_or(0.0)).await?;

	Ok(Json(response))
}

async fn profile(
	State(state): State<AppState>,
	AuthUser(user_id): AuthUser,
) -> Result<Json<ProfileResponse>, ApiError> {
	enforce_rate_limit(&state, Tier::Standard, &user_id)?;

	let response = state.service.profile(&user_id).await?;

	Ok(Json(response))
}

async fn chat_context(
	State(state): State<AppState>,
	AuthUser(user_id): AuthUser,
	Query(query): Query<ChatContextQuery>,
) -> Result<Json<ChatContext>, ApiError> {
	enforce_rate_limit(&state, Tier::Standard, &user_id)?;

	let response = state.service.chat_context(&user_id, &query.query, &[]).await?;

	Ok(Json(response))
}

async fn query_memories(
	State(state): State<AppState>,
	AuthUser(user_id): AuthUser,
	Json(payload): Json<MemoryQueryRequest>,
) -> Result<Json<MemoryResponse>, ApiError> {
	enforce_rate_limit(&state, Tier::Standard, &user_id)?;

	let response = state.service.query_memories(&user_id, &payload).await?;

	Ok(Json(response))
}

async fn memory_health(State(state): State<AppState>) -> Json<MemoryHealth> {
	Json(MemoryHealth { available: state.service.memory_health().await })
}

fn enforce_rate_limit(state: &AppState, tier: Tier, user_id: &str) -> Result<(), ApiError> {
	let Some(limits) = state.limits.as_deref() else {
		return Ok(());
	};

	limits.check(tier, user_id).map_err(|wait| {
		let retry_after = wait.as_secs_f64().ceil().max(1.0) as u64;

		tracing::warn!(user_id, ?tier, retry_after, "Request rate limited.");

		let mut error =
			json_error(StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", "Too many requests.", None)
				.with_extra("retry_after_seconds", retry_after);

		error.retry_after = Some(retry_after);

		error
	})
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
	headers.get(name).and_then(|value| value.to_str().ok())
}

fn required_number<T>(headers: &HeaderMap, name: &str) -> Result<T, ApiError>
where
	T: std::str::FromStr,
{
	match header_str(headers, name) {
		Some(raw) => parse_number(name, raw),
		None => Err(json_error(
			StatusCode::BAD_REQUEST,
			"INVALID_REQUEST",
			format!("{name} header is required."),
			Some(vec![name.to_string()]),
		)),
	}
}

fn parse_number<T>(name: &str, raw: &str) -> Result<T, ApiError>
where
	T: std::str::FromStr,
{
	raw.trim().parse().map_err(|_| {
		json_error(
			StatusCode::BAD_REQUEST,
			"INVALID_REQUEST",
			format!("{name} must be a non-negative integer."),
			Some(vec![name.to_string()]),
		)
	})
}

fn unauthorized(message: impl Into<String>) -> ApiError {
	json_error(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message, None)
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error_code: String,
	message: String,
	fields: Option<Vec<String>>,
	#[serde(flatten)]
	extra: Map<String, Value>,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error_code: String,
	message: String,
	fields: Option<Vec<String>>,
	extra: Map<String, Value>,
	retry_after: Option<u64>,
}
impl ApiError {
	fn new(
		status: StatusCode,
		error_code: impl Into<String>,
		message: impl Into<String>,
		fields: Option<Vec<String>>,
	) -> Self {
		Self {
			status,
			error_code: error_code.into(),
			message: message.into(),
			fields,
			extra: Map::new(),
			retry_after: None,
		}
	}

	fn with_extra(mut self, key: &str, value: impl Into<Value>) -> Self {
		self.extra.insert(key.to_string(), value.into());

		self
	}
}

pub fn json_error(
	status: StatusCode,
	code: &str,
	message: impl Into<String>,
	fields: Option<Vec<String>>,
) -> ApiError {
	ApiError::new(status, code, message, fields)
}

impl From<ServiceError> for ApiError {
	fn from(err: ServiceError) -> Self {
		match err {
			ServiceError::InvalidRequest { message } =>
				json_error(StatusCode::BAD_REQUEST, "INVALID_REQUEST", message, None),
			ServiceError::Unauthorized { message } => unauthorized(message),
			ServiceError::NotFound { message } =>
				json_error(StatusCode::NOT_FOUND, "NOT_FOUND", message, None),
			ServiceError::Conflict { message, elapsed_minutes } => {
				let error = json_error(StatusCode::CONFLICT, "IMPORT_IN_PROGRESS", message, None);

				match elapsed_minutes {
					Some(minutes) => error.with_extra("elapsed_minutes", minutes),
					None => error,
				}
			},
			ServiceError::NotRetryable { current_status } => json_error(
				StatusCode::BAD_REQUEST,
				"NOT_RETRYABLE",
				format!("Only failed imports can be retried. Current status is {current_status}."),
				None,
			)
			.with_extra("current_status", current_status),
			ServiceError::Busy { message } => {
				tracing::warn!(error = %message, "Request shed.");

				json_error(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_BUSY", message, None)
			},
			ServiceError::Dispatch { message } => {
				tracing::error!(error = %message, "Import dispatch failed.");

				json_error(StatusCode::INTERNAL_SERVER_ERROR, "DISPATCH_FAILED", message, None)
			},
			ServiceError::Provider { message } => {
				tracing::error!(error = %message, "Provider request failed.");

				json_error(StatusCode::BAD_GATEWAY, "PROVIDER_ERROR", message, None)
			},
			ServiceError::Storage { message } => {
				tracing::error!(error = %message, "Storage request failed.");

				json_error(
					StatusCode::INTERNAL_SERVER_ERROR,
					"STORAGE_ERROR",
					"A storage error occurred.",
					None,
				)
			},
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body = ErrorBody {
			error_code: self.error_code,
			message: self.message,
			fields: self.fields,
			extra: self.extra,
		};

		let mut response = (self.status, Json(body)).into_response();

		if let Some(seconds) = self.retry_after {
			response.headers_mut().insert(header::RETRY_AFTER, HeaderValue::from(seconds));
		}

		response
	}
}
