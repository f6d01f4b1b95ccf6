use axum::{
	Json, Router,
	extract::State,
	http::{HeaderMap, StatusCode, header},
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use quill_service::ServiceError;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/openai/rag/v1/chat/completions", post(rag_chat_completions))
		.route("/openai/rag/v1/completions", post(rag_completions))
		.route("/openai/rag/v1/retrieve", post(retrieve))
		.route("/openai/rag/v1/embeddings", post(embeddings))
		.route("/openai/direct/v1/chat/completions", post(direct_chat_completions))
		.route("/openai/direct/v1/completions", post(direct_completions))
		.route("/openai/direct/v1/embeddings", post(embeddings))
		.route("/openai/v1/models", get(models))
		.with_state(state)
}

async fn health() -> StatusCode {
	StatusCode::OK
}

async fn rag_chat_completions(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(body): Json<Value>,
) -> Result<Response, ApiError> {
	authorize(&state, &headers)?;

	let augmented = state.service.augment_request(&body).await.ok_or_else(missing_prompt)?;

	forward_post(&state, "/chat/completions", &headers, augmented).await
}

async fn rag_completions(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(body): Json<Value>,
) -> Result<Response, ApiError> {
	authorize(&state, &headers)?;

	let augmented = state.service.augment_request(&body).await.ok_or_else(missing_prompt)?;

	forward_post(&state, "/completions", &headers, augmented).await
}

async fn direct_chat_completions(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(body): Json<Value>,
) -> Result<Response, ApiError> {
	authorize(&state, &headers)?;

	forward_post(&state, "/chat/completions", &headers, body).await
}

async fn direct_completions(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(body): Json<Value>,
) -> Result<Response, ApiError> {
	authorize(&state, &headers)?;

	forward_post(&state, "/completions", &headers, body).await
}

/// Embedding passthrough; served under both prefixes so clients configured
/// against either base URL reach the upstream embedder unchanged.
async fn embeddings(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(body): Json<Value>,
) -> Result<Response, ApiError> {
	authorize(&state, &headers)?;

	forward_post(&state, "/embeddings", &headers, body).await
}

async fn models(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
	authorize(&state, &headers)?;

	state.forwarder.get("/models", &headers).await.map_err(upstream_unreachable)
}

#[derive(Debug, Deserialize)]
struct RetrieveRequest {
	query: String,
}

#[derive(Debug, Serialize)]
struct RetrieveResponse {
	documents: Vec<RetrievedDocument>,
	total_tokens: usize,
}

#[derive(Debug, Serialize)]
struct RetrievedDocument {
	root_id: String,
	score: f32,
	tokens: usize,
	markdown: String,
}

/// Exposes retrieval without the upstream round-trip, for inspecting what a
/// RAG completion would be grounded on.
async fn retrieve(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(payload): Json<RetrieveRequest>,
) -> Result<Json<RetrieveResponse>, ApiError> {
	authorize(&state, &headers)?;

	let context = state.service.retrieve(&payload.query).await?;

	Ok(Json(RetrieveResponse {
		total_tokens: context.total_tokens,
		documents: context
			.documents
			.into_iter()
			.map(|document| RetrievedDocument {
				root_id: document.root_id,
				score: document.score,
				tokens: document.tokens,
				markdown: document.markdown,
			})
			.collect(),
	}))
}

/// Companion-token check. Open when no token is configured.
fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
	let Some(expected) = &state.companion_token else {
		return Ok(());
	};
	let presented = headers
		.get(header::AUTHORIZATION)
		.and_then(|value| value.to_str().ok())
		.and_then(|value| value.strip_prefix("Bearer "));

	if presented == Some(expected.as_str()) {
		Ok(())
	} else {
		Err(json_error(StatusCode::UNAUTHORIZED, "unauthorized", "Missing or invalid companion token."))
	}
}

async fn forward_post(
	state: &AppState,
	path: &str,
	headers: &HeaderMap,
	body: Value,
) -> Result<Response, ApiError> {
	state.forwarder.post(path, headers, body).await.map_err(upstream_unreachable)
}

fn missing_prompt() -> ApiError {
	json_error(
		StatusCode::BAD_REQUEST,
		"missing_prompt",
		"The request body carries neither a prompt nor a user message.",
	)
}

fn upstream_unreachable(err: color_eyre::Report) -> ApiError {
	tracing::warn!(error = %err, "Upstream request failed.");

	json_error(StatusCode::BAD_GATEWAY, "upstream_unreachable", "The upstream API request failed.")
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error_code: String,
	message: String,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error_code: String,
	message: String,
}

pub fn json_error(status: StatusCode, code: &str, message: impl Into<String>) -> ApiError {
	ApiError { status, error_code: code.into(), message: message.into() }
}

impl From<ServiceError> for ApiError {
	fn from(err: ServiceError) -> Self {
		tracing::warn!(error = %err, "Retrieval failed.");

		json_error(StatusCode::BAD_GATEWAY, "retrieval_failed", err.to_string())
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body = ErrorBody { error_code: self.error_code, message: self.message };

		(self.status, Json(body)).into_response()
	}
}
