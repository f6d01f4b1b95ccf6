mod block;
mod error;

pub use block::{Block, is_watermark};
pub use error::{Error, Result};

use std::time::Duration;

use reqwest::{
	Client,
	header::{AUTHORIZATION, HeaderMap},
};
use serde::de::DeserializeOwned;
use serde_json::Value;

const SIYUAN_TIMEOUT: Duration = Duration::from_secs(30);

/// Read-only client for the SiYuan kernel API. This crate never issues a write
/// call against the note store.
pub struct SiyuanClient {
	http: Client,
	api_base: String,
}

impl SiyuanClient {
	pub fn new(cfg: &quill_config::Siyuan) -> Result<Self> {
		let mut headers = HeaderMap::new();

		if let Some(token) = cfg.api_token.as_deref() {
			headers.insert(AUTHORIZATION, format!("Token {token}").parse()?);
		}

		let http = Client::builder().timeout(SIYUAN_TIMEOUT).default_headers(headers).build()?;

		Ok(Self { http, api_base: cfg.api_base.clone() })
	}

	/// Blocks with `updated > watermark`, ordered by `(updated, id)`, one page at
	/// a time. `watermark = None` selects every block.
	pub async fn blocks_updated_since(
		&self,
		watermark: Option<&str>,
		offset: u64,
		limit: u32,
	) -> Result<Vec<Block>> {
		let predicate = match watermark {
			Some(value) => {
				if !is_watermark(value) {
					return Err(Error::InvalidQuery {
						message: format!("Watermark {value:?} is not a 14-digit timestamp."),
					});
				}

				format!("WHERE updated > '{value}' ")
			},
			None => String::new(),
		};
		let stmt = format!(
			"SELECT id, parent_id, root_id, hash, content, markdown, type, subtype, updated \
			 FROM blocks {predicate}ORDER BY updated, id LIMIT {limit} OFFSET {offset}",
		);
		let rows: Vec<Block> = self.sql(&stmt).await?;

		tracing::debug!(count = rows.len(), offset, "Fetched a page of updated blocks.");

		Ok(rows)
	}

	/// Whole-document reconstruction as standard Markdown.
	pub async fn document_markdown(&self, root_id: &str) -> Result<String> {
		let payload = serde_json::json!({ "id": root_id });
		let data = self.post("/api/lute/copyStdMarkdown", &payload).await?;

		data.as_str().map(str::to_string).ok_or_else(|| Error::InvalidResponse {
			message: format!("Markdown export for {root_id} is not a string."),
		})
	}

	async fn sql<T>(&self, stmt: &str) -> Result<Vec<T>>
	where
		T: DeserializeOwned,
	{
		let payload = serde_json::json!({ "stmt": stmt });
		let data = self.post("/api/query/sql", &payload).await?;

		Ok(serde_json::from_value(data)?)
	}

	async fn post(&self, path: &str, payload: &Value) -> Result<Value> {
		let url = format!("{}{path}", self.api_base);
		let response = self.http.post(url).json(payload).send().await?;
		let body: Value = response.error_for_status()?.json().await?;

		parse_envelope(body)
	}
}

/// Unwraps SiYuan's `{code, msg, data}` response envelope.
fn parse_envelope(body: Value) -> Result<Value> {
	let code = body.get("code").and_then(Value::as_i64).ok_or_else(|| Error::InvalidResponse {
		message: "Response envelope is missing a numeric code.".to_string(),
	})?;

	if code != 0 {
		let message = body.get("msg").and_then(Value::as_str).unwrap_or("unknown error");

		return Err(Error::Api { code, message: message.to_string() });
	}

	Ok(body.get("data").cloned().unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn envelope_unwraps_data_on_success() {
		let body = serde_json::json!({ "code": 0, "msg": "", "data": [{ "id": "x" }] });
		let data = parse_envelope(body).expect("Envelope must unwrap.");

		assert!(data.is_array());
	}

	#[test]
	fn envelope_surfaces_api_errors() {
		let body = serde_json::json!({ "code": -1, "msg": "sql error" });
		let err = parse_envelope(body).expect_err("Expected an API error.");

		assert!(matches!(err, Error::Api { code: -1, .. }));
	}

	#[test]
	fn envelope_rejects_missing_code() {
		let body = serde_json::json!({ "data": [] });
		let err = parse_envelope(body).expect_err("Expected an invalid response error.");

		assert!(matches!(err, Error::InvalidResponse { .. }));
	}
}
