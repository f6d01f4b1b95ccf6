//! The upstream relay.
//!
//! Requests go out with the configured upstream credential; the client's own
//! `Authorization` header never leaves this process. Responses stream back
//! body-for-body, which keeps server-sent-event completions working. The
//! request timeout only applies to non-streaming calls; a streamed completion
//! may legitimately outlive any fixed deadline, so it is bounded by the
//! connect timeout alone.

use std::time::Duration;

use axum::{
	body::Body,
	http::{HeaderMap, HeaderName, header},
	response::Response,
};
use color_eyre::eyre;
use serde_json::Value;

/// Never forwarded from the client to the upstream. `authorization` carries
/// the companion token, the rest are framing or hop-by-hop headers.
const BLOCKED_REQUEST_HEADERS: &[HeaderName] = &[
	header::AUTHORIZATION,
	header::HOST,
	header::CONTENT_LENGTH,
	header::CONTENT_TYPE,
	header::CONNECTION,
	header::TE,
	header::TRAILER,
	header::TRANSFER_ENCODING,
	header::UPGRADE,
	header::PROXY_AUTHENTICATE,
	header::PROXY_AUTHORIZATION,
];
/// Never forwarded from the upstream to the client; the relay re-frames the
/// streamed body itself.
const BLOCKED_RESPONSE_HEADERS: &[HeaderName] =
	&[header::CONTENT_LENGTH, header::TRANSFER_ENCODING, header::CONNECTION];

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Forwarder {
	http: reqwest::Client,
	api_base: String,
	api_key: Option<String>,
	timeout: Duration,
}

impl Forwarder {
	pub fn new(cfg: &quill_config::Upstream) -> color_eyre::Result<Self> {
		let http = reqwest::Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;

		Ok(Self {
			http,
			api_base: cfg.api_base.clone(),
			api_key: cfg.api_key.clone(),
			timeout: Duration::from_millis(cfg.timeout_ms),
		})
	}

	/// Relays a JSON POST to `{api_base}{path}` and streams the response back.
	pub async fn post(
		&self,
		path: &str,
		inbound: &HeaderMap,
		body: Value,
	) -> color_eyre::Result<Response> {
		let mut request = self
			.http
			.post(format!("{}{path}", self.api_base))
			.headers(relayable_headers(inbound))
			.json(&body);

		if !wants_stream(&body) {
			request = request.timeout(self.timeout);
		}
		if let Some(api_key) = &self.api_key {
			request = request.bearer_auth(api_key);
		}

		relay(request.send().await?)
	}

	pub async fn get(&self, path: &str, inbound: &HeaderMap) -> color_eyre::Result<Response> {
		let mut request = self
			.http
			.get(format!("{}{path}", self.api_base))
			.headers(relayable_headers(inbound))
			.timeout(self.timeout);

		if let Some(api_key) = &self.api_key {
			request = request.bearer_auth(api_key);
		}

		relay(request.send().await?)
	}
}

fn wants_stream(body: &Value) -> bool {
	body.get("stream").and_then(Value::as_bool).unwrap_or(false)
}

fn relayable_headers(inbound: &HeaderMap) -> HeaderMap {
	let mut headers = HeaderMap::new();

	for (name, value) in inbound {
		if BLOCKED_REQUEST_HEADERS.contains(name) || name.as_str() == "keep-alive" {
			continue;
		}

		headers.append(name, value.clone());
	}

	headers
}

fn relay(upstream: reqwest::Response) -> color_eyre::Result<Response> {
	let mut builder = Response::builder().status(upstream.status());

	for (name, value) in upstream.headers() {
		if BLOCKED_RESPONSE_HEADERS.contains(name) {
			continue;
		}

		builder = builder.header(name, value);
	}

	builder
		.body(Body::from_stream(upstream.bytes_stream()))
		.map_err(|err| eyre::eyre!("Failed to assemble the relayed response: {err}."))
}

#[cfg(test)]
mod tests {
	use axum::http::HeaderValue;
	use serde_json::json;

	use super::*;

	#[test]
	fn stream_flag_lifts_the_request_deadline() {
		assert!(wants_stream(&json!({ "stream": true })));
		assert!(!wants_stream(&json!({ "stream": false })));
		assert!(!wants_stream(&json!({ "stream": "true" })));
		assert!(!wants_stream(&json!({ "model": "gpt-4o-mini" })));
	}

	#[test]
	fn client_credential_never_crosses_the_boundary() {
		let mut inbound = HeaderMap::new();

		inbound.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer companion"));
		inbound.insert(header::ACCEPT, HeaderValue::from_static("text/event-stream"));

		let relayed = relayable_headers(&inbound);

		assert!(relayed.get(header::AUTHORIZATION).is_none());
		assert_eq!(relayed.get(header::ACCEPT).unwrap(), "text/event-stream");
	}
}
