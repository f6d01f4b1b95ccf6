use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub siyuan: Siyuan,
	pub index: Index,
	pub providers: Providers,
	pub upstream: Upstream,
	pub retrieval: Retrieval,
	#[serde(default)]
	pub security: Security,
}

#[derive(Debug, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct Siyuan {
	pub api_base: String,
	/// SiYuan API token (not the auth code). Sent as `Authorization: Token <value>`.
	pub api_token: Option<String>,
	#[serde(default = "default_page_size")]
	pub page_size: u32,
}

#[derive(Debug, Deserialize)]
pub struct Index {
	pub qdrant_url: String,
	pub collection: String,
	pub vector_dim: u32,
	#[serde(default = "default_refresh_interval_secs")]
	pub refresh_interval_secs: u64,
	#[serde(default = "default_embed_batch_size")]
	pub embed_batch_size: u32,
	/// Treat the watermark as unset on the first cycle after startup.
	#[serde(default)]
	pub force_rebuild: bool,
}

#[derive(Debug, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct Upstream {
	pub api_base: String,
	/// Credential presented to the upstream completion API. Never the companion token.
	pub api_key: Option<String>,
	#[serde(default = "default_upstream_timeout_ms")]
	pub timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct Retrieval {
	#[serde(default = "default_top_k")]
	pub top_k: u32,
	pub max_context_tokens: u32,
	/// Hugging Face tokenizer repo used for the context token budget. When unset,
	/// token counts fall back to a chars/4 estimate.
	pub tokenizer_repo: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Security {
	pub companion_token: Option<String>,
}

fn default_page_size() -> u32 {
	512
}

fn default_refresh_interval_secs() -> u64 {
	300
}

fn default_embed_batch_size() -> u32 {
	32
}

fn default_upstream_timeout_ms() -> u64 {
	120_000
}

fn default_top_k() -> u32 {
	5
}
