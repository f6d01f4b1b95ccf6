mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Config, EmbeddingProviderConfig, Index, Providers, Retrieval, Security, Service, Siyuan,
	Upstream,
};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::Read { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::Parse { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	const NON_EMPTY: &str = "must be non-empty.";
	const POSITIVE: &str = "must be greater than zero.";

	let invalid = |field, reason| Err(Error::Invalid { field, reason });

	if cfg.service.http_bind.trim().is_empty() {
		return invalid("service.http_bind", NON_EMPTY);
	}
	if cfg.siyuan.api_base.trim().is_empty() {
		return invalid("siyuan.api_base", NON_EMPTY);
	}
	if cfg.siyuan.page_size == 0 {
		return invalid("siyuan.page_size", POSITIVE);
	}
	if cfg.index.qdrant_url.trim().is_empty() {
		return invalid("index.qdrant_url", NON_EMPTY);
	}
	if cfg.index.collection.trim().is_empty() {
		return invalid("index.collection", NON_EMPTY);
	}
	if cfg.index.vector_dim == 0 {
		return invalid("index.vector_dim", POSITIVE);
	}
	if cfg.index.refresh_interval_secs == 0 {
		return invalid("index.refresh_interval_secs", POSITIVE);
	}
	if cfg.index.embed_batch_size == 0 {
		return invalid("index.embed_batch_size", POSITIVE);
	}
	if cfg.providers.embedding.dimensions == 0 {
		return invalid("providers.embedding.dimensions", POSITIVE);
	}
	if cfg.providers.embedding.dimensions != cfg.index.vector_dim {
		return invalid("providers.embedding.dimensions", "must match index.vector_dim.");
	}
	if cfg.providers.embedding.api_key.trim().is_empty() {
		return invalid("providers.embedding.api_key", NON_EMPTY);
	}
	if cfg.upstream.api_base.trim().is_empty() {
		return invalid("upstream.api_base", NON_EMPTY);
	}
	if cfg.retrieval.top_k == 0 {
		return invalid("retrieval.top_k", POSITIVE);
	}
	if cfg.retrieval.max_context_tokens == 0 {
		return invalid("retrieval.max_context_tokens", POSITIVE);
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	for base in [
		&mut cfg.siyuan.api_base,
		&mut cfg.index.qdrant_url,
		&mut cfg.providers.embedding.api_base,
		&mut cfg.upstream.api_base,
	] {
		while base.ends_with('/') {
			base.pop();
		}
	}
	if cfg.siyuan.api_token.as_deref().map(|token| token.trim().is_empty()).unwrap_or(false) {
		cfg.siyuan.api_token = None;
	}
	if cfg.upstream.api_key.as_deref().map(|key| key.trim().is_empty()).unwrap_or(false) {
		cfg.upstream.api_key = None;
	}
	if cfg
		.security
		.companion_token
		.as_deref()
		.map(|token| token.trim().is_empty())
		.unwrap_or(false)
	{
		cfg.security.companion_token = None;
	}
	if cfg
		.retrieval
		.tokenizer_repo
		.as_deref()
		.map(|repo| repo.trim().is_empty())
		.unwrap_or(false)
	{
		cfg.retrieval.tokenizer_repo = None;
	}
}
