use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::{Error, Result};

/// OpenAI-style embedding client. One pooled connection set serves both the
/// background indexer and foreground query embedding; index-side and
/// query-side vectors therefore always come from the same model and version.
pub struct EmbeddingClient {
	http: Client,
	cfg: quill_config::EmbeddingProviderConfig,
}

impl EmbeddingClient {
	pub fn new(cfg: &quill_config::EmbeddingProviderConfig) -> Result<Self> {
		let headers = crate::auth_headers(&cfg.api_key, &cfg.default_headers)?;
		let http = Client::builder()
			.timeout(Duration::from_millis(cfg.timeout_ms))
			.default_headers(headers)
			.build()?;

		Ok(Self { http, cfg: cfg.clone() })
	}

	pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
		let url = format!("{}{}", self.cfg.api_base, self.cfg.path);
		let body = serde_json::json!({
			"model": self.cfg.model,
			"input": texts,
			"dimensions": self.cfg.dimensions,
		});
		let response = self.http.post(url).json(&body).send().await?;
		let json: Value = response.error_for_status()?.json().await?;
		let vectors = parse_embedding_response(json)?;

		if vectors.len() != texts.len() {
			return Err(Error::InvalidResponse {
				message: format!(
					"Embedding provider returned {} vectors for {} inputs.",
					vectors.len(),
					texts.len()
				),
			});
		}
		for vector in &vectors {
			validate_dimension(vector, self.cfg.dimensions)?;
		}

		Ok(vectors)
	}
}

fn parse_embedding_response(json: Value) -> Result<Vec<Vec<f32>>> {
	let data =
		json.get("data").and_then(Value::as_array).ok_or_else(|| Error::InvalidResponse {
			message: "Embedding response is missing a data array.".to_string(),
		})?;
	let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());

	for (fallback_index, item) in data.iter().enumerate() {
		let index = item
			.get("index")
			.and_then(Value::as_u64)
			.map(|value| value as usize)
			.unwrap_or(fallback_index);
		let embedding = item.get("embedding").and_then(Value::as_array).ok_or_else(|| {
			Error::InvalidResponse {
				message: "Embedding item is missing an embedding array.".to_string(),
			}
		})?;
		let mut vector = Vec::with_capacity(embedding.len());

		for value in embedding {
			let number = value.as_f64().ok_or_else(|| Error::InvalidResponse {
				message: "Embedding values must be numeric.".to_string(),
			})?;

			vector.push(number as f32);
		}

		indexed.push((index, vector));
	}

	indexed.sort_by_key(|(index, _)| *index);

	Ok(indexed.into_iter().map(|(_, vector)| vector).collect())
}

fn validate_dimension(vector: &[f32], expected: u32) -> Result<()> {
	if vector.len() != expected as usize {
		return Err(Error::InvalidResponse {
			message: format!(
				"Embedding dimension {} does not match configured dimensions {expected}.",
				vector.len()
			),
		});
	}

	Ok(())
}
