//! Query-time retrieval: nearest blocks, deduplicated into documents, trimmed
//! to the context token budget.

use std::collections::HashMap;

use quill_index::IndexHit;

use crate::{CompanionService, ServiceError, ServiceResult};

/// One reconstructed document that survived deduplication and the budget.
#[derive(Clone, Debug)]
pub struct ContextDocument {
	pub root_id: String,
	pub score: f32,
	pub markdown: String,
	pub tokens: usize,
}

#[derive(Clone, Debug, Default)]
pub struct RetrievedContext {
	pub documents: Vec<ContextDocument>,
	pub total_tokens: usize,
}

/// Collapses block hits into one candidate per document, keeping the best
/// score, ordered best first. Ties break on `root_id` so the same index state
/// always yields the same ranking.
pub fn rank_documents(hits: Vec<IndexHit>) -> Vec<(String, f32)> {
	let mut best: HashMap<String, f32> = HashMap::new();

	for hit in hits {
		let entry = best.entry(hit.root_id).or_insert(f32::MIN);

		if hit.score > *entry {
			*entry = hit.score;
		}
	}

	let mut ranked: Vec<(String, f32)> = best.into_iter().collect();

	ranked.sort_by(|(a_id, a_score), (b_id, b_score)| {
		b_score.total_cmp(a_score).then_with(|| a_id.cmp(b_id))
	});

	ranked
}

impl CompanionService {
	/// Retrieves the documents most relevant to `query`.
	///
	/// Documents are admitted best first until one would overflow
	/// `max_context_tokens`; assembly stops there. A document whose markdown
	/// cannot be reconstructed is skipped with a warning.
	pub async fn retrieve(&self, query: &str) -> ServiceResult<RetrievedContext> {
		let vectors = self
			.collaborators
			.embedding
			.embed(std::slice::from_ref(&query.to_string()))
			.await
			.map_err(|err| ServiceError::Embedding { message: err.to_string() })?;
		let Some(vector) = vectors.into_iter().next() else {
			return Err(ServiceError::Embedding {
				message: "The provider returned no vector for the query.".into(),
			});
		};
		let hits = self
			.collaborators
			.index
			.search(vector, self.cfg.retrieval.top_k)
			.await
			.map_err(|err| ServiceError::Index { message: err.to_string() })?;
		let budget = self.cfg.retrieval.max_context_tokens as usize;
		let mut context = RetrievedContext::default();

		for (root_id, score) in rank_documents(hits) {
			let markdown = match self.collaborators.source.document_markdown(&root_id).await {
				Ok(markdown) => markdown,
				Err(err) => {
					tracing::warn!(root_id, error = %err, "Skipping a document that failed to reconstruct.");

					continue;
				},
			};
			let tokens = self.budget().count(&markdown);

			if context.total_tokens + tokens > budget {
				break;
			}

			context.total_tokens += tokens;
			context.documents.push(ContextDocument { root_id, score, markdown, tokens });
		}

		Ok(context)
	}
}
