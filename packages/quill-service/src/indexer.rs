//! The incremental indexing cycle.
//!
//! Each cycle derives the watermark from the index itself, scans the note
//! store for blocks updated past it, and upserts only the blocks whose
//! content hash actually changed. Re-running a cycle against an unchanged
//! store is a no-op.

use quill_index::IndexPoint;
use quill_source::Block;

use crate::{CompanionService, ServiceError, ServiceResult};

/// What one indexing cycle did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IndexReport {
	/// Blocks embedded and upserted.
	pub embedded: usize,
	/// Blocks skipped as blank or hash-unchanged.
	pub skipped: usize,
	/// Blocks that failed to embed or upsert; they stay below the watermark
	/// gate and are retried on later cycles.
	pub failed: usize,
}

impl IndexReport {
	fn absorb(&mut self, other: Self) {
		self.embedded += other.embedded;
		self.skipped += other.skipped;
		self.failed += other.failed;
	}
}

impl CompanionService {
	/// Runs one indexing cycle unless one is already running.
	///
	/// `Ok(None)` means another cycle held the lock; the caller should not
	/// treat that as failure. `force_full` ignores the watermark and rescans
	/// the whole store; the hash gate still suppresses redundant embeddings.
	pub async fn try_index_cycle(&self, force_full: bool) -> ServiceResult<Option<IndexReport>> {
		let Ok(_guard) = self.indexing.try_lock() else {
			return Ok(None);
		};

		Ok(Some(self.index_cycle(force_full).await?))
	}

	async fn index_cycle(&self, force_full: bool) -> ServiceResult<IndexReport> {
		let watermark = if force_full {
			None
		} else {
			self.collaborators
				.index
				.latest_updated()
				.await
				.map_err(|err| ServiceError::Index { message: err.to_string() })?
		};

		tracing::info!(watermark = watermark.as_deref().unwrap_or("<none>"), force_full, "Indexing cycle started.");

		let page_size = self.cfg.siyuan.page_size;
		let mut report = IndexReport::default();
		let mut offset = 0;

		loop {
			let blocks = self
				.collaborators
				.source
				.blocks_updated_since(watermark.as_deref(), offset, page_size)
				.await
				.map_err(|err| ServiceError::Source { message: err.to_string() })?;
			let fetched = blocks.len();

			report.absorb(self.index_page(blocks).await);

			if fetched < page_size as usize {
				break;
			}

			offset += fetched as u64;
		}

		tracing::info!(
			embedded = report.embedded,
			skipped = report.skipped,
			failed = report.failed,
			"Indexing cycle finished.",
		);

		Ok(report)
	}

	async fn index_page(&self, blocks: Vec<Block>) -> IndexReport {
		let mut report = IndexReport::default();
		let mut candidates = Vec::with_capacity(blocks.len());

		for block in blocks {
			if block.content.trim().is_empty() {
				report.skipped += 1;
			} else {
				candidates.push(block);
			}
		}

		if candidates.is_empty() {
			return report;
		}

		let ids: Vec<String> = candidates.iter().map(|block| block.id.clone()).collect();
		let known = match self.collaborators.index.known_hashes(&ids).await {
			Ok(known) => known,
			Err(err) => {
				tracing::warn!(error = %err, "Failed to fetch known hashes; deferring the page to the next cycle.");

				report.failed += candidates.len();

				return report;
			},
		};
		let mut pending = Vec::with_capacity(candidates.len());

		for block in candidates {
			if known.get(&block.id).map(|hash| *hash == block.hash).unwrap_or(false) {
				report.skipped += 1;
			} else {
				pending.push(block);
			}
		}

		let batch_size = (self.cfg.index.embed_batch_size as usize).max(1);

		for batch in pending.chunks(batch_size) {
			report.absorb(self.index_batch(batch).await);
		}

		report
	}

	async fn index_batch(&self, batch: &[Block]) -> IndexReport {
		let mut report = IndexReport::default();
		let texts: Vec<String> = batch.iter().map(|block| block.content.clone()).collect();
		let vectors = match self.collaborators.embedding.embed(&texts).await {
			Ok(vectors) => vectors,
			Err(err) => {
				tracing::warn!(blocks = batch.len(), error = %err, "Embedding a batch failed; its blocks will be retried.");

				report.failed += batch.len();

				return report;
			},
		};

		for (block, vector) in batch.iter().zip(vectors) {
			let point = IndexPoint {
				block_id: block.id.clone(),
				root_id: block.root_id.clone(),
				hash: block.hash.clone(),
				updated: block.updated.clone(),
				vector,
			};

			match self.collaborators.index.upsert_point(point).await {
				Ok(()) => report.embedded += 1,
				Err(err) => {
					tracing::warn!(block_id = block.id, error = %err, "Upserting a block failed; it will be retried.");

					report.failed += 1;
				},
			}
		}

		report
	}
}
