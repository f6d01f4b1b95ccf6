use std::collections::HashMap;

use qdrant_client::{
	Qdrant,
	client::Payload,
	qdrant::{
		CreateCollectionBuilder, Distance, GetPointsBuilder, PayloadIncludeSelector, PointId,
		PointStruct, Query, QueryPointsBuilder, ScrollPointsBuilder, UpsertPointsBuilder,
		VectorParamsBuilder,
	},
};

use crate::{
	Result,
	point::{
		self, IndexHit, IndexPoint, PAYLOAD_BLOCK_ID, PAYLOAD_HASH, PAYLOAD_ROOT_ID,
		PAYLOAD_UPDATED,
	},
};

const SCROLL_PAGE: u32 = 1_024;

pub struct QdrantIndex {
	pub client: Qdrant,
	pub collection: String,
	pub vector_dim: u32,
}

impl QdrantIndex {
	pub fn new(cfg: &quill_config::Index) -> Result<Self> {
		let client = Qdrant::from_url(&cfg.qdrant_url).build()?;

		Ok(Self { client, collection: cfg.collection.clone(), vector_dim: cfg.vector_dim })
	}

	/// Creates the collection (cosine distance) when it does not exist yet.
	pub async fn ensure_collection(&self) -> Result<()> {
		if self.client.collection_exists(&self.collection).await? {
			return Ok(());
		}

		let builder = CreateCollectionBuilder::new(self.collection.clone())
			.vectors_config(VectorParamsBuilder::new(self.vector_dim as u64, Distance::Cosine));

		self.client.create_collection(builder).await?;

		tracing::info!(collection = %self.collection, "Created vector collection.");

		Ok(())
	}

	/// Atomic per-point upsert: vector and payload land together or not at all.
	pub async fn upsert_point(&self, point: IndexPoint) -> Result<()> {
		let id = point::point_uuid(&point.block_id).to_string();
		let payload = Payload::from(point::encode_payload(&point));
		let structured = PointStruct::new(id, point.vector.clone(), payload);
		let upsert = UpsertPointsBuilder::new(self.collection.clone(), vec![structured]).wait(true);

		self.client.upsert_points(upsert).await?;

		Ok(())
	}

	/// Payload hashes of the already-indexed points among `block_ids`. Blocks
	/// absent from the result have never been indexed (or carry no hash).
	pub async fn known_hashes(&self, block_ids: &[String]) -> Result<HashMap<String, String>> {
		if block_ids.is_empty() {
			return Ok(HashMap::new());
		}

		let ids: Vec<PointId> = block_ids
			.iter()
			.map(|block_id| PointId::from(point::point_uuid(block_id).to_string()))
			.collect();
		let request = GetPointsBuilder::new(self.collection.clone(), ids).with_payload(true);
		let response = self.client.get_points(request).await?;
		let mut hashes = HashMap::new();

		for retrieved in response.result {
			let Some(block_id) = point::payload_str(&retrieved.payload, PAYLOAD_BLOCK_ID) else {
				continue;
			};
			let Some(hash) = point::payload_str(&retrieved.payload, PAYLOAD_HASH) else {
				continue;
			};

			hashes.insert(block_id.to_string(), hash.to_string());
		}

		Ok(hashes)
	}

	pub async fn search(&self, vector: Vec<f32>, top_k: u32) -> Result<Vec<IndexHit>> {
		let request = QueryPointsBuilder::new(self.collection.clone())
			.query(Query::new_nearest(vector))
			.limit(top_k as u64)
			.with_payload(true);
		let response = self.client.query(request).await?;
		let mut hits = Vec::with_capacity(response.result.len());

		for scored in response.result {
			let Some(block_id) = point::payload_str(&scored.payload, PAYLOAD_BLOCK_ID) else {
				tracing::warn!("Skipping a search hit without a block_id payload.");

				continue;
			};
			let Some(root_id) = point::payload_str(&scored.payload, PAYLOAD_ROOT_ID) else {
				tracing::warn!(block_id, "Skipping a search hit without a root_id payload.");

				continue;
			};

			hits.push(IndexHit {
				block_id: block_id.to_string(),
				root_id: root_id.to_string(),
				score: scored.score,
			});
		}

		Ok(hits)
	}

	/// The watermark: the greatest `updated` payload value over every indexed
	/// point, or `None` for an empty collection. Derived on demand, never
	/// persisted separately.
	pub async fn latest_updated(&self) -> Result<Option<String>> {
		let mut latest: Option<String> = None;
		let mut offset: Option<PointId> = None;

		loop {
			let mut request = ScrollPointsBuilder::new(self.collection.clone())
				.limit(SCROLL_PAGE)
				.with_payload(updated_payload_selector());

			if let Some(cursor) = offset.take() {
				request = request.offset(cursor);
			}

			let response = self.client.scroll(request).await?;

			for retrieved in &response.result {
				let Some(updated) = point::payload_str(&retrieved.payload, PAYLOAD_UPDATED) else {
					continue;
				};

				if latest.as_deref().map(|current| updated > current).unwrap_or(true) {
					latest = Some(updated.to_string());
				}
			}

			match response.next_page_offset {
				Some(cursor) => offset = Some(cursor),
				None => break,
			}
		}

		Ok(latest)
	}
}

/// The scroll only needs `updated`; everything else stays server-side.
fn updated_payload_selector() -> PayloadIncludeSelector {
	PayloadIncludeSelector { fields: vec![PAYLOAD_UPDATED.to_string()] }
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn watermark_scroll_selects_only_the_updated_field() {
		assert_eq!(updated_payload_selector().fields, vec![PAYLOAD_UPDATED.to_string()]);
	}
}
