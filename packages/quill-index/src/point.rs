use std::collections::HashMap;

use qdrant_client::qdrant::{Value, value::Kind};
use uuid::Uuid;

pub const PAYLOAD_BLOCK_ID: &str = "block_id";
pub const PAYLOAD_ROOT_ID: &str = "root_id";
pub const PAYLOAD_HASH: &str = "hash";
pub const PAYLOAD_UPDATED: &str = "updated";

/// One vector-index entry for an indexed content block. The payload always
/// carries the hash of the exact content the vector was computed from.
#[derive(Clone, Debug)]
pub struct IndexPoint {
	pub block_id: String,
	pub root_id: String,
	pub hash: String,
	pub updated: String,
	pub vector: Vec<f32>,
}

/// Search result: the block that matched and the document that owns it.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexHit {
	pub block_id: String,
	pub root_id: String,
	pub score: f32,
}

/// Stable point id for a block. Re-upserting the same block always lands on
/// the same point.
pub fn point_uuid(block_id: &str) -> Uuid {
	Uuid::new_v5(&Uuid::NAMESPACE_OID, block_id.as_bytes())
}

pub fn encode_payload(point: &IndexPoint) -> HashMap<String, Value> {
	let mut payload = HashMap::new();

	payload.insert(PAYLOAD_BLOCK_ID.to_string(), Value::from(point.block_id.clone()));
	payload.insert(PAYLOAD_ROOT_ID.to_string(), Value::from(point.root_id.clone()));
	payload.insert(PAYLOAD_HASH.to_string(), Value::from(point.hash.clone()));
	payload.insert(PAYLOAD_UPDATED.to_string(), Value::from(point.updated.clone()));

	payload
}

pub fn payload_str<'a>(payload: &'a HashMap<String, Value>, key: &str) -> Option<&'a str> {
	match payload.get(key).and_then(|value| value.kind.as_ref()) {
		Some(Kind::StringValue(text)) => Some(text.as_str()),
		_ => None,
	}
}
