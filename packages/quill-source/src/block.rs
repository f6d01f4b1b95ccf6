use serde::Deserialize;

/// One row of SiYuan's `blocks` table. `updated` is the store's sortable
/// `yyyyMMddHHmmss` timestamp; lexicographic order equals chronological order.
#[derive(Clone, Debug, Deserialize)]
pub struct Block {
	pub id: String,
	#[serde(default, deserialize_with = "empty_as_none")]
	pub parent_id: Option<String>,
	pub root_id: String,
	pub hash: String,
	#[serde(default)]
	pub content: String,
	#[serde(default)]
	pub markdown: String,
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default)]
	pub subtype: String,
	pub updated: String,
}

impl Block {
	/// Document-level blocks are their own root.
	pub fn is_document(&self) -> bool {
		self.id == self.root_id
	}
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
	D: serde::Deserializer<'de>,
{
	let raw = Option::<String>::deserialize(deserializer)?;

	Ok(raw.filter(|value| !value.is_empty()))
}

/// True when `value` is a well-formed `yyyyMMddHHmmss` watermark. Used to keep
/// watermark strings safe for SQL interpolation.
pub fn is_watermark(value: &str) -> bool {
	value.len() == 14 && value.bytes().all(|byte| byte.is_ascii_digit())
}
