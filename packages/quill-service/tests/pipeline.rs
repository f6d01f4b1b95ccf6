//! Indexing and retrieval pipeline tests against in-memory collaborators.

use std::{
	collections::{HashMap, HashSet},
	sync::{
		Arc, Mutex,
		atomic::{AtomicUsize, Ordering},
	},
};

use color_eyre::eyre::eyre;

use quill_index::{IndexHit, IndexPoint};
use quill_service::{
	BoxFuture, Collaborators, CompanionService, EmbeddingProvider, NoteSource, VectorIndex,
};
use quill_source::Block;

const CONFIG: &str = r#"
[service]
http_bind = "127.0.0.1:0"
log_level = "info"

[siyuan]
api_base = "http://127.0.0.1:6806"
page_size = 2

[index]
qdrant_url = "http://127.0.0.1:6334"
collection = "quill"
vector_dim = 4
embed_batch_size = 2

[providers.embedding]
api_base = "http://127.0.0.1:9000"
api_key = "embed-key"
path = "/v1/embeddings"
model = "test-embed"
dimensions = 4
timeout_ms = 5000

[upstream]
api_base = "http://127.0.0.1:9001"
api_key = "upstream-key"

[retrieval]
top_k = 5
max_context_tokens = 1400
"#;

fn block(id: &str, root_id: &str, hash: &str, content: &str, updated: &str) -> Block {
	Block {
		id: id.into(),
		parent_id: (id != root_id).then(|| root_id.to_string()),
		root_id: root_id.into(),
		hash: hash.into(),
		content: content.into(),
		markdown: content.into(),
		kind: if id == root_id { "d".into() } else { "p".into() },
		subtype: String::new(),
		updated: updated.into(),
	}
}

#[derive(Default)]
struct StubSource {
	blocks: Mutex<Vec<Block>>,
	documents: Mutex<HashMap<String, String>>,
}

impl StubSource {
	fn set_blocks(&self, blocks: Vec<Block>) {
		*self.blocks.lock().unwrap() = blocks;
	}

	fn set_document(&self, root_id: &str, markdown: &str) {
		self.documents.lock().unwrap().insert(root_id.into(), markdown.into());
	}
}

impl NoteSource for StubSource {
	fn blocks_updated_since<'a>(
		&'a self,
		watermark: Option<&'a str>,
		offset: u64,
		limit: u32,
	) -> BoxFuture<'a, color_eyre::Result<Vec<Block>>> {
		Box::pin(async move {
			// Forces the calling cycle to suspend mid-scan, as a network
			// round-trip would.
			tokio::task::yield_now().await;

			let mut matched: Vec<Block> = self
				.blocks
				.lock()
				.unwrap()
				.iter()
				.filter(|block| watermark.map(|wm| block.updated.as_str() > wm).unwrap_or(true))
				.cloned()
				.collect();

			matched.sort_by(|a, b| a.updated.cmp(&b.updated).then_with(|| a.id.cmp(&b.id)));

			Ok(matched.into_iter().skip(offset as usize).take(limit as usize).collect())
		})
	}

	fn document_markdown<'a>(
		&'a self,
		root_id: &'a str,
	) -> BoxFuture<'a, color_eyre::Result<String>> {
		Box::pin(async move {
			self.documents
				.lock()
				.unwrap()
				.get(root_id)
				.cloned()
				.ok_or_else(|| eyre!("no document {root_id}"))
		})
	}
}

#[derive(Default)]
struct StubEmbedding {
	vectors: Mutex<HashMap<String, Vec<f32>>>,
	calls: AtomicUsize,
	texts_embedded: AtomicUsize,
}

impl StubEmbedding {
	fn set_vector(&self, text: &str, vector: [f32; 4]) {
		self.vectors.lock().unwrap().insert(text.into(), vector.to_vec());
	}
}

impl EmbeddingProvider for StubEmbedding {
	fn embed<'a>(
		&'a self,
		texts: &'a [String],
	) -> BoxFuture<'a, color_eyre::Result<Vec<Vec<f32>>>> {
		Box::pin(async move {
			self.calls.fetch_add(1, Ordering::SeqCst);
			self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);

			let vectors = self.vectors.lock().unwrap();

			texts
				.iter()
				.map(|text| vectors.get(text).cloned().ok_or_else(|| eyre!("no vector for {text:?}")))
				.collect()
		})
	}
}

#[derive(Default)]
struct MemoryIndex {
	points: Mutex<HashMap<String, IndexPoint>>,
	upserts: AtomicUsize,
	fail_upserts_for: Mutex<HashSet<String>>,
}

impl MemoryIndex {
	fn fail_upserts_for(&self, block_id: &str) {
		self.fail_upserts_for.lock().unwrap().insert(block_id.into());
	}

	fn clear_failures(&self) {
		self.fail_upserts_for.lock().unwrap().clear();
	}
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
	let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
	let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
	let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

	if norm_a == 0. || norm_b == 0. { 0. } else { dot / (norm_a * norm_b) }
}

impl VectorIndex for MemoryIndex {
	fn ensure_ready<'a>(&'a self) -> BoxFuture<'a, color_eyre::Result<()>> {
		Box::pin(async move { Ok(()) })
	}

	fn latest_updated<'a>(&'a self) -> BoxFuture<'a, color_eyre::Result<Option<String>>> {
		Box::pin(async move {
			Ok(self.points.lock().unwrap().values().map(|point| point.updated.clone()).max())
		})
	}

	fn known_hashes<'a>(
		&'a self,
		block_ids: &'a [String],
	) -> BoxFuture<'a, color_eyre::Result<HashMap<String, String>>> {
		Box::pin(async move {
			let points = self.points.lock().unwrap();

			Ok(block_ids
				.iter()
				.filter_map(|id| points.get(id).map(|point| (id.clone(), point.hash.clone())))
				.collect())
		})
	}

	fn upsert_point<'a>(&'a self, point: IndexPoint) -> BoxFuture<'a, color_eyre::Result<()>> {
		Box::pin(async move {
			if self.fail_upserts_for.lock().unwrap().contains(&point.block_id) {
				return Err(eyre!("injected upsert failure for {}", point.block_id));
			}

			self.upserts.fetch_add(1, Ordering::SeqCst);
			self.points.lock().unwrap().insert(point.block_id.clone(), point);

			Ok(())
		})
	}

	fn search<'a>(
		&'a self,
		vector: Vec<f32>,
		top_k: u32,
	) -> BoxFuture<'a, color_eyre::Result<Vec<IndexHit>>> {
		Box::pin(async move {
			let points = self.points.lock().unwrap();
			let mut hits: Vec<IndexHit> = points
				.values()
				.map(|point| IndexHit {
					block_id: point.block_id.clone(),
					root_id: point.root_id.clone(),
					score: cosine(&vector, &point.vector),
				})
				.collect();

			hits.sort_by(|a, b| {
				b.score.total_cmp(&a.score).then_with(|| a.block_id.cmp(&b.block_id))
			});
			hits.truncate(top_k as usize);

			Ok(hits)
		})
	}
}

struct Harness {
	source: Arc<StubSource>,
	embedding: Arc<StubEmbedding>,
	index: Arc<MemoryIndex>,
	service: CompanionService,
}

fn harness() -> Harness {
	let cfg: quill_config::Config = toml::from_str(CONFIG).expect("Test config must parse.");
	let source = Arc::new(StubSource::default());
	let embedding = Arc::new(StubEmbedding::default());
	let index = Arc::new(MemoryIndex::default());
	let collaborators =
		Collaborators::new(source.clone(), embedding.clone(), index.clone());
	let service = CompanionService::new(cfg, collaborators).expect("Service must build.");

	Harness { source, embedding, index, service }
}

fn seed_three_notes(harness: &Harness) {
	harness.source.set_blocks(vec![
		block("b1", "r1", "h1", "Team lunch menu for next week.", "20240101100000"),
		block("b2", "r1", "h2", "Office plants need watering on Mondays.", "20240101110000"),
		block("b3", "r2", "h3", "Project deadline is Friday the 14th.", "20240101120000"),
	]);
	harness.embedding.set_vector("Team lunch menu for next week.", [0., 1., 0., 0.]);
	harness.embedding.set_vector("Office plants need watering on Mondays.", [0., 0.9, 0.1, 0.]);
	harness.embedding.set_vector("Project deadline is Friday the 14th.", [1., 0., 0., 0.]);
	harness.embedding.set_vector("when is the deadline", [0.95, 0.05, 0., 0.]);
	harness.source.set_document("r1", "# Office notes\n\nLunch menu and plant care.");
	harness.source.set_document("r2", "# Project plan\n\nProject deadline is Friday the 14th.");
}

#[tokio::test]
async fn repeated_cycles_are_idempotent() {
	let harness = harness();

	seed_three_notes(&harness);

	let first = harness
		.service
		.try_index_cycle(false)
		.await
		.expect("First cycle must succeed.")
		.expect("First cycle must not be locked out.");

	assert_eq!(first.embedded, 3);
	assert_eq!(first.failed, 0);

	let second = harness
		.service
		.try_index_cycle(false)
		.await
		.expect("Second cycle must succeed.")
		.expect("Second cycle must not be locked out.");

	assert_eq!(second.embedded, 0);
	assert_eq!(second.failed, 0);
	assert_eq!(harness.index.upserts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn hash_gate_reembeds_only_changed_blocks() {
	let harness = harness();

	seed_three_notes(&harness);
	harness.service.try_index_cycle(false).await.unwrap().unwrap();

	let embeds_before = harness.embedding.texts_embedded.load(Ordering::SeqCst);

	// Touch one block: new hash, newer timestamp.
	harness.embedding.set_vector("Project deadline moved to Monday.", [1., 0., 0.1, 0.]);
	harness.source.set_blocks(vec![
		block("b1", "r1", "h1", "Team lunch menu for next week.", "20240101100000"),
		block("b2", "r1", "h2", "Office plants need watering on Mondays.", "20240101110000"),
		block("b3", "r2", "h3-v2", "Project deadline moved to Monday.", "20240102090000"),
	]);

	let report = harness.service.try_index_cycle(false).await.unwrap().unwrap();

	assert_eq!(report.embedded, 1);
	assert_eq!(harness.embedding.texts_embedded.load(Ordering::SeqCst), embeds_before + 1);
}

#[tokio::test]
async fn forced_rebuild_rescans_without_reembedding_unchanged_blocks() {
	let harness = harness();

	seed_three_notes(&harness);
	harness.service.try_index_cycle(false).await.unwrap().unwrap();

	let embeds_before = harness.embedding.texts_embedded.load(Ordering::SeqCst);
	let report = harness.service.try_index_cycle(true).await.unwrap().unwrap();

	assert_eq!(report.embedded, 0);
	assert_eq!(report.skipped, 3);
	assert_eq!(harness.embedding.texts_embedded.load(Ordering::SeqCst), embeds_before);
}

#[tokio::test]
async fn failed_blocks_stay_eligible_for_the_next_cycle() {
	let harness = harness();

	seed_three_notes(&harness);
	// The newest block fails, so the watermark stays below its timestamp.
	harness.index.fail_upserts_for("b3");

	let first = harness.service.try_index_cycle(false).await.unwrap().unwrap();

	assert_eq!(first.embedded, 2);
	assert_eq!(first.failed, 1);

	harness.index.clear_failures();

	let second = harness.service.try_index_cycle(false).await.unwrap().unwrap();

	assert_eq!(second.embedded, 1);
	assert_eq!(harness.index.points.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn concurrent_cycles_run_single_flight() {
	let harness = harness();

	seed_three_notes(&harness);

	let (a, b) =
		tokio::join!(harness.service.try_index_cycle(false), harness.service.try_index_cycle(false));
	let reports = [a.unwrap(), b.unwrap()];

	assert_eq!(reports.iter().filter(|report| report.is_some()).count(), 1);
	assert_eq!(harness.index.upserts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn blank_blocks_are_skipped() {
	let harness = harness();

	harness.source.set_blocks(vec![
		block("b1", "r1", "h1", "   \n\t", "20240101100000"),
		block("b2", "r1", "h2", "Office plants need watering on Mondays.", "20240101110000"),
	]);
	harness.embedding.set_vector("Office plants need watering on Mondays.", [0., 1., 0., 0.]);

	let report = harness.service.try_index_cycle(false).await.unwrap().unwrap();

	assert_eq!(report.embedded, 1);
	assert_eq!(report.skipped, 1);
}

#[tokio::test]
async fn retrieval_dedupes_blocks_into_documents() {
	let harness = harness();

	seed_three_notes(&harness);
	harness.service.try_index_cycle(false).await.unwrap().unwrap();

	let context = harness
		.service
		.retrieve("when is the deadline")
		.await
		.expect("Retrieval must succeed.");
	let roots: Vec<&str> =
		context.documents.iter().map(|document| document.root_id.as_str()).collect();

	// b1 and b2 collapse into r1; the deadline note ranks first.
	assert_eq!(roots, vec!["r2", "r1"]);
	assert!(context.documents[0].markdown.contains("deadline is Friday"));
}

#[tokio::test]
async fn token_budget_admits_documents_until_the_first_overflow() {
	let harness = harness();

	// Three documents of 800, 500, and 900 estimated tokens against a budget
	// of 1400: the first two fit, the third stops assembly.
	harness.source.set_blocks(vec![
		block("b1", "r1", "h1", "alpha", "20240101100000"),
		block("b2", "r2", "h2", "beta", "20240101110000"),
		block("b3", "r3", "h3", "gamma", "20240101120000"),
	]);
	harness.embedding.set_vector("alpha", [1., 0., 0., 0.]);
	harness.embedding.set_vector("beta", [0.9, 0.1, 0., 0.]);
	harness.embedding.set_vector("gamma", [0.8, 0.2, 0., 0.]);
	harness.embedding.set_vector("query", [1., 0., 0., 0.]);
	harness.source.set_document("r1", &"a".repeat(3200));
	harness.source.set_document("r2", &"b".repeat(2000));
	harness.source.set_document("r3", &"c".repeat(3600));
	harness.service.try_index_cycle(false).await.unwrap().unwrap();

	let context = harness.service.retrieve("query").await.expect("Retrieval must succeed.");

	assert_eq!(context.documents.len(), 2);
	assert_eq!(context.documents[0].tokens, 800);
	assert_eq!(context.documents[1].tokens, 500);
	assert_eq!(context.total_tokens, 1300);
}

#[tokio::test]
async fn unreconstructable_documents_are_skipped() {
	let harness = harness();

	seed_three_notes(&harness);
	harness.service.try_index_cycle(false).await.unwrap().unwrap();
	harness.source.documents.lock().unwrap().remove("r2");

	let context = harness
		.service
		.retrieve("when is the deadline")
		.await
		.expect("Retrieval must succeed.");
	let roots: Vec<&str> =
		context.documents.iter().map(|document| document.root_id.as_str()).collect();

	assert_eq!(roots, vec!["r1"]);
}

#[tokio::test]
async fn augmentation_folds_context_into_the_last_user_message() {
	let harness = harness();

	seed_three_notes(&harness);
	harness.service.try_index_cycle(false).await.unwrap().unwrap();

	let body = serde_json::json!({
		"model": "gpt-4o-mini",
		"messages": [
			{ "role": "system", "content": "You are terse." },
			{ "role": "user", "content": "when is the deadline" },
		],
	});
	let augmented = harness
		.service
		.augment_request(&body)
		.await
		.expect("A body with a prompt must augment.");
	let content = augmented["messages"][1]["content"].as_str().unwrap();

	assert!(content.starts_with("Here are some documents that may help answer the question:"));
	assert!(content.contains("Project deadline is Friday the 14th."));
	assert!(content.ends_with("when is the deadline"));
	assert_eq!(augmented["messages"][0]["content"], "You are terse.");
	assert_eq!(augmented["model"], "gpt-4o-mini");
}

#[tokio::test]
async fn empty_index_degrades_to_the_original_body() {
	let harness = harness();

	harness.embedding.set_vector("when is the deadline", [1., 0., 0., 0.]);

	let body = serde_json::json!({
		"model": "gpt-4o-mini",
		"messages": [{ "role": "user", "content": "when is the deadline" }],
	});
	let augmented = harness
		.service
		.augment_request(&body)
		.await
		.expect("A body with a prompt must pass through.");

	assert_eq!(augmented, body);
}

#[tokio::test]
async fn bodies_without_a_prompt_are_not_forwarded() {
	let harness = harness();
	let body = serde_json::json!({ "model": "gpt-4o-mini" });

	assert!(harness.service.augment_request(&body).await.is_none());
}

#[tokio::test]
async fn content_part_bodies_degrade_to_the_original() {
	let harness = harness();
	let body = serde_json::json!({
		"model": "gpt-4o-mini",
		"messages": [{
			"role": "user",
			"content": [{ "type": "text", "text": "when is the deadline" }],
		}],
	});
	let augmented = harness
		.service
		.augment_request(&body)
		.await
		.expect("A chat body with a user message must pass through.");

	assert_eq!(augmented, body);
}
