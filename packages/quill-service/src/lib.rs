pub mod augment;
pub mod budget;
pub mod indexer;
pub mod retriever;
pub mod scheduler;

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

pub use indexer::IndexReport;
pub use retriever::{ContextDocument, RetrievedContext};

use quill_index::{IndexHit, IndexPoint};
use quill_source::Block;

use crate::budget::TokenBudget;

pub type ServiceResult<T> = Result<T, ServiceError>;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Read-only view of the note store: the changed-block scan and whole-document
/// reconstruction. The service never writes to the store.
pub trait NoteSource
where
	Self: Send + Sync,
{
	fn blocks_updated_since<'a>(
		&'a self,
		watermark: Option<&'a str>,
		offset: u64,
		limit: u32,
	) -> BoxFuture<'a, color_eyre::Result<Vec<Block>>>;

	fn document_markdown<'a>(&'a self, root_id: &'a str)
	-> BoxFuture<'a, color_eyre::Result<String>>;
}

/// Text to fixed-dimension vector. Index-side and query-side embeddings must
/// come from the same implementation.
pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(&'a self, texts: &'a [String])
	-> BoxFuture<'a, color_eyre::Result<Vec<Vec<f32>>>>;
}

/// The similarity store. The indexer is its only writer; upserts are atomic
/// per point.
pub trait VectorIndex
where
	Self: Send + Sync,
{
	fn ensure_ready<'a>(&'a self) -> BoxFuture<'a, color_eyre::Result<()>>;

	fn latest_updated<'a>(&'a self) -> BoxFuture<'a, color_eyre::Result<Option<String>>>;

	fn known_hashes<'a>(
		&'a self,
		block_ids: &'a [String],
	) -> BoxFuture<'a, color_eyre::Result<HashMap<String, String>>>;

	fn upsert_point<'a>(&'a self, point: IndexPoint) -> BoxFuture<'a, color_eyre::Result<()>>;

	fn search<'a>(
		&'a self,
		vector: Vec<f32>,
		top_k: u32,
	) -> BoxFuture<'a, color_eyre::Result<Vec<IndexHit>>>;
}

#[derive(Clone)]
pub struct Collaborators {
	pub source: Arc<dyn NoteSource>,
	pub embedding: Arc<dyn EmbeddingProvider>,
	pub index: Arc<dyn VectorIndex>,
}

impl Collaborators {
	pub fn new(
		source: Arc<dyn NoteSource>,
		embedding: Arc<dyn EmbeddingProvider>,
		index: Arc<dyn VectorIndex>,
	) -> Self {
		Self { source, embedding, index }
	}

	/// Production wiring: SiYuan note store, HTTP embedding provider, Qdrant.
	pub fn connect(cfg: &quill_config::Config) -> ServiceResult<Self> {
		let source = quill_source::SiyuanClient::new(&cfg.siyuan)
			.map_err(|err| ServiceError::Source { message: err.to_string() })?;
		let embedding = quill_providers::EmbeddingClient::new(&cfg.providers.embedding)
			.map_err(|err| ServiceError::Embedding { message: err.to_string() })?;
		let index = quill_index::QdrantIndex::new(&cfg.index)
			.map_err(|err| ServiceError::Index { message: err.to_string() })?;

		Ok(Self::new(Arc::new(source), Arc::new(embedding), Arc::new(index)))
	}
}

pub struct CompanionService {
	pub cfg: quill_config::Config,
	pub collaborators: Collaborators,
	budget: TokenBudget,
	indexing: tokio::sync::Mutex<()>,
}

impl CompanionService {
	pub fn new(cfg: quill_config::Config, collaborators: Collaborators) -> ServiceResult<Self> {
		let budget = TokenBudget::load(cfg.retrieval.tokenizer_repo.as_deref())
			.map_err(|err| ServiceError::Tokenizer { message: err.to_string() })?;

		Ok(Self { cfg, collaborators, budget, indexing: tokio::sync::Mutex::new(()) })
	}

	pub(crate) fn budget(&self) -> &TokenBudget {
		&self.budget
	}
}

#[derive(Debug)]
pub enum ServiceError {
	Source { message: String },
	Embedding { message: String },
	Index { message: String },
	Tokenizer { message: String },
}

impl std::fmt::Display for ServiceError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Source { message } => write!(f, "Note store error: {message}"),
			Self::Embedding { message } => write!(f, "Embedding provider error: {message}"),
			Self::Index { message } => write!(f, "Vector index error: {message}"),
			Self::Tokenizer { message } => write!(f, "Tokenizer error: {message}"),
		}
	}
}

impl std::error::Error for ServiceError {}

impl NoteSource for quill_source::SiyuanClient {
	fn blocks_updated_since<'a>(
		&'a self,
		watermark: Option<&'a str>,
		offset: u64,
		limit: u32,
	) -> BoxFuture<'a, color_eyre::Result<Vec<Block>>> {
		Box::pin(async move { Ok(Self::blocks_updated_since(self, watermark, offset, limit).await?) })
	}

	fn document_markdown<'a>(
		&'a self,
		root_id: &'a str,
	) -> BoxFuture<'a, color_eyre::Result<String>> {
		Box::pin(async move { Ok(Self::document_markdown(self, root_id).await?) })
	}
}

impl EmbeddingProvider for quill_providers::EmbeddingClient {
	fn embed<'a>(
		&'a self,
		texts: &'a [String],
	) -> BoxFuture<'a, color_eyre::Result<Vec<Vec<f32>>>> {
		Box::pin(async move { Ok(Self::embed(self, texts).await?) })
	}
}

impl VectorIndex for quill_index::QdrantIndex {
	fn ensure_ready<'a>(&'a self) -> BoxFuture<'a, color_eyre::Result<()>> {
		Box::pin(async move { Ok(self.ensure_collection().await?) })
	}

	fn latest_updated<'a>(&'a self) -> BoxFuture<'a, color_eyre::Result<Option<String>>> {
		Box::pin(async move { Ok(Self::latest_updated(self).await?) })
	}

	fn known_hashes<'a>(
		&'a self,
		block_ids: &'a [String],
	) -> BoxFuture<'a, color_eyre::Result<HashMap<String, String>>> {
		Box::pin(async move { Ok(Self::known_hashes(self, block_ids).await?) })
	}

	fn upsert_point<'a>(&'a self, point: IndexPoint) -> BoxFuture<'a, color_eyre::Result<()>> {
		Box::pin(async move { Ok(Self::upsert_point(self, point).await?) })
	}

	fn search<'a>(
		&'a self,
		vector: Vec<f32>,
		top_k: u32,
	) -> BoxFuture<'a, color_eyre::Result<Vec<IndexHit>>> {
		Box::pin(async move { Ok(Self::search(self, vector, top_k).await?) })
	}
}
