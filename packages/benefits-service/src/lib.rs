pub mod access;
pub mod analytics;
pub mod chat;
pub mod documents;
pub mod router;

mod error;

pub use analytics::{
	AnalyticsSummary, AuditEntryView, AuditRecord, BenefitPlanView, EventCountView, ModelUsageView,
};
pub use chat::{
	ChatDone, ChatEvent, ChatMeta, ChatRequest, ChatResponse, ContextBlock, ConversationView,
	MessageView, PreparedChat, SourceRef, UsageReport,
};
pub use documents::{DocumentAction, DocumentView, RebuildReport, UploadRequest, UploadResponse};
pub use error::{Error, Result};
pub use router::ClassifyRequest;

use std::{
	future::Future,
	pin::Pin,
	sync::{Arc, Mutex},
};

use tokio::sync::mpsc;

use benefits_config::{ChatProviderConfig, Config, EmbeddingProviderConfig, LlmProviderConfig};
use benefits_domain::{pricing::ModelCatalog, pricing::UsageStats, router::RoutingTable};
use benefits_providers::{
	chat::{self as chat_api, ChatCompletion, ChatMessage, ChatStreamEvent},
	classifier, embedding,
};
use benefits_storage::{db::Db, qdrant::QdrantStore};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>>;
}

pub trait ChatProvider
where
	Self: Send + Sync,
{
	fn complete<'a>(
		&'a self,
		cfg: &'a ChatProviderConfig,
		model: &'a str,
		messages: &'a [ChatMessage],
		max_tokens: u32,
	) -> BoxFuture<'a, Result<ChatCompletion>>;

	/// Starts a streamed completion; errors before the first event are returned directly.
	fn stream<'a>(
		&'a self,
		cfg: &'a ChatProviderConfig,
		model: &'a str,
		messages: &'a [ChatMessage],
		max_tokens: u32,
	) -> BoxFuture<'a, Result<mpsc::Receiver<ChatStreamEvent>>>;
}

pub trait ClassifierProvider
where
	Self: Send + Sync,
{
	fn classify<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		query: &'a str,
	) -> BoxFuture<'a, Result<String>>;
}

#[derive(Clone)]
pub struct Providers {
	pub embedding: Arc<dyn EmbeddingProvider>,
	pub chat: Arc<dyn ChatProvider>,
	pub classifier: Arc<dyn ClassifierProvider>,
}
impl Providers {
	pub fn new(
		embedding: Arc<dyn EmbeddingProvider>,
		chat: Arc<dyn ChatProvider>,
		classifier: Arc<dyn ClassifierProvider>,
	) -> Self {
		Self { embedding, chat, classifier }
	}
}
impl Default for Providers {
	fn default() -> Self {
		let provider = Arc::new(DefaultProviders);

		Self { embedding: provider.clone(), chat: provider.clone(), classifier: provider }
	}
}

pub struct BenefitsService {
	pub cfg: Config,
	pub db: Db,
	pub qdrant: QdrantStore,
	pub providers: Providers,
	routing: RoutingTable,
	catalog: ModelCatalog,
	usage: Mutex<UsageStats>,
}
impl BenefitsService {
	pub fn new(cfg: Config, db: Db, qdrant: QdrantStore) -> Result<Self> {
		Self::with_providers(cfg, db, qdrant, Providers::default())
	}

	pub fn with_providers(
		cfg: Config,
		db: Db,
		qdrant: QdrantStore,
		providers: Providers,
	) -> Result<Self> {
		let routing = RoutingTable::from_config(&cfg.router)
			.map_err(|err| Error::InvalidRequest { message: err.to_string() })?;
		let catalog = ModelCatalog::from_config(&cfg.router.models);

		Ok(Self {
			cfg,
			db,
			qdrant,
			providers,
			routing,
			catalog,
			usage: Mutex::new(UsageStats::default()),
		})
	}
}

struct DefaultProviders;
impl EmbeddingProvider for DefaultProviders {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
		Box::pin(async move { Ok(embedding::embed(cfg, texts).await?) })
	}
}
impl ChatProvider for DefaultProviders {
	fn complete<'a>(
		&'a self,
		cfg: &'a ChatProviderConfig,
		model: &'a str,
		messages: &'a [ChatMessage],
		max_tokens: u32,
	) -> BoxFuture<'a, Result<ChatCompletion>> {
		Box::pin(async move { Ok(chat_api::complete(cfg, model, messages, max_tokens).await?) })
	}

	fn stream<'a>(
		&'a self,
		cfg: &'a ChatProviderConfig,
		model: &'a str,
		messages: &'a [ChatMessage],
		max_tokens: u32,
	) -> BoxFuture<'a, Result<mpsc::Receiver<ChatStreamEvent>>> {
		Box::pin(async move { Ok(chat_api::stream(cfg, model, messages, max_tokens).await?) })
	}
}
impl ClassifierProvider for DefaultProviders {
	fn classify<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		query: &'a str,
	) -> BoxFuture<'a, Result<String>> {
		Box::pin(async move { Ok(classifier::classify(cfg, query).await?) })
	}
}
