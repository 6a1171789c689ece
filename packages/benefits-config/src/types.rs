use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	pub router: Router,
	pub retrieval: Retrieval,
	pub chunking: Chunking,
	pub ingestion: Ingestion,
	pub chat: Chat,
	pub security: Security,
}

#[derive(Debug, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub admin_bind: String,
	pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
	pub qdrant: Qdrant,
}

#[derive(Debug, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Debug, Deserialize)]
pub struct Qdrant {
	pub url: String,
	pub collection: String,
	pub vector_dim: u32,
}

#[derive(Debug, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
	pub chat: ChatProviderConfig,
	pub classifier: LlmProviderConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

/// Chat completions endpoint. The model is picked per request by the router.
#[derive(Clone, Debug, Deserialize)]
pub struct ChatProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub temperature: f32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LlmProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub temperature: f32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct Router {
	/// One of "heuristic" or "llm_assisted".
	pub mode: String,
	#[serde(default = "default_llm_assist_below_confidence")]
	pub llm_assist_below_confidence: f32,
	pub default_model: String,
	pub models: Vec<RouterModel>,
	#[serde(default)]
	pub rules: Vec<RouterRule>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RouterModel {
	pub id: String,
	pub input_cost_per_1k: f64,
	pub output_cost_per_1k: f64,
	pub max_output_tokens: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RouterRule {
	pub complexity: String,
	pub category: Option<String>,
	pub model: String,
}

#[derive(Debug, Deserialize)]
pub struct Retrieval {
	pub top_k: u32,
	pub min_score: f32,
	pub max_context_chars: u32,
}

#[derive(Debug, Deserialize)]
pub struct Chunking {
	pub chunk_chars: u32,
	pub overlap_chars: u32,
}

#[derive(Debug, Deserialize)]
pub struct Ingestion {
	pub max_document_bytes: u64,
	pub embed_batch_size: u32,
	pub max_attempts: u32,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
	pub history_messages: u32,
	pub max_message_chars: u32,
	#[serde(default = "default_assistant_name")]
	pub assistant_name: String,
}

#[derive(Debug, Deserialize)]
pub struct Security {
	pub bind_localhost_only: bool,
	pub api_auth_token: Option<String>,
	pub admin_auth_token: Option<String>,
}

fn default_llm_assist_below_confidence() -> f32 {
	0.6
}

fn default_assistant_name() -> String {
	"Benefits Assistant".to_string()
}
