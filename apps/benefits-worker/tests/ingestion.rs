use std::{
	future::IntoFuture,
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	time::{Duration, Instant},
};

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing};
use serde_json::{Map, Value};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use tokio::{
	net::TcpListener,
	sync::{mpsc, oneshot, oneshot::Sender},
};
use uuid::Uuid;

use benefits_chunking::ChunkingConfig;
use benefits_config::{
	Chat, ChatProviderConfig, Chunking, Config, EmbeddingProviderConfig, Ingestion,
	LlmProviderConfig, Postgres, Providers as ProviderConfigs, Qdrant, Retrieval,
	Router as RouterConfig, RouterModel, Security, Service, Storage,
};
use benefits_providers::chat::{ChatCompletion, ChatMessage, ChatStreamEvent};
use benefits_service::{
	BenefitsService, BoxFuture, ChatProvider, ChatRequest, ClassifierProvider, EmbeddingProvider,
	Error, Providers, Result, UploadRequest,
};
use benefits_storage::{db::Db, qdrant::QdrantStore, tenancy, tenancy::NewUser};
use benefits_testkit::TestDatabase;
use benefits_worker::worker::{self, WorkerState};

const VECTOR_DIM: u32 = 4;
const POLICY_TEXT: &str = "Dental cleanings are covered twice per plan year at no cost.\n\n\
Orthodontia is covered at fifty percent after the deductible.";

#[derive(FromRow)]
struct OutboxRow {
	status: String,
	attempts: i32,
	last_error: Option<String>,
}

struct ConstantEmbedding;
impl EmbeddingProvider for ConstantEmbedding {
	fn embed<'a>(
		&'a self,
		_cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
		Box::pin(async move { Ok(vec![vec![0.1; VECTOR_DIM as usize]; texts.len()]) })
	}
}

struct EchoChat {
	prompts: Arc<AtomicUsize>,
}
impl ChatProvider for EchoChat {
	fn complete<'a>(
		&'a self,
		_cfg: &'a ChatProviderConfig,
		_model: &'a str,
		messages: &'a [ChatMessage],
		_max_tokens: u32,
	) -> BoxFuture<'a, Result<ChatCompletion>> {
		let grounded = messages
			.first()
			.is_some_and(|message| message.content.contains("Dental cleanings are covered"));

		if grounded {
			self.prompts.fetch_add(1, Ordering::SeqCst);
		}

		let content = "Cleanings are covered twice a year [1].".to_string();

		Box::pin(async move { Ok(ChatCompletion { content, usage: None }) })
	}

	fn stream<'a>(
		&'a self,
		_cfg: &'a ChatProviderConfig,
		_model: &'a str,
		_messages: &'a [ChatMessage],
		_max_tokens: u32,
	) -> BoxFuture<'a, Result<mpsc::Receiver<ChatStreamEvent>>> {
		Box::pin(async move {
			let (_tx, rx) = mpsc::channel(1);

			Ok(rx)
		})
	}
}

struct NoClassifier;
impl ClassifierProvider for NoClassifier {
	fn classify<'a>(
		&'a self,
		_cfg: &'a LlmProviderConfig,
		_query: &'a str,
	) -> BoxFuture<'a, Result<String>> {
		Box::pin(async move {
			Err(Error::Provider { message: "classifier disabled in tests".to_string() })
		})
	}
}

fn embedding_config(api_base: String) -> EmbeddingProviderConfig {
	EmbeddingProviderConfig {
		provider_id: "test".to_string(),
		api_base,
		api_key: "test-key".to_string(),
		path: "/embeddings".to_string(),
		model: "test".to_string(),
		dimensions: VECTOR_DIM,
		timeout_ms: 1_000,
		default_headers: Map::new(),
	}
}

fn test_config(dsn: String, qdrant_url: String, collection: String, api_base: String) -> Config {
	Config {
		service: Service {
			http_bind: "127.0.0.1:0".to_string(),
			admin_bind: "127.0.0.1:0".to_string(),
			log_level: "info".to_string(),
		},
		storage: Storage {
			postgres: Postgres { dsn, pool_max_conns: 4 },
			qdrant: Qdrant { url: qdrant_url, collection, vector_dim: VECTOR_DIM },
		},
		providers: ProviderConfigs {
			embedding: embedding_config(api_base),
			chat: ChatProviderConfig {
				provider_id: "test".to_string(),
				api_base: "http://127.0.0.1:1".to_string(),
				api_key: "test-key".to_string(),
				path: "/chat/completions".to_string(),
				temperature: 0.2,
				timeout_ms: 1_000,
				default_headers: Map::new(),
			},
			classifier: LlmProviderConfig {
				provider_id: "test".to_string(),
				api_base: "http://127.0.0.1:1".to_string(),
				api_key: "test-key".to_string(),
				path: "/chat/completions".to_string(),
				model: "small".to_string(),
				temperature: 0.0,
				timeout_ms: 1_000,
				default_headers: Map::new(),
			},
		},
		router: RouterConfig {
			mode: "heuristic".to_string(),
			llm_assist_below_confidence: 0.6,
			default_model: "small".to_string(),
			models: vec![RouterModel {
				id: "small".to_string(),
				input_cost_per_1k: 0.00015,
				output_cost_per_1k: 0.0006,
				max_output_tokens: 512,
			}],
			rules: Vec::new(),
		},
		retrieval: Retrieval { top_k: 4, min_score: 0.1, max_context_chars: 4_000 },
		chunking: Chunking { chunk_chars: 80, overlap_chars: 10 },
		ingestion: Ingestion { max_document_bytes: 1_000_000, embed_batch_size: 2, max_attempts: 3 },
		chat: Chat {
			history_messages: 6,
			max_message_chars: 500,
			assistant_name: "Benefits Assistant".to_string(),
		},
		security: Security { bind_localhost_only: true, api_auth_token: None, admin_auth_token: None },
	}
}

/// Serves OpenAI-style embeddings; the first `failures` calls answer 500.
async fn start_embed_server(calls: Arc<AtomicUsize>, failures: usize) -> (String, Sender<()>) {
	let app = Router::new()
		.route("/embeddings", routing::post(embed_handler))
		.with_state((calls, failures));
	let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind embed server.");
	let addr = listener.local_addr().expect("Failed to read embed server address.");
	let (tx, rx) = oneshot::channel();
	let server = axum::serve(listener, app).with_graceful_shutdown(async move {
		let _ = rx.await;
	});

	tokio::spawn(async move {
		let _ = server.into_future().await;
	});

	(format!("http://{addr}"), tx)
}

async fn embed_handler(
	State((calls, failures)): State<(Arc<AtomicUsize>, usize)>,
	Json(payload): Json<Value>,
) -> impl IntoResponse {
	if calls.fetch_add(1, Ordering::SeqCst) < failures {
		return StatusCode::INTERNAL_SERVER_ERROR.into_response();
	}

	let inputs =
		payload.get("input").and_then(|value| value.as_array()).cloned().unwrap_or_default();
	let data = inputs
		.iter()
		.enumerate()
		.map(|(index, _)| serde_json::json!({ "index": index, "embedding": [0.1, 0.1, 0.1, 0.1] }))
		.collect::<Vec<_>>();

	(StatusCode::OK, Json(serde_json::json!({ "data": data }))).into_response()
}

async fn outbox_row(pool: &PgPool, document_id: Uuid) -> Option<OutboxRow> {
	sqlx::query_as::<_, OutboxRow>(
		"\
SELECT status, attempts, last_error
FROM ingest_outbox
WHERE document_id = $1
ORDER BY created_at DESC
LIMIT 1",
	)
	.bind(document_id)
	.fetch_optional(pool)
	.await
	.ok()
	.flatten()
}

async fn document_status(pool: &PgPool, document_id: Uuid) -> String {
	sqlx::query_scalar("SELECT status FROM documents WHERE document_id = $1")
		.bind(document_id)
		.fetch_one(pool)
		.await
		.expect("Failed to read document status.")
}

async fn wait_for_document_status(
	pool: &PgPool,
	document_id: Uuid,
	status: &str,
	timeout: Duration,
) -> bool {
	let deadline = Instant::now() + timeout;

	loop {
		if document_status(pool, document_id).await == status {
			return true;
		}
		if Instant::now() >= deadline {
			return false;
		}

		tokio::time::sleep(Duration::from_millis(200)).await;
	}
}

struct Fixture {
	test_db: TestDatabase,
	service: BenefitsService,
	worker_state: WorkerState,
	admin_id: Uuid,
	employee_id: Uuid,
	embed_calls: Arc<AtomicUsize>,
	grounded_prompts: Arc<AtomicUsize>,
	shutdown: Sender<()>,
}

async fn fixture(embed_failures: usize) -> Option<Fixture> {
	let Some(env) = benefits_testkit::test_env() else {
		eprintln!("Skipping ingestion test; set BENEFITS_PG_DSN and BENEFITS_QDRANT_URL to run it.");

		return None;
	};
	let test_db = TestDatabase::new(&env.dsn).await.expect("Failed to create test database.");
	let embed_calls = Arc::new(AtomicUsize::new(0));
	let (api_base, shutdown) = start_embed_server(embed_calls.clone(), embed_failures).await;
	let collection = test_db.collection_name("benefits_ingestion");
	let cfg = test_config(test_db.dsn().to_string(), env.qdrant_url, collection, api_base.clone());
	let db = Db::connect(&cfg.storage.postgres).await.expect("Failed to connect to Postgres.");

	db.ensure_schema().await.expect("Failed to ensure schema.");

	let qdrant = QdrantStore::new(&cfg.storage.qdrant).expect("Failed to build Qdrant store.");

	qdrant.ensure_collection().await.expect("Failed to ensure Qdrant collection.");

	let company_id = Uuid::new_v4();
	let admin_id = Uuid::new_v4();
	let employee_id = Uuid::new_v4();

	tenancy::insert_company(&db.pool, company_id, "Acme", "acme")
		.await
		.expect("Failed to insert company.");

	for (user_id, role) in [(admin_id, "hr_admin"), (employee_id, "employee")] {
		tenancy::insert_user(
			&db.pool,
			&NewUser {
				user_id,
				company_id: Some(company_id),
				email: &format!("{role}@acme.test"),
				display_name: role,
				role,
			},
		)
		.await
		.expect("Failed to insert user.");
	}

	let worker_state = WorkerState {
		db: Db::connect(&cfg.storage.postgres).await.expect("Failed to connect worker DB."),
		qdrant: QdrantStore::new(&cfg.storage.qdrant).expect("Failed to build Qdrant store."),
		embedding: embedding_config(api_base),
		chunking: ChunkingConfig {
			chunk_chars: cfg.chunking.chunk_chars,
			overlap_chars: cfg.chunking.overlap_chars,
		},
		embed_batch_size: 2,
		max_attempts: 3,
	};
	let grounded_prompts = Arc::new(AtomicUsize::new(0));
	let providers = Providers::new(
		Arc::new(ConstantEmbedding),
		Arc::new(EchoChat { prompts: grounded_prompts.clone() }),
		Arc::new(NoClassifier),
	);
	let service = BenefitsService::with_providers(cfg, db, qdrant, providers)
		.expect("Failed to build service.");

	Some(Fixture {
		test_db,
		service,
		worker_state,
		admin_id,
		employee_id,
		embed_calls,
		grounded_prompts,
		shutdown,
	})
}

async fn upload(fx: &Fixture, file_name: &str, content_type: &str, bytes: &[u8]) -> Uuid {
	let admin = fx.service.resolve_user(fx.admin_id).await.expect("Failed to resolve admin.");
	let response = fx
		.service
		.upload_document(
			&admin,
			UploadRequest {
				company_id: None,
				title: Some("Dental Policy".to_string()),
				file_name: file_name.to_string(),
				content_type: Some(content_type.to_string()),
				bytes: bytes.to_vec(),
			},
		)
		.await
		.expect("Failed to upload document.");

	assert!(!response.duplicate);

	response.document.document_id
}

async fn upload_policy(fx: &Fixture) -> Uuid {
	upload(fx, "dental.md", "text/markdown", POLICY_TEXT.as_bytes()).await
}

async fn document_last_error(pool: &PgPool, document_id: Uuid) -> Option<String> {
	sqlx::query_scalar("SELECT last_error FROM documents WHERE document_id = $1")
		.bind(document_id)
		.fetch_one(pool)
		.await
		.expect("Failed to read document error.")
}

async fn expire_backoff(pool: &PgPool, document_id: Uuid) {
	sqlx::query("UPDATE ingest_outbox SET available_at = $1 WHERE document_id = $2")
		.bind(OffsetDateTime::now_utc())
		.bind(document_id)
		.execute(pool)
		.await
		.expect("Failed to expire backoff.");
}

#[tokio::test]
#[ignore = "Requires external Postgres and Qdrant. Set BENEFITS_PG_DSN and BENEFITS_QDRANT_URL to run."]
async fn failed_embedding_is_retried_until_indexed() {
	let Some(fx) = fixture(1).await else {
		return;
	};
	let document_id = upload_policy(&fx).await;
	let pool = fx.service.db.pool.clone();

	assert!(worker::process_outbox_once(&fx.worker_state).await.expect("First pass failed."));

	let failed = outbox_row(&pool, document_id).await.expect("Expected an outbox row.");

	assert_eq!(failed.status, "FAILED");
	assert_eq!(failed.attempts, 1);
	assert!(failed.last_error.is_some_and(|text| !text.contains("test-key")));
	assert_eq!(document_status(&pool, document_id).await, "processing");

	expire_backoff(&pool, document_id).await;

	assert!(worker::process_outbox_once(&fx.worker_state).await.expect("Second pass failed."));

	let done = outbox_row(&pool, document_id).await.expect("Expected an outbox row.");

	assert_eq!(done.status, "DONE");
	assert_eq!(document_status(&pool, document_id).await, "ready");
	assert!(fx.embed_calls.load(Ordering::SeqCst) >= 2);
	assert!(!worker::process_outbox_once(&fx.worker_state).await.expect("Idle pass failed."));

	let _ = fx.shutdown.send(());

	fx.test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres and Qdrant. Set BENEFITS_PG_DSN and BENEFITS_QDRANT_URL to run."]
async fn indexed_documents_ground_chat_answers() {
	let Some(fx) = fixture(0).await else {
		return;
	};
	let document_id = upload_policy(&fx).await;
	let Fixture {
		test_db,
		service,
		worker_state,
		employee_id,
		grounded_prompts,
		shutdown,
		..
	} = fx;
	let handle = tokio::spawn(async move {
		let _ = worker::run_worker(worker_state).await;
	});

	assert!(
		wait_for_document_status(&service.db.pool, document_id, "ready", Duration::from_secs(10))
			.await,
		"Document never became ready."
	);

	let employee = service.resolve_user(employee_id).await.expect("Failed to resolve employee.");
	let response = service
		.complete_chat(
			&employee,
			ChatRequest {
				conversation_id: None,
				message: "How often are dental cleanings covered?".to_string(),
			},
		)
		.await
		.expect("Chat failed.");

	assert_eq!(response.model, "small");
	assert!(response.sources.iter().any(|source| source.document_id == document_id));
	assert!(response.sources.iter().all(|source| source.title == "Dental Policy"));
	assert_eq!(grounded_prompts.load(Ordering::SeqCst), 1);
	assert!(response.usage.prompt_tokens > 0);

	let messages = service
		.conversation_messages(&employee, response.conversation_id)
		.await
		.expect("Failed to list messages.");

	assert_eq!(messages.len(), 2);

	handle.abort();

	let _ = shutdown.send(());

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres and Qdrant. Set BENEFITS_PG_DSN and BENEFITS_QDRANT_URL to run."]
async fn undecodable_documents_fail_without_retry() {
	let Some(fx) = fixture(0).await else {
		return;
	};
	let document_id = upload(&fx, "plan.pdf", "application/pdf", b"not a pdf").await;
	let pool = fx.service.db.pool.clone();

	assert!(worker::process_outbox_once(&fx.worker_state).await.expect("Pass failed."));

	let job = outbox_row(&pool, document_id).await.expect("Expected an outbox row.");

	assert_eq!(job.status, "DONE");
	assert_eq!(document_status(&pool, document_id).await, "failed");
	assert!(document_last_error(&pool, document_id).await.is_some_and(|text| !text.is_empty()));
	assert_eq!(fx.embed_calls.load(Ordering::SeqCst), 0);
	assert!(!worker::process_outbox_once(&fx.worker_state).await.expect("Idle pass failed."));

	let _ = fx.shutdown.send(());

	fx.test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres and Qdrant. Set BENEFITS_PG_DSN and BENEFITS_QDRANT_URL to run."]
async fn jobs_out_of_attempts_are_dead_and_fail_the_document() {
	let Some(mut fx) = fixture(usize::MAX).await else {
		return;
	};

	fx.worker_state.max_attempts = 2;

	let document_id = upload_policy(&fx).await;
	let pool = fx.service.db.pool.clone();

	assert!(worker::process_outbox_once(&fx.worker_state).await.expect("First pass failed."));

	let failed = outbox_row(&pool, document_id).await.expect("Expected an outbox row.");

	assert_eq!(failed.status, "FAILED");

	expire_backoff(&pool, document_id).await;

	assert!(worker::process_outbox_once(&fx.worker_state).await.expect("Second pass failed."));

	let dead = outbox_row(&pool, document_id).await.expect("Expected an outbox row.");

	assert_eq!(dead.status, "DEAD");
	assert_eq!(dead.attempts, 2);
	assert!(dead.last_error.is_some_and(|text| !text.contains("test-key")));
	assert_eq!(document_status(&pool, document_id).await, "failed");
	assert!(document_last_error(&pool, document_id).await.is_some());

	expire_backoff(&pool, document_id).await;

	assert!(!worker::process_outbox_once(&fx.worker_state).await.expect("Idle pass failed."));

	let _ = fx.shutdown.send(());

	fx.test_db.cleanup().await.expect("Failed to cleanup test database.");
}
