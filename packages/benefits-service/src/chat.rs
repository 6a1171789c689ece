//! Retrieval-augmented chat over a company's indexed documents.
//!
//! A turn is prepared once (route, retrieve, build the prompt, persist the question) and then
//! answered either in one completion or as a stream. Both paths end in the same bookkeeping:
//! the answer is stored with its model, token usage and cited sources.

use std::{collections::HashSet, fmt::Write as _, sync::Arc, time::Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
	BenefitsService, Error, Result, access,
	router::{UsageRecord, clamp_tokens},
};
use benefits_domain::{
	access::UserContext,
	pricing,
	router::{Classification, RouteDecision},
};
use benefits_providers::chat::{ChatMessage, ChatStreamEvent, TokenUsage};
use benefits_storage::{
	conversations::{self, NewMessage},
	models::{BenefitPlan, Conversation, EnrollmentView, Message},
	qdrant::ChunkHit,
	tenancy,
};

const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 1_024;
const EVENT_CHANNEL_CAPACITY: usize = 64;
const MAX_CONVERSATION_TITLE_CHARS: usize = 80;
const ROLE_USER: &str = "user";
const ROLE_ASSISTANT: &str = "assistant";

#[derive(Clone, Debug, Deserialize)]
pub struct ChatRequest {
	#[serde(default)]
	pub conversation_id: Option<Uuid>,
	pub message: String,
}

/// A document excerpt the answer may cite as `[n]`, where `n` is its position plus one.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct SourceRef {
	pub document_id: Uuid,
	pub title: String,
	pub chunk_index: i32,
	pub score: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UsageReport {
	pub prompt_tokens: u32,
	pub completion_tokens: u32,
	pub cost_usd: f64,
	/// The provider reported no usage and the counts were estimated from text length.
	pub estimated: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct ChatResponse {
	pub conversation_id: Uuid,
	pub message_id: Uuid,
	pub content: String,
	pub model: String,
	pub classification: Classification,
	pub sources: Vec<SourceRef>,
	pub usage: UsageReport,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContextBlock {
	pub text: String,
	pub sources: Vec<SourceRef>,
}

/// Everything needed to answer one turn.
pub struct PreparedChat {
	pub company_id: Uuid,
	pub user_id: Uuid,
	pub conversation_id: Uuid,
	/// Id the assistant answer will be stored under.
	pub message_id: Uuid,
	pub decision: RouteDecision,
	pub messages: Vec<ChatMessage>,
	pub sources: Vec<SourceRef>,
	pub max_tokens: u32,
	started: Instant,
}
impl PreparedChat {
	fn meta(&self) -> ChatMeta {
		ChatMeta {
			conversation_id: self.conversation_id,
			message_id: self.message_id,
			model: self.decision.model.clone(),
			classification: self.decision.classification.clone(),
			sources: self.sources.clone(),
		}
	}
}

#[derive(Clone, Debug, Serialize)]
pub struct ChatMeta {
	pub conversation_id: Uuid,
	pub message_id: Uuid,
	pub model: String,
	pub classification: Classification,
	pub sources: Vec<SourceRef>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ChatDone {
	pub conversation_id: Uuid,
	pub message_id: Uuid,
	pub usage: UsageReport,
}

#[derive(Clone, Debug)]
pub enum ChatEvent {
	Meta(ChatMeta),
	Delta(String),
	Done(ChatDone),
	Error(String),
}
impl ChatEvent {
	pub fn name(&self) -> &'static str {
		match self {
			Self::Meta(_) => "meta",
			Self::Delta(_) => "delta",
			Self::Done(_) => "done",
			Self::Error(_) => "error",
		}
	}

	pub fn data(&self) -> Value {
		match self {
			Self::Meta(meta) => serde_json::to_value(meta).unwrap_or(Value::Null),
			Self::Delta(text) => json!({ "text": text }),
			Self::Done(done) => serde_json::to_value(done).unwrap_or(Value::Null),
			Self::Error(message) => json!({ "message": message }),
		}
	}
}

#[derive(Clone, Debug, Serialize)]
pub struct ConversationView {
	pub conversation_id: Uuid,
	pub title: String,
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
	#[serde(with = "time::serde::rfc3339")]
	pub updated_at: OffsetDateTime,
}
impl From<Conversation> for ConversationView {
	fn from(conversation: Conversation) -> Self {
		Self {
			conversation_id: conversation.conversation_id,
			title: conversation.title,
			created_at: conversation.created_at,
			updated_at: conversation.updated_at,
		}
	}
}

#[derive(Clone, Debug, Serialize)]
pub struct MessageView {
	pub message_id: Uuid,
	pub role: String,
	pub content: String,
	pub model: Option<String>,
	pub complexity: Option<String>,
	pub category: Option<String>,
	pub prompt_tokens: Option<i32>,
	pub completion_tokens: Option<i32>,
	pub cost_usd: Option<f64>,
	pub sources: Value,
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
}
impl From<Message> for MessageView {
	fn from(message: Message) -> Self {
		Self {
			message_id: message.message_id,
			role: message.role,
			content: message.content,
			model: message.model,
			complexity: message.complexity,
			category: message.category,
			prompt_tokens: message.prompt_tokens,
			completion_tokens: message.completion_tokens,
			cost_usd: message.cost_usd,
			sources: message.sources,
			created_at: message.created_at,
		}
	}
}

pub struct PromptContext<'a> {
	pub assistant_name: &'a str,
	pub company_name: &'a str,
	pub user_name: &'a str,
	pub plans: &'a [BenefitPlan],
	pub enrollments: &'a [EnrollmentView],
	pub context: &'a ContextBlock,
}

impl BenefitsService {
	/// Routes, retrieves and builds the prompt for one turn, then stores the question.
	///
	/// A new conversation is created together with its first message, and only once retrieval
	/// succeeded.
	pub async fn prepare_chat(&self, user: &UserContext, req: ChatRequest) -> Result<PreparedChat> {
		let started = Instant::now();
		let company_id = access::own_company(user)?;
		let message = validate_message(&req.message, self.cfg.chat.max_message_chars)?;
		let existing = match req.conversation_id {
			Some(conversation_id) => Some(
				conversations::get_owned_conversation(
					&self.db.pool,
					company_id,
					user.user_id,
					conversation_id,
				)
				.await?
				.ok_or_else(|| Error::NotFound { message: "Conversation not found.".to_string() })?,
			),
			None => None,
		};
		let decision = self.route(message).await;
		let hits = self.retrieve(company_id, message).await?;
		let context = assemble_context(hits, self.cfg.retrieval.max_context_chars as usize);
		let company = tenancy::get_company(&self.db.pool, company_id)
			.await?
			.ok_or_else(|| Error::NotFound { message: "Company not found.".to_string() })?;
		let plans = tenancy::list_active_plans(&self.db.pool, company_id).await?;
		let enrollments =
			tenancy::list_user_enrollments(&self.db.pool, company_id, user.user_id).await?;
		let history = match &existing {
			Some(conversation) =>
				conversations::recent_messages(
					&self.db.pool,
					conversation.conversation_id,
					i64::from(self.cfg.chat.history_messages),
				)
				.await?,
			None => Vec::new(),
		};
		let system_prompt = build_system_prompt(&PromptContext {
			assistant_name: &self.cfg.chat.assistant_name,
			company_name: &company.name,
			user_name: &user.display_name,
			plans: &plans,
			enrollments: &enrollments,
			context: &context,
		});
		let mut messages = Vec::with_capacity(history.len() + 2);

		messages.push(ChatMessage::system(system_prompt));
		messages.extend(history.iter().filter_map(history_message));
		messages.push(ChatMessage::user(message));

		let classification = &decision.classification;
		let now = OffsetDateTime::now_utc();
		let mut tx = self.db.pool.begin().await?;
		let conversation = match existing {
			Some(conversation) => conversation,
			None =>
				conversations::insert_conversation(
					&mut *tx,
					company_id,
					user.user_id,
					&conversation_title(message),
					now,
				)
				.await?,
		};

		conversations::insert_message(
			&mut *tx,
			&NewMessage {
				message_id: Uuid::new_v4(),
				conversation_id: conversation.conversation_id,
				role: ROLE_USER,
				content: message,
				model: None,
				complexity: Some(classification.complexity.as_str()),
				category: Some(classification.category.as_str()),
				prompt_tokens: None,
				completion_tokens: None,
				cost_usd: None,
				sources: &json!([]),
			},
			now,
		)
		.await?;
		tx.commit().await?;

		let max_tokens = self
			.catalog
			.get(&decision.model)
			.map(|model| model.max_output_tokens)
			.unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS);

		Ok(PreparedChat {
			company_id,
			user_id: user.user_id,
			conversation_id: conversation.conversation_id,
			message_id: Uuid::new_v4(),
			decision,
			messages,
			sources: context.sources,
			max_tokens,
			started,
		})
	}

	pub async fn complete_chat(&self, user: &UserContext, req: ChatRequest) -> Result<ChatResponse> {
		let prepared = self.prepare_chat(user, req).await?;
		let completion = match self
			.providers
			.chat
			.complete(
				&self.cfg.providers.chat,
				&prepared.decision.model,
				&prepared.messages,
				prepared.max_tokens,
			)
			.await
		{
			Ok(completion) => completion,
			Err(err) => {
				self.record_chat_error(&prepared, &err.to_string()).await;

				return Err(err);
			},
		};
		let usage = self.finish_chat(&prepared, &completion.content, completion.usage).await?;

		Ok(ChatResponse {
			conversation_id: prepared.conversation_id,
			message_id: prepared.message_id,
			content: completion.content,
			model: prepared.decision.model,
			classification: prepared.decision.classification,
			sources: prepared.sources,
			usage,
		})
	}

	/// Streams the answer as `Meta`, `Delta`..., then `Done` or `Error`.
	///
	/// The answer is stored once the provider stream ends, even when the client went away.
	pub async fn stream_chat(
		self: &Arc<Self>,
		user: &UserContext,
		req: ChatRequest,
	) -> Result<mpsc::Receiver<ChatEvent>> {
		let prepared = self.prepare_chat(user, req).await?;
		let provider_rx = match self
			.providers
			.chat
			.stream(
				&self.cfg.providers.chat,
				&prepared.decision.model,
				&prepared.messages,
				prepared.max_tokens,
			)
			.await
		{
			Ok(rx) => rx,
			Err(err) => {
				self.record_chat_error(&prepared, &err.to_string()).await;

				return Err(err);
			},
		};
		let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
		let service = Arc::clone(self);

		tokio::spawn(async move {
			service.forward_stream(prepared, provider_rx, tx).await;
		});

		Ok(rx)
	}

	/// Stores the answer, records usage and returns what the turn cost.
	pub async fn finish_chat(
		&self,
		prepared: &PreparedChat,
		content: &str,
		usage: Option<TokenUsage>,
	) -> Result<UsageReport> {
		let (prompt_tokens, completion_tokens, estimated) = match usage {
			Some(usage) => (usage.prompt_tokens, usage.completion_tokens, false),
			None =>
				(estimate_prompt_tokens(&prepared.messages), pricing::estimate_tokens(content), true),
		};
		let model = prepared.decision.model.as_str();
		let classification = &prepared.decision.classification;
		let cost_usd = self.catalog.cost(model, prompt_tokens, completion_tokens);
		let sources = serde_json::to_value(&prepared.sources)
			.map_err(|err| Error::Storage { message: err.to_string() })?;
		let now = OffsetDateTime::now_utc();

		conversations::insert_message(
			&self.db.pool,
			&NewMessage {
				message_id: prepared.message_id,
				conversation_id: prepared.conversation_id,
				role: ROLE_ASSISTANT,
				content,
				model: Some(model),
				complexity: Some(classification.complexity.as_str()),
				category: Some(classification.category.as_str()),
				prompt_tokens: Some(clamp_tokens(prompt_tokens)),
				completion_tokens: Some(clamp_tokens(completion_tokens)),
				cost_usd: Some(cost_usd),
				sources: &sources,
			},
			now,
		)
		.await?;
		conversations::touch_conversation(&self.db.pool, prepared.conversation_id, now).await?;

		let latency_ms = i64::try_from(prepared.started.elapsed().as_millis()).unwrap_or(i64::MAX);

		self.record_usage(UsageRecord {
			company_id: prepared.company_id,
			user_id: prepared.user_id,
			conversation_id: prepared.conversation_id,
			model,
			classification,
			prompt_tokens,
			completion_tokens,
			cost_usd,
			latency_ms,
		})
		.await;
		self.record_event(
			prepared.company_id,
			Some(prepared.user_id),
			"chat_message",
			json!({
				"conversation_id": prepared.conversation_id,
				"model": model,
				"complexity": classification.complexity.as_str(),
				"category": classification.category.as_str(),
				"source_count": prepared.sources.len(),
				"estimated_usage": estimated,
			}),
		)
		.await;

		Ok(UsageReport { prompt_tokens, completion_tokens, cost_usd, estimated })
	}

	pub async fn list_conversations(&self, user: &UserContext) -> Result<Vec<ConversationView>> {
		let company_id = access::own_company(user)?;
		let rows = conversations::list_conversations(&self.db.pool, company_id, user.user_id).await?;

		Ok(rows.into_iter().map(ConversationView::from).collect())
	}

	/// Messages of a conversation owned by the caller, oldest first.
	pub async fn conversation_messages(
		&self,
		user: &UserContext,
		conversation_id: Uuid,
	) -> Result<Vec<MessageView>> {
		let company_id = access::own_company(user)?;

		conversations::get_owned_conversation(
			&self.db.pool,
			company_id,
			user.user_id,
			conversation_id,
		)
		.await?
		.ok_or_else(|| Error::NotFound { message: "Conversation not found.".to_string() })?;

		let messages = conversations::list_messages(&self.db.pool, conversation_id).await?;

		Ok(messages.into_iter().map(MessageView::from).collect())
	}

	pub async fn delete_conversation(&self, user: &UserContext, conversation_id: Uuid) -> Result<()> {
		let company_id = access::own_company(user)?;
		let deleted = conversations::soft_delete_conversation(
			&self.db.pool,
			company_id,
			user.user_id,
			conversation_id,
			OffsetDateTime::now_utc(),
		)
		.await?;

		if !deleted {
			return Err(Error::NotFound { message: "Conversation not found.".to_string() });
		}

		self.record_event(
			company_id,
			Some(user.user_id),
			"conversation_deleted",
			json!({ "conversation_id": conversation_id }),
		)
		.await;

		Ok(())
	}

	async fn retrieve(&self, company_id: Uuid, query: &str) -> Result<Vec<ChunkHit>> {
		let texts = [query.to_string()];
		let vectors = self.providers.embedding.embed(&self.cfg.providers.embedding, &texts).await?;
		let Some(vector) = vectors.into_iter().next() else {
			return Err(Error::Provider {
				message: "Embedding provider returned no vectors.".to_string(),
			});
		};

		if vector.len() != self.cfg.storage.qdrant.vector_dim as usize {
			return Err(Error::Provider {
				message: "Embedding vector dimension mismatch.".to_string(),
			});
		}

		let retrieval = &self.cfg.retrieval;
		let hits = self
			.qdrant
			.search_chunks(company_id, &vector, retrieval.top_k, retrieval.min_score)
			.await?;

		tracing::info!(company_id = %company_id, hits = hits.len(), "Retrieved document chunks.");

		Ok(hits)
	}

	async fn forward_stream(
		&self,
		prepared: PreparedChat,
		mut provider_rx: mpsc::Receiver<ChatStreamEvent>,
		tx: mpsc::Sender<ChatEvent>,
	) {
		// Send failures only mean the client disconnected; the provider stream is still drained.
		let _ = tx.send(ChatEvent::Meta(prepared.meta())).await;

		let mut content = String::new();
		let mut usage = None;
		let mut failure = None;

		while let Some(event) = provider_rx.recv().await {
			match event {
				ChatStreamEvent::Delta(text) => {
					content.push_str(&text);

					let _ = tx.send(ChatEvent::Delta(text)).await;
				},
				ChatStreamEvent::Usage(reported) => usage = Some(reported),
				ChatStreamEvent::Done => break,
				ChatStreamEvent::Error(message) => {
					failure = Some(message);

					break;
				},
			}
		}

		if let Some(message) = failure.as_deref()
			&& content.is_empty()
		{
			self.record_chat_error(&prepared, message).await;

			let _ = tx.send(ChatEvent::Error(message.to_string())).await;

			return;
		}

		match self.finish_chat(&prepared, &content, usage).await {
			Ok(usage) => match failure {
				Some(message) => {
					self.record_chat_error(&prepared, &message).await;

					let _ = tx.send(ChatEvent::Error(message)).await;
				},
				None => {
					let _ = tx
						.send(ChatEvent::Done(ChatDone {
							conversation_id: prepared.conversation_id,
							message_id: prepared.message_id,
							usage,
						}))
						.await;
				},
			},
			Err(err) => {
				tracing::error!(
					error = %err,
					conversation_id = %prepared.conversation_id,
					"Failed to store streamed answer."
				);

				let _ = tx.send(ChatEvent::Error(err.to_string())).await;
			},
		}
	}

	async fn record_chat_error(&self, prepared: &PreparedChat, message: &str) {
		tracing::warn!(
			conversation_id = %prepared.conversation_id,
			model = %prepared.decision.model,
			error = message,
			"Chat completion failed."
		);

		self.record_event(
			prepared.company_id,
			Some(prepared.user_id),
			"chat_error",
			json!({
				"conversation_id": prepared.conversation_id,
				"model": prepared.decision.model,
				"error": message,
			}),
		)
		.await;
	}
}

/// Numbers the best distinct hits as `[1]`, `[2]`, ... within `max_chars` characters.
///
/// Hits are taken by descending score. The first hit is truncated to fit instead of being
/// dropped, later hits that do not fit end the context.
pub fn assemble_context(mut hits: Vec<ChunkHit>, max_chars: usize) -> ContextBlock {
	hits.sort_by(|a, b| b.score.total_cmp(&a.score));

	let mut seen = HashSet::new();
	let mut block = ContextBlock::default();
	let mut used = 0;

	for hit in hits {
		let body = hit.text.trim();

		if body.is_empty() || !seen.insert(body.to_string()) {
			continue;
		}

		let header = format!("[{}] {}\n", block.sources.len() + 1, hit.title);
		let separator = if block.sources.is_empty() { "" } else { "\n\n" };
		let needed = separator.len() + header.chars().count() + body.chars().count();

		if used + needed > max_chars {
			if !block.sources.is_empty() {
				break;
			}

			let room = max_chars.saturating_sub(header.chars().count());

			if room == 0 {
				break;
			}

			block.text.push_str(&header);
			block.text.extend(body.chars().take(room));
			block.sources.push(source_ref(&hit));

			break;
		}

		block.text.push_str(separator);
		block.text.push_str(&header);
		block.text.push_str(body);
		block.sources.push(source_ref(&hit));

		used += needed;
	}

	block
}

pub fn build_system_prompt(ctx: &PromptContext<'_>) -> String {
	let mut prompt = String::new();

	let _ = writeln!(
		prompt,
		"You are {}, the benefits assistant for {}. You are talking with {}.",
		ctx.assistant_name, ctx.company_name, ctx.user_name
	);

	prompt.push_str("\nBenefit plans offered:\n");

	if ctx.plans.is_empty() {
		prompt.push_str("- No active plans are on file.\n");
	}

	for plan in ctx.plans {
		let _ = writeln!(prompt, "- {} ({}): {}", plan.name, plan.plan_type, plan.description.trim());
	}

	prompt.push_str("\nThe employee's enrollments:\n");

	if ctx.enrollments.is_empty() {
		prompt.push_str("- No enrollments are on file.\n");
	}

	for enrollment in ctx.enrollments {
		let _ = write!(
			prompt,
			"- {} ({}), {} coverage",
			enrollment.plan_name, enrollment.plan_type, enrollment.coverage_level
		);

		if let Some(date) = enrollment.effective_date {
			let _ = write!(prompt, ", effective {date}");
		}

		prompt.push('\n');
	}

	prompt.push_str("\nCompany documents:\n");

	if ctx.context.sources.is_empty() {
		prompt.push_str("No company documents matched this question.\n");
	} else {
		prompt.push_str(&ctx.context.text);
		prompt.push('\n');
	}

	prompt.push_str(
		"\nRules:\n\
		- Answer only from the plans, enrollments and documents above.\n\
		- Cite document excerpts by number, for example [1].\n\
		- Never invent plan details, prices, deadlines or coverage.\n\
		- If the answer is not covered above, say so and suggest contacting HR.\n",
	);

	prompt
}

fn validate_message(raw: &str, max_chars: u32) -> Result<&str> {
	let message = raw.trim();

	if message.is_empty() {
		return Err(Error::InvalidRequest { message: "message must not be empty.".to_string() });
	}
	if message.chars().count() > max_chars as usize {
		return Err(Error::InvalidRequest {
			message: format!("message must be at most {max_chars} characters."),
		});
	}

	Ok(message)
}

fn conversation_title(message: &str) -> String {
	let first_line = message.lines().next().unwrap_or(message).trim();

	first_line.chars().take(MAX_CONVERSATION_TITLE_CHARS).collect()
}

fn history_message(message: &Message) -> Option<ChatMessage> {
	if message.content.trim().is_empty() {
		return None;
	}

	match message.role.as_str() {
		ROLE_USER => Some(ChatMessage::user(message.content.clone())),
		ROLE_ASSISTANT => Some(ChatMessage::assistant(message.content.clone())),
		_ => None,
	}
}

fn estimate_prompt_tokens(messages: &[ChatMessage]) -> u32 {
	messages
		.iter()
		.map(|message| pricing::estimate_tokens(&message.content))
		.fold(0_u32, u32::saturating_add)
}

fn source_ref(hit: &ChunkHit) -> SourceRef {
	SourceRef {
		document_id: hit.document_id,
		title: hit.title.clone(),
		chunk_index: hit.chunk_index,
		score: hit.score,
	}
}
