use serde_json::Value;
use sqlx::PgExecutor;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	Result,
	models::{Conversation, Message},
};

const MESSAGE_COLUMNS: &str = "\
message_id, conversation_id, role, content, model, complexity, category, prompt_tokens, \
completion_tokens, cost_usd, sources, created_at";

pub struct NewMessage<'a> {
	pub message_id: Uuid,
	pub conversation_id: Uuid,
	pub role: &'a str,
	pub content: &'a str,
	pub model: Option<&'a str>,
	pub complexity: Option<&'a str>,
	pub category: Option<&'a str>,
	pub prompt_tokens: Option<i32>,
	pub completion_tokens: Option<i32>,
	pub cost_usd: Option<f64>,
	pub sources: &'a Value,
}

pub async fn insert_conversation<'e, E>(
	executor: E,
	company_id: Uuid,
	user_id: Uuid,
	title: &str,
	now: OffsetDateTime,
) -> Result<Conversation>
where
	E: PgExecutor<'e>,
{
	let conversation = sqlx::query_as::<_, Conversation>(
		"\
INSERT INTO conversations (conversation_id, company_id, user_id, title, created_at, updated_at)
VALUES ($1, $2, $3, $4, $5, $5)
RETURNING conversation_id, company_id, user_id, title, created_at, updated_at",
	)
	.bind(Uuid::new_v4())
	.bind(company_id)
	.bind(user_id)
	.bind(title)
	.bind(now)
	.fetch_one(executor)
	.await?;

	Ok(conversation)
}

/// A conversation visible to its owner; other users and deleted conversations yield `None`.
pub async fn get_owned_conversation<'e, E>(
	executor: E,
	company_id: Uuid,
	user_id: Uuid,
	conversation_id: Uuid,
) -> Result<Option<Conversation>>
where
	E: PgExecutor<'e>,
{
	let conversation = sqlx::query_as::<_, Conversation>(
		"\
SELECT conversation_id, company_id, user_id, title, created_at, updated_at
FROM conversations
WHERE conversation_id = $1 AND company_id = $2 AND user_id = $3 AND deleted_at IS NULL",
	)
	.bind(conversation_id)
	.bind(company_id)
	.bind(user_id)
	.fetch_optional(executor)
	.await?;

	Ok(conversation)
}

pub async fn list_conversations<'e, E>(
	executor: E,
	company_id: Uuid,
	user_id: Uuid,
) -> Result<Vec<Conversation>>
where
	E: PgExecutor<'e>,
{
	let conversations = sqlx::query_as::<_, Conversation>(
		"\
SELECT conversation_id, company_id, user_id, title, created_at, updated_at
FROM conversations
WHERE company_id = $1 AND user_id = $2 AND deleted_at IS NULL
ORDER BY updated_at DESC",
	)
	.bind(company_id)
	.bind(user_id)
	.fetch_all(executor)
	.await?;

	Ok(conversations)
}

/// Returns whether a live conversation owned by the user was deleted.
pub async fn soft_delete_conversation<'e, E>(
	executor: E,
	company_id: Uuid,
	user_id: Uuid,
	conversation_id: Uuid,
	now: OffsetDateTime,
) -> Result<bool>
where
	E: PgExecutor<'e>,
{
	let result = sqlx::query(
		"\
UPDATE conversations
SET deleted_at = $1, updated_at = $1
WHERE conversation_id = $2 AND company_id = $3 AND user_id = $4 AND deleted_at IS NULL",
	)
	.bind(now)
	.bind(conversation_id)
	.bind(company_id)
	.bind(user_id)
	.execute(executor)
	.await?;

	Ok(result.rows_affected() > 0)
}

pub async fn touch_conversation<'e, E>(
	executor: E,
	conversation_id: Uuid,
	now: OffsetDateTime,
) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query("UPDATE conversations SET updated_at = $1 WHERE conversation_id = $2")
		.bind(now)
		.bind(conversation_id)
		.execute(executor)
		.await?;

	Ok(())
}

pub async fn insert_message<'e, E>(
	executor: E,
	message: &NewMessage<'_>,
	now: OffsetDateTime,
) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO messages (
	message_id,
	conversation_id,
	role,
	content,
	model,
	complexity,
	category,
	prompt_tokens,
	completion_tokens,
	cost_usd,
	sources,
	created_at
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
	)
	.bind(message.message_id)
	.bind(message.conversation_id)
	.bind(message.role)
	.bind(message.content)
	.bind(message.model)
	.bind(message.complexity)
	.bind(message.category)
	.bind(message.prompt_tokens)
	.bind(message.completion_tokens)
	.bind(message.cost_usd)
	.bind(message.sources)
	.bind(now)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn list_messages<'e, E>(executor: E, conversation_id: Uuid) -> Result<Vec<Message>>
where
	E: PgExecutor<'e>,
{
	let sql = format!(
		"SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = $1 \
		ORDER BY created_at ASC, message_id ASC"
	);
	let messages =
		sqlx::query_as::<_, Message>(&sql).bind(conversation_id).fetch_all(executor).await?;

	Ok(messages)
}

/// The newest `limit` messages, oldest first.
pub async fn recent_messages<'e, E>(
	executor: E,
	conversation_id: Uuid,
	limit: i64,
) -> Result<Vec<Message>>
where
	E: PgExecutor<'e>,
{
	let sql = format!(
		"SELECT * FROM (\
			SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = $1 \
			ORDER BY created_at DESC, message_id DESC LIMIT $2\
		) recent ORDER BY created_at ASC, message_id ASC"
	);
	let messages = sqlx::query_as::<_, Message>(&sql)
		.bind(conversation_id)
		.bind(limit)
		.fetch_all(executor)
		.await?;

	Ok(messages)
}
