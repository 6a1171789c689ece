use sqlx::PgExecutor;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Result, db::Db, models::IngestOutboxEntry};

pub const OP_INDEX: &str = "INDEX";
pub const OP_DELETE: &str = "DELETE";

pub async fn enqueue<'e, E>(executor: E, document_id: Uuid, op: &str, now: OffsetDateTime) -> Result<Uuid>
where
	E: PgExecutor<'e>,
{
	let outbox_id = Uuid::new_v4();

	sqlx::query(
		"\
INSERT INTO ingest_outbox (outbox_id, document_id, op, status, available_at, created_at, updated_at)
VALUES ($1, $2, $3, 'PENDING', $4, $4, $4)",
	)
	.bind(outbox_id)
	.bind(document_id)
	.bind(op)
	.bind(now)
	.execute(executor)
	.await?;

	Ok(outbox_id)
}

/// Claims the oldest due job and leases it for `lease_seconds`. Claimed jobs whose lease ran
/// out become claimable again.
pub async fn claim_next(
	db: &Db,
	now: OffsetDateTime,
	lease_seconds: i64,
) -> Result<Option<IngestOutboxEntry>> {
	let mut tx = db.pool.begin().await?;
	let row = sqlx::query_as::<_, IngestOutboxEntry>(
		"\
SELECT
	outbox_id,
	document_id,
	op,
	status,
	attempts,
	last_error,
	available_at,
	created_at,
	updated_at
FROM ingest_outbox
WHERE status IN ('PENDING', 'FAILED', 'CLAIMED') AND available_at <= $1
ORDER BY available_at ASC
LIMIT 1
FOR UPDATE SKIP LOCKED",
	)
	.bind(now)
	.fetch_optional(&mut *tx)
	.await?;
	let job = match row {
		Some(mut job) => {
			let lease_until = now + time::Duration::seconds(lease_seconds);

			sqlx::query(
				"UPDATE ingest_outbox SET status = 'CLAIMED', available_at = $1, updated_at = $2 WHERE outbox_id = $3",
			)
			.bind(lease_until)
			.bind(now)
			.bind(job.outbox_id)
			.execute(&mut *tx)
			.await?;

			job.status = "CLAIMED".to_string();
			job.available_at = lease_until;
			job.updated_at = now;

			Some(job)
		},
		None => None,
	};

	tx.commit().await?;

	Ok(job)
}

pub async fn mark_done<'e, E>(executor: E, outbox_id: Uuid, now: OffsetDateTime) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query("UPDATE ingest_outbox SET status = 'DONE', updated_at = $1 WHERE outbox_id = $2")
		.bind(now)
		.bind(outbox_id)
		.execute(executor)
		.await?;

	Ok(())
}

pub async fn mark_failed<'e, E>(
	executor: E,
	outbox_id: Uuid,
	attempts: i32,
	error_text: &str,
	available_at: OffsetDateTime,
	now: OffsetDateTime,
) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
UPDATE ingest_outbox
SET status = 'FAILED',
	attempts = $1,
	last_error = $2,
	available_at = $3,
	updated_at = $4
WHERE outbox_id = $5",
	)
	.bind(attempts)
	.bind(error_text)
	.bind(available_at)
	.bind(now)
	.bind(outbox_id)
	.execute(executor)
	.await?;

	Ok(())
}

/// Parks a job that ran out of attempts; it is never claimed again.
pub async fn mark_dead<'e, E>(
	executor: E,
	outbox_id: Uuid,
	attempts: i32,
	error_text: &str,
	now: OffsetDateTime,
) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
UPDATE ingest_outbox
SET status = 'DEAD', attempts = $1, last_error = $2, updated_at = $3
WHERE outbox_id = $4",
	)
	.bind(attempts)
	.bind(error_text)
	.bind(now)
	.bind(outbox_id)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn get_entry<'e, E>(executor: E, outbox_id: Uuid) -> Result<Option<IngestOutboxEntry>>
where
	E: PgExecutor<'e>,
{
	let entry = sqlx::query_as::<_, IngestOutboxEntry>(
		"\
SELECT outbox_id, document_id, op, status, attempts, last_error, available_at, created_at, updated_at
FROM ingest_outbox
WHERE outbox_id = $1",
	)
	.bind(outbox_id)
	.fetch_optional(executor)
	.await?;

	Ok(entry)
}
