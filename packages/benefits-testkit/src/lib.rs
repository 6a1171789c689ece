//! Throwaway Postgres databases and Qdrant collections for integration tests.

mod error;

pub use error::{Error, Result};

use std::{collections::HashSet, env, str::FromStr, sync::Mutex, thread, time::Duration};

use qdrant_client::Qdrant;
use sqlx::{
	ConnectOptions, Connection, Executor, PgPool,
	postgres::{PgConnectOptions, PgConnection, PgPoolOptions},
};
use tokio::{runtime::Builder, time};
use uuid::Uuid;

pub const PG_DSN_VAR: &str = "BENEFITS_PG_DSN";
pub const QDRANT_URL_VAR: &str = "BENEFITS_QDRANT_URL";

const ADMIN_DATABASES: [&str; 2] = ["postgres", "template1"];

/// Connection settings for tests that need both backing stores.
#[derive(Clone, Debug)]
pub struct TestEnv {
	pub dsn: String,
	pub qdrant_url: String,
}

pub fn env_dsn() -> Option<String> {
	env::var(PG_DSN_VAR).ok().filter(|value| !value.trim().is_empty())
}

pub fn env_qdrant_url() -> Option<String> {
	env::var(QDRANT_URL_VAR).ok().filter(|value| !value.trim().is_empty())
}

/// Both stores configured, or `None` so the caller can skip.
pub fn test_env() -> Option<TestEnv> {
	Some(TestEnv { dsn: env_dsn()?, qdrant_url: env_qdrant_url()? })
}

/// A database created for one test and dropped afterwards, along with any Qdrant collections
/// named through [`TestDatabase::collection_name`].
pub struct TestDatabase {
	name: String,
	dsn: String,
	admin_options: PgConnectOptions,
	cleaned: bool,
	collections: Mutex<HashSet<String>>,
}
impl TestDatabase {
	pub async fn new(base_dsn: &str) -> Result<Self> {
		let base_options = PgConnectOptions::from_str(base_dsn)
			.map_err(|err| Error::Message(format!("Failed to parse {PG_DSN_VAR}: {err}.")))?;
		let (admin_options, mut admin_conn) = connect_admin(&base_options).await?;
		let name = format!("benefits_test_{}", Uuid::new_v4().simple());
		let create_sql = format!(r#"CREATE DATABASE "{name}""#);

		admin_conn
			.execute(create_sql.as_str())
			.await
			.map_err(|err| Error::Message(format!("Failed to create test database: {err}.")))?;

		let dsn = base_options.database(&name).to_url_lossy().to_string();

		Ok(Self {
			name,
			dsn,
			admin_options,
			cleaned: false,
			collections: Mutex::new(HashSet::new()),
		})
	}

	pub fn dsn(&self) -> &str {
		&self.dsn
	}

	pub async fn pool(&self) -> Result<PgPool> {
		Ok(PgPoolOptions::new().max_connections(4).connect(&self.dsn).await?)
	}

	/// A collection name unique to this database; it is deleted on cleanup.
	pub fn collection_name(&self, prefix: &str) -> String {
		let collection = format!("{prefix}_{}", self.name);

		self.collections.lock().unwrap_or_else(|err| err.into_inner()).insert(collection.clone());

		collection
	}

	pub async fn cleanup(mut self) -> Result<()> {
		if self.cleaned {
			return Ok(());
		}

		let collections = self.tracked_collections();
		let qdrant_result = cleanup_qdrant_collections(&collections).await;
		let db_result = cleanup_database(&self.name, &self.admin_options).await;

		self.cleaned = true;

		db_result?;
		qdrant_result
	}

	fn tracked_collections(&self) -> Vec<String> {
		self.collections.lock().unwrap_or_else(|err| err.into_inner()).iter().cloned().collect()
	}
}
impl Drop for TestDatabase {
	fn drop(&mut self) {
		if self.cleaned {
			return;
		}

		let name = self.name.clone();
		let admin_options = self.admin_options.clone();
		let collections = self.tracked_collections();
		// Drop may run inside a runtime, so cleanup gets its own thread and runtime.
		let cleanup_thread = thread::spawn(move || {
			let runtime = match Builder::new_current_thread().enable_all().build() {
				Ok(runtime) => runtime,
				Err(err) => {
					eprintln!("Test database cleanup failed: {err}.");

					return;
				},
			};

			if let Err(err) = runtime.block_on(cleanup_qdrant_collections(&collections)) {
				eprintln!("Test Qdrant cleanup failed: {err}.");
			}
			if let Err(err) = runtime.block_on(cleanup_database(&name, &admin_options)) {
				eprintln!("Test database cleanup failed: {err}.");
			}
		});
		let _ = cleanup_thread.join();
	}
}

async fn connect_admin(
	base_options: &PgConnectOptions,
) -> Result<(PgConnectOptions, PgConnection)> {
	let mut last_err = None;

	for database in ADMIN_DATABASES {
		let options = base_options.clone().database(database);

		match PgConnection::connect_with(&options).await {
			Ok(conn) => return Ok((options, conn)),
			Err(err) => last_err = Some(err),
		}
	}

	Err(Error::Message(format!("Failed to connect to an admin database: {last_err:?}.")))
}

async fn cleanup_database(name: &str, admin_options: &PgConnectOptions) -> Result<()> {
	let mut conn = PgConnection::connect_with(admin_options).await.map_err(|err| {
		Error::Message(format!("Failed to connect to admin database for cleanup: {err}."))
	})?;
	let _ = sqlx::query(
		"\
SELECT pg_terminate_backend(pid)
FROM pg_stat_activity
WHERE datname = $1 AND pid <> pg_backend_pid()",
	)
	.bind(name)
	.fetch_all(&mut conn)
	.await;

	sqlx::query(&format!(r#"DROP DATABASE IF EXISTS "{name}""#))
		.execute(&mut conn)
		.await
		.map_err(|err| Error::Message(format!("Failed to drop test database: {err}.")))?;

	Ok(())
}

async fn cleanup_qdrant_collections(collections: &[String]) -> Result<()> {
	if collections.is_empty() {
		return Ok(());
	}

	let Some(qdrant_url) = env_qdrant_url() else {
		eprintln!("Skipping Qdrant cleanup; set {QDRANT_URL_VAR} to delete test collections.");

		return Ok(());
	};
	let client = Qdrant::from_url(&qdrant_url)
		.build()
		.map_err(|err| Error::Message(format!("Failed to build Qdrant client: {err}.")))?;
	let mut failures = Vec::new();

	for collection in collections {
		match time::timeout(Duration::from_secs(10), client.delete_collection(collection.clone()))
			.await
		{
			Ok(Ok(_)) => {},
			Ok(Err(err)) => failures.push(format!("{collection}: {err}")),
			Err(_) => failures.push(format!("{collection}: timed out")),
		}
	}

	if failures.is_empty() {
		Ok(())
	} else {
		Err(Error::Message(format!("Failed to delete Qdrant collections: {}.", failures.join("; "))))
	}
}
