use std::sync::Arc;

use benefits_service::BenefitsService;
use benefits_storage::{db::Db, qdrant::QdrantStore};

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<BenefitsService>,
}
impl AppState {
	/// Connects both stores and makes sure the schema and the collection exist.
	pub async fn new(config: benefits_config::Config) -> color_eyre::Result<Self> {
		let db = Db::connect(&config.storage.postgres).await?;

		db.ensure_schema().await?;

		let qdrant = QdrantStore::new(&config.storage.qdrant)?;

		qdrant.ensure_collection().await?;

		let service = BenefitsService::new(config, db, qdrant)?;

		Ok(Self::from_service(service))
	}

	pub fn from_service(service: BenefitsService) -> Self {
		Self { service: Arc::new(service) }
	}
}
