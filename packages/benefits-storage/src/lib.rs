pub mod conversations;
pub mod db;
pub mod documents;
pub mod models;
pub mod outbox;
pub mod qdrant;
pub mod schema;
pub mod telemetry;
pub mod tenancy;

mod error;

pub use error::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;
