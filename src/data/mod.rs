pub mod ingest;
pub mod schema;
pub mod store;

pub use ingest::{ingest_folder, IngestOptions, DEFAULT_CHUNK_SIZE};
pub use store::{PriceStore, SqliteStore, Table};
