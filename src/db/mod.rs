//! Local durable store: row models, SQL repositories and the `Store` handle.
//!
//! This module is split into three submodules:
//! - `model`: row structs returned by queries and their decoding into domain types.
//! - `repo`: SQL-only functions over a ready pool.
//! - `store`: the lazily initialized handle the engine and consumers share.

pub mod model;
pub mod repo;
pub mod store;

pub use repo::{init_pool, run_migrations, Pool, MIGRATOR};
pub use store::Store;

/// Logical name of the offline store; also the database file stem.
pub const STORE_NAME: &str = "pos_offline";

/// Latest migration version. Bumps must be additive.
pub const SCHEMA_VERSION: i64 = 2;

/// Setting key holding the RFC 3339 time of the most recent drain attempt.
pub const LAST_SYNC_KEY: &str = "lastSync";

/// Default SQLite URL for a data directory.
pub fn default_database_url(data_dir: &str) -> String {
    format!("sqlite://{}/{}.db", data_dir.trim_end_matches('/'), STORE_NAME)
}
