//! RankRelay Db — feedback stores behind the `Db` trait.
//!
//! A store persists each search round trip (query and choices) so later
//! train feedback can be resolved against it, and aggregates the latency
//! laps the tracker records for every collaborator call.

pub mod db;
pub mod memory;
pub mod schema;
pub mod sqlite;

pub use db::{Db, LapStats};
pub use memory::MemDb;
pub use sqlite::SqliteDb;

use std::sync::Arc;

use rankrelay_core::{DataPaths, DbKind, Result};

/// Instantiate the configured feedback store.
pub fn create_db(kind: DbKind, paths: &DataPaths) -> Result<Arc<dyn Db>> {
    match kind {
        DbKind::Sqlite => Ok(Arc::new(SqliteDb::open(paths)?)),
        DbKind::Memory => {
            tracing::info!("using in-memory feedback store");
            Ok(Arc::new(MemDb::new()))
        }
    }
}
