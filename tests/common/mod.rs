#![allow(dead_code)]

use faction_migrate::migrate::{Collaborators, MigrationLocks, MigrationPipeline};
use faction_migrate::storage::SqliteStore;
use std::sync::{Arc, Once};
use std::time::Instant;
use tracing::info;

pub mod cli;
pub mod fixtures;

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        faction_migrate::logging::init_test_logging();
    });
}

pub struct TestLogGuard {
    name: String,
    start: Instant,
}

impl TestLogGuard {
    fn new(name: &str) -> Self {
        init_test_logging();
        info!("{name}: starting");
        Self {
            name: name.to_string(),
            start: Instant::now(),
        }
    }
}

impl Drop for TestLogGuard {
    fn drop(&mut self) {
        info!(
            "{}: assertions passed (elapsed {:?})",
            self.name,
            self.start.elapsed()
        );
    }
}

pub fn test_log(name: &str) -> TestLogGuard {
    TestLogGuard::new(name)
}

/// Fresh in-memory target store.
pub fn test_store() -> Arc<SqliteStore> {
    init_test_logging();
    Arc::new(SqliteStore::open_memory().expect("in-memory store"))
}

/// Pipeline over `store` with its own locks.
pub fn pipeline(store: &Arc<SqliteStore>) -> MigrationPipeline {
    MigrationPipeline::new(
        Arc::new(MigrationLocks::new()),
        Collaborators::from_store(store),
    )
}
