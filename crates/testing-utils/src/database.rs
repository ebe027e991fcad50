//! Temporary SQLite databases for integration tests

use broker_core::config::DatabaseConfig;
use broker_infrastructure::DatabaseManager;
use tempfile::TempDir;

/// A migrated SQLite database that lives as long as this value
pub struct TestDatabase {
    pub manager: DatabaseManager,
    dir: TempDir,
}

impl TestDatabase {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let config = DatabaseConfig {
            url: format!("sqlite://{}/broker.db", dir.path().display()),
            max_connections: 8,
            ..Default::default()
        };
        let manager = DatabaseManager::new(&config)
            .await
            .expect("failed to open test database");
        Self { manager, dir }
    }

    /// Directory that also hosts blob files for tests that need them
    pub fn path(&self) -> &std::path::Path {
        self.dir.path()
    }
}
