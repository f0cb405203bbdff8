//! Wiring of the concrete stores shared by the CLI and the HTTP server.

use anyhow::{Context, Result};

use plan_harness_core::ingest::Ingestor;

use crate::artifacts::FsArtifactStore;
use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::notify::SlackNotifier;
use crate::sqlite_store::SqliteStore;

pub struct Services {
    pub config: Config,
    pub store: SqliteStore,
    pub artifacts: FsArtifactStore,
    pub notifier: SlackNotifier,
}

impl Services {
    /// Connect to the database (applying migrations) and prepare the
    /// artifact root.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;

        std::fs::create_dir_all(&config.storage.artifact_root).with_context(|| {
            format!(
                "Failed to create artifact root: {}",
                config.storage.artifact_root.display()
            )
        })?;

        Ok(Self {
            config: config.clone(),
            store: SqliteStore::new(pool),
            artifacts: FsArtifactStore::new(&config.storage.artifact_root),
            notifier: SlackNotifier::new(&config.notifications)?,
        })
    }

    pub fn ingestor(&self) -> Ingestor<'_> {
        Ingestor::new(&self.store, &self.artifacts, &self.store)
            .with_notifier(&self.notifier)
            .with_settings(self.config.ingest.settings())
    }

    pub async fn close(self) {
        self.store.pool().close().await;
    }
}
