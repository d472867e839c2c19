use std::sync::Arc;

use anyhow::Context;
use common::storage::BlobStore;
use common::transcode::{FfmpegTranscoder, Transcoder};
use sea_orm::DatabaseConnection;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::database::init_db;
use crate::ingest::IngestService;
use crate::repository::{FileRepository, SeaOrmFileRepository};
use crate::storage::build_blob_store;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub ingest: IngestService,
}

impl AppState {
    /// Connect every dependency, failing fast if one is missing.
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let ffmpeg_path = config
            .transcoder
            .ffmpeg_path
            .clone()
            .context("transcoder.ffmpeg_path is required")?;
        let transcoder = FfmpegTranscoder::new(ffmpeg_path, config.transcoder.timeout());
        transcoder
            .probe()
            .await
            .context("Audio toolchain check failed (transcoder.ffmpeg_path)")?;

        let db = init_db(&config.database)
            .await
            .context("Failed to connect to database (database.url)")?;
        info!("Database ready");

        let repo: Arc<dyn FileRepository> = Arc::new(SeaOrmFileRepository::new(
            db.clone(),
            config.database.statement_timeout(),
        ));
        let blobs = build_blob_store(&config.storage, repo.clone()).await?;

        Ok(Self::from_parts(config, db, Arc::new(transcoder), blobs, repo))
    }

    /// Assemble state from already-built components.
    pub fn from_parts(
        config: AppConfig,
        db: DatabaseConnection,
        transcoder: Arc<dyn Transcoder>,
        blobs: Arc<dyn BlobStore>,
        repo: Arc<dyn FileRepository>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            db,
            ingest: IngestService::new(transcoder, blobs, repo),
        }
    }

    /// Release the connection pool.
    pub async fn shutdown(self) {
        if let Err(e) = self.db.close().await {
            warn!(error = %e, "Failed to close database pool");
        }
        info!("Shutdown complete");
    }
}
