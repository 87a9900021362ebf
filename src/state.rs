//! Application state management

use std::sync::Arc;

use crate::config::Config;
use crate::db::{create_pool, SqliteSessionStore};
use crate::error::StorageError;
use crate::storage::{BlobBackend, LocalBlobBackend, S3BlobBackend};
use crate::upload::{
    AllowAll, Authorizer, BearerTokenAuthorizer, BigUpload, MemorySessionStore, SessionStore,
    StoreFilesHandler, UploadHandler, UploadOptions,
};

/// Error type for state initialization
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Failed to initialize storage: {0}")]
    Storage(#[from] StorageError),
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    uploads: BigUpload,
    authorizer: Arc<dyn Authorizer>,
    handler: Arc<dyn UploadHandler>,
}

impl AppState {
    /// Create state from explicit collaborators
    pub fn new(
        uploads: BigUpload,
        authorizer: Arc<dyn Authorizer>,
        handler: Arc<dyn UploadHandler>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                uploads,
                authorizer,
                handler,
            }),
        }
    }

    /// Build storage, session store and hooks from configuration
    pub async fn from_config(config: &Config) -> Result<Self, StateError> {
        let blobs: Arc<dyn BlobBackend> = if config.storage.provider.is_s3_compatible() {
            tracing::info!("S3 endpoint: {}", config.storage.endpoint);
            tracing::info!("S3 bucket: {}", config.storage.bucket);
            Arc::new(S3BlobBackend::new(&config.storage).await?)
        } else {
            tracing::info!("Local blob storage at {}", config.storage.path.display());
            tokio::fs::create_dir_all(&config.storage.path)
                .await
                .map_err(StorageError::from)?;
            Arc::new(LocalBlobBackend::new(&config.storage.path))
        };

        let sessions: Arc<dyn SessionStore> = if config.database.url == "memory" {
            tracing::warn!("Upload sessions are kept in memory and will not survive a restart");
            Arc::new(MemorySessionStore::new())
        } else {
            let pool = create_pool(&config.database.url).await?;
            tracing::info!("Database initialized at {}", config.database.url);
            Arc::new(SqliteSessionStore::new(pool))
        };

        let authorizer: Arc<dyn Authorizer> = match &config.upload.api_token {
            Some(token) => Arc::new(BearerTokenAuthorizer::new(token.clone())),
            None => Arc::new(AllowAll),
        };

        let uploads = BigUpload::new(
            blobs.clone(),
            sessions,
            UploadOptions {
                max_age_seconds: config.upload.big_upload_max_seconds,
                verify_reassembly: config.upload.verify_reassembly,
            },
        );

        Ok(Self::new(uploads, authorizer, Arc::new(StoreFilesHandler::new(blobs))))
    }

    /// Get the upload protocol
    pub fn uploads(&self) -> &BigUpload {
        &self.inner.uploads
    }

    /// Get the authorization hook
    pub fn authorizer(&self) -> &dyn Authorizer {
        self.inner.authorizer.as_ref()
    }

    /// Get the downstream handler
    pub fn handler(&self) -> &dyn UploadHandler {
        self.inner.handler.as_ref()
    }
}
