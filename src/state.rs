//! Application state for Tama.
//!
//! Contains the shared state that is passed to all handlers.

use std::sync::Arc;

use tama_llm::{ChatModel, LlmService};
use tracing::{info, warn};

use crate::config::{self, Config};
use crate::db::DbPool;
use crate::services::{
    AuthService, BlobStore, ChatService, Clock, LocalBlobStore, QuotaService, SystemClock,
};
use crate::Result;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub db: DbPool,
    /// Runtime configuration.
    pub config: Arc<Config>,
    /// Time source for quota dates and timestamps.
    pub clock: Arc<dyn Clock>,
    /// Daily request admission.
    pub quota: QuotaService,
    /// Accounts and sessions.
    pub auth: AuthService,
    /// Generation and transcript persistence.
    pub chat: ChatService,
    /// Upload storage.
    pub blobs: Arc<dyn BlobStore>,
}

impl AppState {
    /// Create a new application state from the global configuration.
    pub async fn new() -> Result<Self> {
        let config = config::config().clone();

        // Initialize database
        let db = crate::db::init_pool(&config.database.path).await?;

        // Initialize database schema
        crate::db::initialize_schema(&db).await?;

        let llm = LlmService::new(&config.llm)?;
        if llm.is_available() {
            info!(providers = ?llm.providers(), "LLM providers configured");
        } else {
            warn!("No LLM providers configured; chat requests will fail");
        }

        let state = Self::from_parts(db, config, Arc::new(llm), Arc::new(SystemClock));

        let removed = state.auth.cleanup_expired_sessions().await?;
        if removed > 0 {
            info!(removed, "Expired sessions removed");
        }

        Ok(state)
    }

    /// Assemble state from already-initialized parts.
    pub fn from_parts(
        db: DbPool,
        config: Config,
        model: Arc<dyn ChatModel>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let quota = QuotaService::new(db.clone(), clock.clone());
        let auth = AuthService::new(db.clone(), clock.clone(), config.session.max_age());
        let chat = ChatService::new(
            db.clone(),
            model,
            clock.clone(),
            config.chat.system_prompt.clone(),
            config.chat.sampling,
        );
        let blobs: Arc<dyn BlobStore> =
            Arc::new(LocalBlobStore::new(&config.storage.uploads_path));

        Self {
            db,
            config: Arc::new(config),
            clock,
            quota,
            auth,
            chat,
            blobs,
        }
    }
}
