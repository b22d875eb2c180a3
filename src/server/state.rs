//! Application state shared across all request handlers.
//!
//! Every collaborator (store handle, key cipher, upstream client) is
//! constructed here at startup and injected, so handlers never reach for
//! globals and tests can assemble state over an in-memory store.

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::crypto::ApiKeyCipher;
use crate::relay::UpstreamClient;
use crate::store::ChatStore;

/// Shared application state.
pub struct AppState {
    /// Chat persistence.
    pub store: ChatStore,
    /// Cipher for per-user upstream API keys.
    pub cipher: ApiKeyCipher,
    /// Upstream chat-completion client.
    pub upstream: UpstreamClient,
    /// Runtime configuration.
    pub config: ServerConfig,
}

impl AppState {
    /// Assemble application state from configuration.
    ///
    /// # Errors
    /// Returns an error if the master encryption key is missing or invalid,
    /// the database cannot be opened, or the upstream client cannot be
    /// built.
    pub async fn new(
        config: ServerConfig,
    ) -> Result<Arc<Self>, Box<dyn std::error::Error + Send + Sync>> {
        let store = ChatStore::open(&config.db_path).await?;
        Self::assemble(config, store)
    }

    /// Assemble state over an in-memory store, for tests.
    ///
    /// # Errors
    /// Returns an error if any collaborator cannot be built.
    pub async fn new_in_memory(
        config: ServerConfig,
    ) -> Result<Arc<Self>, Box<dyn std::error::Error + Send + Sync>> {
        let store = ChatStore::open_in_memory().await?;
        Self::assemble(config, store)
    }

    fn assemble(
        config: ServerConfig,
        store: ChatStore,
    ) -> Result<Arc<Self>, Box<dyn std::error::Error + Send + Sync>> {
        let key = config
            .encryption_key
            .as_deref()
            .ok_or("MURMUR_ENCRYPTION_KEY is not set")?;
        let cipher = ApiKeyCipher::new(key)?;
        let upstream = UpstreamClient::new(&config)?;

        Ok(Arc::new(Self {
            store,
            cipher,
            upstream,
            config,
        }))
    }
}
