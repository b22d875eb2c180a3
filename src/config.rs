//! Server configuration.
//!
//! Every setting can come from a `MURMUR_*` environment variable; the
//! builder methods exist for tests and embedding.

use std::path::PathBuf;
use std::time::Duration;

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default SQLite database path.
pub const DEFAULT_DB_PATH: &str = "murmur.db";

/// Default upstream chat-completion API base URL.
pub const DEFAULT_UPSTREAM_URL: &str = "https://openrouter.ai/api/v1";

/// Default connect timeout for upstream requests.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default overall timeout for a streaming chat completion, including body
/// read. The upstream protocol has no timeout of its own; this bounds how
/// long a single turn may stay open.
const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(300);

/// Runtime configuration for the chat server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Port the HTTP server listens on.
    pub port: u16,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Base64-encoded 256-bit master key for API-key encryption.
    pub encryption_key: Option<String>,
    /// Base URL of the upstream chat-completion API.
    pub upstream_url: String,
    /// Connect timeout for upstream requests.
    pub connect_timeout: Duration,
    /// Overall timeout for a streaming chat completion.
    pub stream_timeout: Duration,
    /// `HTTP-Referer` attribution header sent upstream, if any.
    pub referer: Option<String>,
    /// `X-Title` attribution header sent upstream, if any.
    pub app_title: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            encryption_key: None,
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            stream_timeout: DEFAULT_STREAM_TIMEOUT,
            referer: None,
            app_title: None,
        }
    }
}

impl ServerConfig {
    /// Create a config with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from `MURMUR_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(port) = env_parse("MURMUR_PORT") {
            config.port = port;
        }
        if let Ok(path) = std::env::var("MURMUR_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        config.encryption_key = std::env::var("MURMUR_ENCRYPTION_KEY").ok();
        if let Ok(url) = std::env::var("MURMUR_UPSTREAM_URL") {
            config.upstream_url = url;
        }
        if let Some(secs) = env_parse("MURMUR_CONNECT_TIMEOUT_SECS") {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse("MURMUR_STREAM_TIMEOUT_SECS") {
            config.stream_timeout = Duration::from_secs(secs);
        }
        config.referer = std::env::var("MURMUR_REFERER").ok();
        config.app_title = std::env::var("MURMUR_APP_TITLE").ok();

        config
    }

    /// Set the server port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the database path.
    #[must_use]
    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }

    /// Set the master encryption key.
    #[must_use]
    pub fn with_encryption_key(mut self, key: impl Into<String>) -> Self {
        self.encryption_key = Some(key.into());
        self
    }

    /// Set the upstream API base URL.
    #[must_use]
    pub fn with_upstream_url(mut self, url: impl Into<String>) -> Self {
        self.upstream_url = url.into();
        self
    }

    /// Set the upstream connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the overall streaming timeout.
    #[must_use]
    pub const fn with_stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = timeout;
        self
    }
}

/// Parse an environment variable, ignoring unset or malformed values.
fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.upstream_url, DEFAULT_UPSTREAM_URL);
        assert_eq!(config.stream_timeout, Duration::from_secs(300));
        assert!(config.encryption_key.is_none());
    }

    #[test]
    fn test_config_builder() {
        let config = ServerConfig::new()
            .with_port(8080)
            .with_db_path(":memory:")
            .with_encryption_key("key")
            .with_upstream_url("http://127.0.0.1:9999/v1")
            .with_connect_timeout(Duration::from_millis(250));

        assert_eq!(config.port, 8080);
        assert_eq!(config.db_path, PathBuf::from(":memory:"));
        assert_eq!(config.encryption_key.as_deref(), Some("key"));
        assert_eq!(config.upstream_url, "http://127.0.0.1:9999/v1");
        assert_eq!(config.connect_timeout, Duration::from_millis(250));
    }
}
