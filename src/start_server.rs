//! Startup helpers for the Murmur chat server.

use std::process::ExitCode;

use crate::config::ServerConfig;
use crate::server::{self, AppState};

/// Run the server (used by the `murmur-server` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting Murmur Chat v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env();
    let port = config.port;
    tracing::info!("Upstream endpoint: {}", config.upstream_url);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    rt.block_on(async {
        let state = match AppState::new(config).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to create state: {e}");
                return ExitCode::from(1);
            }
        };

        if let Err(e) = server::run_server_with_shutdown(state, port, shutdown_signal()).await {
            tracing::error!("Server error: {e}");
            return ExitCode::from(1);
        }

        ExitCode::SUCCESS
    })
}

/// Resolves when the process receives Ctrl-C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl-C handler: {e}");
        return;
    }
    tracing::info!("Shutdown signal received");
}
