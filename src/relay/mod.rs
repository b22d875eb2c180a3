//! Upstream chat-completion relay.
//!
//! The relay is a pass-through proxy: it authenticates with the caller's
//! decrypted API key, issues the streaming completion request, and forwards
//! the byte stream verbatim. [`sse`] holds the frame parser shared with the
//! client-side orchestrator.

pub mod client;
pub mod sse;
pub mod types;

pub use client::{CompletionStream, RelayError, UpstreamClient, fallback_models};
pub use types::{ChatMessage, ModelCatalog, ModelInfo, Role};
