//! Transport boundary for the turn orchestrator.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::relay::{ChatMessage, Role};
use crate::store::Message;

/// Errors from client-side API calls.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("server returned {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Server error message.
        message: String,
    },

    /// The relay stream faulted mid-turn.
    #[error("stream error: {0}")]
    Stream(String),
}

/// Relayed completion bytes as seen by the orchestrator.
pub type ByteStream = BoxStream<'static, Result<Bytes, ClientError>>;

/// What the orchestrator needs from a transport: persist a message, open a
/// relay stream. Mocked in tests, implemented over HTTP by
/// [`HttpBackend`](super::HttpBackend).
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Persist one message in a conversation, returning the server record.
    async fn append_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        model_used: Option<&str>,
    ) -> Result<Message, ClientError>;

    /// Open a streaming chat completion for the given history.
    async fn open_stream(
        &self,
        conversation_id: &str,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<ByteStream, ClientError>;
}
