//! Wire types for the upstream chat-completion protocol.

use serde::{Deserialize, Serialize};

/// Author of a chat message.
///
/// Serialized lowercase on the wire. `system` exists for prompt injection
/// even though the UI only produces `user` and `assistant` turns.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt.
    System,
    /// End-user turn.
    User,
    /// Model-generated turn.
    Assistant,
}

impl Role {
    /// Stable textual form, matching the wire and storage encoding.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Parse the textual form produced by [`as_str`](Self::as_str).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One role-tagged message in a completion request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message author.
    pub role: Role,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// Convenience constructor.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Body of an upstream chat-completion request.
#[derive(Debug, Serialize)]
pub struct CompletionRequest<'a> {
    /// Model identifier, e.g. `openai/gpt-4o-mini`.
    pub model: &'a str,
    /// Full ordered message history.
    pub messages: &'a [ChatMessage],
    /// Always `true`; the relay only speaks the streaming protocol.
    pub stream: bool,
    /// Output token cap, fixed by the relay.
    pub max_tokens: u32,
    /// Sampling temperature, fixed by the relay.
    pub temperature: f32,
}

/// One streamed completion chunk: `{"choices":[{"delta":{"content":"..."}}]}`.
#[derive(Debug, Deserialize)]
pub struct StreamChunk {
    /// Parallel completion choices; the relay only ever requests one.
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
}

/// One choice within a streamed chunk.
#[derive(Debug, Deserialize)]
pub struct StreamChoice {
    /// Incremental payload.
    #[serde(default)]
    pub delta: StreamDelta,
}

/// Incremental text delta within a streamed choice.
#[derive(Debug, Default, Deserialize)]
pub struct StreamDelta {
    /// Generated text fragment, absent in role/metadata chunks.
    #[serde(default)]
    pub content: Option<String>,
}

/// Model catalog response: `{"data": [...]}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelCatalog {
    /// Catalog entries.
    pub data: Vec<ModelInfo>,
}

/// One entry in the upstream model catalog.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model identifier used in completion requests.
    pub id: String,
    /// Human-readable name; falls back to the id when the catalog omits it.
    #[serde(default)]
    pub name: String,
    /// Short description.
    #[serde(default)]
    pub description: String,
    /// Per-token pricing, when published.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing: Option<ModelPricing>,
    /// Context window size in tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_length: Option<u64>,
}

/// Prompt/completion pricing as decimal strings, as the catalog publishes it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Price per prompt token.
    pub prompt: String,
    /// Price per completion token.
    pub completion: String,
}
