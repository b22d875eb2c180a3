//! HTTP transport for the turn orchestrator.

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};

use crate::relay::{ChatMessage, ModelCatalog, ModelInfo, Role};
use crate::store::{Conversation, ConversationSummary, Message};

use super::backend::{ByteStream, ChatBackend, ClientError};

/// Wire shape of server error bodies.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct CreateConversationBody<'a> {
    title: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct RenameConversationBody<'a> {
    title: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AppendMessageBody<'a> {
    role: Role,
    content: &'a str,
    model_used: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatRelayBody<'a> {
    messages: &'a [ChatMessage],
    model: &'a str,
    conversation_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsBody {
    has_api_key: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateSettingsBody<'a> {
    api_key: &'a str,
}

/// Authenticated HTTP client for the chat API.
///
/// Implements [`ChatBackend`] for the orchestrator and carries the rest of
/// the API surface the UI needs.
pub struct HttpBackend {
    http: Client,
    base_url: String,
    token: String,
}

impl HttpBackend {
    /// Create a client for a server at `base_url` (no trailing slash
    /// required), authenticating with a session token.
    #[must_use]
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            http: Client::new(),
            base_url,
            token: token.into(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(&self.token)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.request(reqwest::Method::GET, path)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.request(reqwest::Method::POST, path)
    }

    fn patch(&self, path: &str) -> RequestBuilder {
        self.request(reqwest::Method::PATCH, path)
    }

    /// List the caller's conversations, most recently updated first.
    ///
    /// # Errors
    /// Returns an error on transport failure or a non-success response.
    pub async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ClientError> {
        let response = check(self.get("/api/conversations").send().await?).await?;
        Ok(response.json().await?)
    }

    /// Create a conversation, optionally titled.
    ///
    /// # Errors
    /// Returns an error on transport failure or a non-success response.
    pub async fn create_conversation(
        &self,
        title: Option<&str>,
    ) -> Result<Conversation, ClientError> {
        let response = check(
            self.post("/api/conversations")
                .json(&CreateConversationBody { title })
                .send()
                .await?,
        )
        .await?;
        Ok(response.json().await?)
    }

    /// Rename a conversation.
    ///
    /// # Errors
    /// Returns an error on transport failure or a non-success response.
    pub async fn rename_conversation(
        &self,
        conversation_id: &str,
        title: &str,
    ) -> Result<Conversation, ClientError> {
        let response = check(
            self.patch(&format!("/api/conversations/{conversation_id}"))
                .json(&RenameConversationBody { title })
                .send()
                .await?,
        )
        .await?;
        Ok(response.json().await?)
    }

    /// Delete a conversation and its messages.
    ///
    /// # Errors
    /// Returns an error on transport failure or a non-success response.
    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<(), ClientError> {
        check(
            self.request(
                reqwest::Method::DELETE,
                &format!("/api/conversations/{conversation_id}"),
            )
            .send()
            .await?,
        )
        .await?;
        Ok(())
    }

    /// Fetch a conversation's messages in creation order.
    ///
    /// # Errors
    /// Returns an error on transport failure or a non-success response.
    pub async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, ClientError> {
        let response = check(
            self.get(&format!("/api/conversations/{conversation_id}/messages"))
                .send()
                .await?,
        )
        .await?;
        Ok(response.json().await?)
    }

    /// Fetch the model catalog.
    ///
    /// # Errors
    /// Returns an error on transport failure or a non-success response.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, ClientError> {
        let response = check(self.get("/api/models").send().await?).await?;
        let catalog: ModelCatalog = response.json().await?;
        Ok(catalog.data)
    }

    /// Whether the caller has an upstream API key configured.
    ///
    /// # Errors
    /// Returns an error on transport failure or a non-success response.
    pub async fn has_api_key(&self) -> Result<bool, ClientError> {
        let response = check(self.get("/api/settings").send().await?).await?;
        let settings: SettingsBody = response.json().await?;
        Ok(settings.has_api_key)
    }

    /// Store the caller's upstream API key.
    ///
    /// # Errors
    /// Returns an error on transport failure or a non-success response.
    pub async fn set_api_key(&self, api_key: &str) -> Result<(), ClientError> {
        check(
            self.patch("/api/settings")
                .json(&UpdateSettingsBody { api_key })
                .send()
                .await?,
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn append_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        model_used: Option<&str>,
    ) -> Result<Message, ClientError> {
        let response = check(
            self.post(&format!("/api/conversations/{conversation_id}/messages"))
                .json(&AppendMessageBody {
                    role,
                    content,
                    model_used,
                })
                .send()
                .await?,
        )
        .await?;
        Ok(response.json().await?)
    }

    async fn open_stream(
        &self,
        conversation_id: &str,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<ByteStream, ClientError> {
        let response = check(
            self.post("/api/chat")
                .json(&ChatRelayBody {
                    messages,
                    model,
                    conversation_id,
                })
                .send()
                .await?,
        )
        .await?;
        Ok(Box::pin(
            response.bytes_stream().map_err(ClientError::Http),
        ))
    }
}

/// Turn a non-success response into [`ClientError::Api`], surfacing the
/// server's `error` body when it has one.
async fn check(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = match response.text().await {
        Ok(body) => match serde_json::from_str::<ErrorBody>(&body) {
            Ok(parsed) => parsed.error,
            Err(_) if !body.is_empty() => body,
            Err(_) => status.to_string(),
        },
        Err(_) => status.to_string(),
    };

    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}
