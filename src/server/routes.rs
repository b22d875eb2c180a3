//! HTTP route handlers for the chat API.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::relay::{ChatMessage, ModelCatalog, Role, fallback_models};
use crate::store::{Conversation, ConversationSummary, Message};

use super::auth::AuthUser;
use super::error::ApiError;
use super::state::AppState;

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route(
            "/api/conversations/{id}",
            axum::routing::patch(rename_conversation).delete(delete_conversation),
        )
        .route(
            "/api/conversations/{id}/messages",
            get(list_messages).post(append_message),
        )
        .route("/api/chat", post(relay_chat))
        .route("/api/models", get(list_models))
        .route("/api/settings", get(get_settings).patch(update_settings))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "murmur-chat",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// List the caller's conversations, most recently updated first.
async fn list_conversations(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    let conversations = state.store.list_conversations(&user_id).await?;
    Ok(Json(conversations))
}

/// Conversation creation request.
#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    /// Optional title; defaults when absent or blank.
    pub title: Option<String>,
}

/// Create a conversation.
async fn create_conversation(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(request): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<Conversation>), ApiError> {
    let conversation = state
        .store
        .create_conversation(&user_id, request.title.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

/// Conversation rename request.
#[derive(Debug, Deserialize)]
pub struct RenameConversationRequest {
    /// New title, must be non-empty.
    pub title: String,
}

/// Rename a conversation the caller owns.
async fn rename_conversation(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    Json(request): Json<RenameConversationRequest>,
) -> Result<Json<Conversation>, ApiError> {
    let conversation = state
        .store
        .rename_conversation(&id, &user_id, &request.title)
        .await?;
    Ok(Json(conversation))
}

/// Delete a conversation the caller owns, cascading to its messages.
async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.store.delete_conversation(&id, &user_id).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

/// List a conversation's messages in creation order.
async fn list_messages(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let messages = state.store.list_messages(&id, &user_id).await?;
    Ok(Json(messages))
}

/// Message append request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendMessageRequest {
    /// Message author.
    pub role: Role,
    /// Message text.
    pub content: String,
    /// Model that produced an assistant turn.
    pub model_used: Option<String>,
}

/// Append a message to a conversation the caller owns.
async fn append_message(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    Json(request): Json<AppendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let message = state
        .store
        .append_message(
            &id,
            &user_id,
            request.role,
            &request.content,
            request.model_used.as_deref(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// Streaming chat relay request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRelayRequest {
    /// Full ordered message history to complete.
    pub messages: Vec<ChatMessage>,
    /// Model identifier.
    pub model: String,
    /// Conversation this turn belongs to, verified for ownership when set.
    pub conversation_id: Option<String>,
}

/// Relay a streaming chat completion from the upstream provider.
///
/// The upstream byte stream is forwarded verbatim and incrementally; a
/// mid-stream upstream fault terminates the response body rather than being
/// retried.
async fn relay_chat(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(request): Json<ChatRelayRequest>,
) -> Result<Response, ApiError> {
    let blob = state
        .store
        .api_key_blob(&user_id)
        .await?
        .ok_or(ApiError::ApiKeyMissing)?;
    let api_key = state.cipher.decrypt(&blob)?;

    if let Some(conversation_id) = &request.conversation_id {
        state
            .store
            .find_conversation(conversation_id, &user_id)
            .await?;
    }

    let stream = state
        .upstream
        .stream_chat(&api_key, &request.model, &request.messages)
        .await?;

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// Fetch the model catalog, falling back to the static list when the
/// upstream catalog is unreachable.
async fn list_models(
    State(state): State<Arc<AppState>>,
    AuthUser(_user_id): AuthUser,
) -> Json<ModelCatalog> {
    match state.upstream.list_models().await {
        Ok(models) => Json(ModelCatalog { data: models }),
        Err(e) => {
            tracing::warn!("model catalog fetch failed, serving fallback: {e}");
            Json(ModelCatalog {
                data: fallback_models(),
            })
        }
    }
}

/// Report whether the caller has an API key configured. The key itself is
/// never returned.
async fn get_settings(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let has_api_key = state.store.has_api_key(&user_id).await?;
    Ok(Json(serde_json::json!({ "hasApiKey": has_api_key })))
}

/// Settings update request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettingsRequest {
    /// Upstream API key to store, encrypted at rest.
    pub api_key: String,
}

/// Store the caller's upstream API key.
async fn update_settings(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(request): Json<UpdateSettingsRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let api_key = request.api_key.trim();
    if api_key.is_empty() {
        return Err(ApiError::BadRequest(
            "Valid API key is required".to_string(),
        ));
    }

    let blob = state.cipher.encrypt(api_key)?;
    state.store.set_api_key(&user_id, &blob).await?;

    Ok(Json(serde_json::json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::Router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use tower::ServiceExt;

    use crate::config::ServerConfig;
    use crate::crypto::generate_key;
    use crate::server::state::AppState;

    use super::create_router;

    /// Unreachable upstream so catalog and relay calls fail fast.
    const DEAD_UPSTREAM: &str = "http://127.0.0.1:9/v1";

    async fn test_app() -> (Router, Arc<AppState>, String) {
        let config = ServerConfig::new()
            .with_encryption_key(generate_key())
            .with_upstream_url(DEAD_UPSTREAM)
            .with_connect_timeout(Duration::from_millis(200))
            .with_stream_timeout(Duration::from_millis(500));
        let state = AppState::new_in_memory(config).await.unwrap();

        let user = state.store.create_user("test@example.com").await.unwrap();
        let token = state.store.create_session(&user.id).await.unwrap();

        (create_router(state.clone()), state, token)
    }

    fn request(
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _state, _token) = test_app().await;
        let response = app
            .oneshot(request("GET", "/health", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_requires_authentication() {
        let (app, _state, _token) = test_app().await;

        for (method, uri) in [
            ("GET", "/api/conversations"),
            ("POST", "/api/chat"),
            ("GET", "/api/models"),
            ("GET", "/api/settings"),
        ] {
            let response = app
                .clone()
                .oneshot(request(method, uri, None, None))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{method} {uri}");
        }

        let response = app
            .oneshot(request("GET", "/api/conversations", Some("bogus"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_conversation_crud_flow() {
        let (app, _state, token) = test_app().await;
        let token = Some(token.as_str());

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/conversations",
                token,
                Some(serde_json::json!({})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        assert_eq!(created["title"], "New Conversation");
        let id = created["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(request(
                "PATCH",
                &format!("/api/conversations/{id}"),
                token,
                Some(serde_json::json!({ "title": "Trip planning" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["title"], "Trip planning");

        let response = app
            .clone()
            .oneshot(request("GET", "/api/conversations", token, None))
            .await
            .unwrap();
        let listed = body_json(response).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);
        assert_eq!(listed[0]["messageCount"], 0);

        let response = app
            .clone()
            .oneshot(request(
                "DELETE",
                &format!("/api/conversations/{id}"),
                token,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(request("GET", "/api/conversations", token, None))
            .await
            .unwrap();
        assert!(body_json(response).await.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_conversation_is_not_found() {
        let (app, state, token) = test_app().await;

        let other = state.store.create_user("other@example.com").await.unwrap();
        let foreign = state
            .store
            .create_conversation(&other.id, Some("private"))
            .await
            .unwrap();
        let token = Some(token.as_str());

        let cases = [
            request(
                "PATCH",
                &format!("/api/conversations/{}", foreign.id),
                token,
                Some(serde_json::json!({ "title": "stolen" })),
            ),
            request(
                "DELETE",
                &format!("/api/conversations/{}", foreign.id),
                token,
                None,
            ),
            request(
                "GET",
                &format!("/api/conversations/{}/messages", foreign.id),
                token,
                None,
            ),
            request(
                "POST",
                &format!("/api/conversations/{}/messages", foreign.id),
                token,
                Some(serde_json::json!({ "role": "user", "content": "hi" })),
            ),
        ];
        for case in cases {
            let response = app.clone().oneshot(case).await.unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
            assert_eq!(body_json(response).await["error"], "Conversation not found");
        }
    }

    #[tokio::test]
    async fn test_message_append_and_list() {
        let (app, _state, token) = test_app().await;
        let token = Some(token.as_str());

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/conversations",
                token,
                Some(serde_json::json!({ "title": "chat" })),
            ))
            .await
            .unwrap();
        let id = body_json(response).await["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/api/conversations/{id}/messages"),
                token,
                Some(serde_json::json!({ "role": "user", "content": "Hello there" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/api/conversations/{id}/messages"),
                token,
                Some(serde_json::json!({
                    "role": "assistant",
                    "content": "Hi!",
                    "modelUsed": "openai/gpt-4o-mini"
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(request(
                "GET",
                &format!("/api/conversations/{id}/messages"),
                token,
                None,
            ))
            .await
            .unwrap();
        let messages = body_json(response).await;
        assert_eq!(messages.as_array().unwrap().len(), 2);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[1]["modelUsed"], "openai/gpt-4o-mini");

        let response = app
            .oneshot(request("GET", "/api/conversations", token, None))
            .await
            .unwrap();
        assert_eq!(body_json(response).await[0]["messageCount"], 2);
    }

    #[tokio::test]
    async fn test_settings_roundtrip() {
        let (app, _state, token) = test_app().await;
        let token = Some(token.as_str());

        let response = app
            .clone()
            .oneshot(request("GET", "/api/settings", token, None))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["hasApiKey"], false);

        let response = app
            .clone()
            .oneshot(request(
                "PATCH",
                "/api/settings",
                token,
                Some(serde_json::json!({ "apiKey": "  " })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(request(
                "PATCH",
                "/api/settings",
                token,
                Some(serde_json::json!({ "apiKey": "sk-or-v1-test" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(request("GET", "/api/settings", token, None))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["hasApiKey"], true);
    }

    #[tokio::test]
    async fn test_chat_without_api_key_is_configuration_error() {
        let (app, state, token) = test_app().await;

        let conversation = {
            let user_id = state.store.resolve_session(&token).await.unwrap().unwrap();
            state
                .store
                .create_conversation(&user_id, None)
                .await
                .unwrap()
        };

        let response = app
            .oneshot(request(
                "POST",
                "/api/chat",
                Some(&token),
                Some(serde_json::json!({
                    "messages": [{ "role": "user", "content": "hi" }],
                    "model": "openai/gpt-4o-mini",
                    "conversationId": conversation.id
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "API key not configured");
    }

    #[tokio::test]
    async fn test_chat_checks_ownership_before_upstream() {
        let (app, state, token) = test_app().await;

        let user_id = state.store.resolve_session(&token).await.unwrap().unwrap();
        let blob = state.cipher.encrypt("sk-or-v1-test").unwrap();
        state.store.set_api_key(&user_id, &blob).await.unwrap();

        let other = state.store.create_user("other@example.com").await.unwrap();
        let foreign = state
            .store
            .create_conversation(&other.id, None)
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/chat",
                Some(&token),
                Some(serde_json::json!({
                    "messages": [{ "role": "user", "content": "hi" }],
                    "model": "openai/gpt-4o-mini",
                    "conversationId": foreign.id
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        // With a reachable conversation the relay dials upstream, which is
        // dead here, so the failure surfaces as a gateway error instead.
        let owned = state
            .store
            .create_conversation(&user_id, None)
            .await
            .unwrap();
        let response = app
            .oneshot(request(
                "POST",
                "/api/chat",
                Some(&token),
                Some(serde_json::json!({
                    "messages": [{ "role": "user", "content": "hi" }],
                    "model": "openai/gpt-4o-mini",
                    "conversationId": owned.id
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_corrupted_key_material_is_internal_error() {
        let (app, state, token) = test_app().await;

        let user_id = state.store.resolve_session(&token).await.unwrap().unwrap();
        state
            .store
            .set_api_key(&user_id, "not-a-valid-blob")
            .await
            .unwrap();

        let response = app
            .oneshot(request(
                "POST",
                "/api/chat",
                Some(&token),
                Some(serde_json::json!({
                    "messages": [{ "role": "user", "content": "hi" }],
                    "model": "openai/gpt-4o-mini"
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["error"], "Internal server error");
    }

    #[tokio::test]
    async fn test_models_fallback_when_upstream_unreachable() {
        let (app, _state, token) = test_app().await;

        let response = app
            .oneshot(request("GET", "/api/models", Some(&token), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let catalog = body_json(response).await;
        let data = catalog["data"].as_array().unwrap();
        assert_eq!(data.len(), 6);
        assert!(data.iter().any(|m| m["id"] == "anthropic/claude-3.5-sonnet"));
    }
}
