//! HTTP client for the upstream chat-completion provider.

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use thiserror::Error;
use url::Url;

use crate::config::ServerConfig;

use super::types::{ChatMessage, CompletionRequest, ModelCatalog, ModelInfo, ModelPricing};

/// Output token cap for every relayed completion. Generation parameters are
/// chosen by the relay, never by the caller.
const MAX_TOKENS: u32 = 4000;

/// Sampling temperature for every relayed completion.
const TEMPERATURE: f32 = 0.7;

/// Model id fragments listed before the rest of the catalog.
const POPULAR_MODELS: [&str; 6] = [
    "gpt-4o",
    "gpt-4",
    "claude-3.5-sonnet",
    "claude-3",
    "gemini",
    "llama-3.1",
];

/// Errors from upstream requests.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The upstream base URL is not a valid URL.
    #[error("invalid upstream URL: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),

    /// HTTP client construction or transport failure.
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The upstream provider answered with a non-success status.
    #[error("upstream returned status {status}: {body}")]
    Upstream {
        /// Upstream HTTP status code.
        status: u16,
        /// Upstream response body, shown to the user for diagnosis.
        body: String,
    },
}

/// Byte stream of a relayed completion response.
pub type CompletionStream = BoxStream<'static, Result<Bytes, reqwest::Error>>;

/// Client for an OpenRouter-compatible chat-completion API.
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: Url,
    referer: Option<String>,
    app_title: Option<String>,
}

impl UpstreamClient {
    /// Build a client from server configuration.
    ///
    /// The whole streaming request, body read included, is bounded by
    /// `config.stream_timeout`; there is no per-chunk timeout.
    ///
    /// # Errors
    /// Returns an error if the base URL is invalid or the HTTP client
    /// cannot be constructed.
    pub fn new(config: &ServerConfig) -> Result<Self, RelayError> {
        let base_url = Url::parse(&config.upstream_url)?;

        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.stream_timeout)
            .build()?;

        Ok(Self {
            http,
            base_url,
            referer: config.referer.clone(),
            app_title: config.app_title.clone(),
        })
    }

    /// Open a streaming chat completion.
    ///
    /// On success the upstream byte stream is returned untouched for
    /// verbatim forwarding; the response is never buffered in full. A
    /// mid-stream fault surfaces as an error item in the stream; the relay
    /// does not retry a partially delivered completion.
    ///
    /// # Errors
    /// Returns [`RelayError::Upstream`] when the provider answers with a
    /// non-success status before any bytes are relayed.
    pub async fn stream_chat(
        &self,
        api_key: &str,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<CompletionStream, RelayError> {
        let body = CompletionRequest {
            model,
            messages,
            stream: true,
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
        };

        let url = self.endpoint("chat/completions")?;
        let mut request = self.http.post(url).bearer_auth(api_key).json(&body);
        if let Some(referer) = &self.referer {
            request = request.header("HTTP-Referer", referer);
        }
        if let Some(title) = &self.app_title {
            request = request.header("X-Title", title);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "upstream rejected completion");
            return Err(RelayError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.bytes_stream().boxed())
    }

    /// Fetch the upstream model catalog, sorted popular-first then by name.
    ///
    /// # Errors
    /// Returns an error on transport failure or a non-success status;
    /// callers fall back to [`fallback_models`].
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, RelayError> {
        let url = self.endpoint("models")?;
        let response = self.http.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let catalog: ModelCatalog = response.json().await?;
        let mut models: Vec<ModelInfo> = catalog
            .data
            .into_iter()
            .map(|mut model| {
                if model.name.is_empty() {
                    model.name = model.id.clone();
                }
                model
            })
            .collect();
        sort_models(&mut models);
        Ok(models)
    }

    /// Join a path onto the base URL, tolerating a missing trailing slash.
    fn endpoint(&self, path: &str) -> Result<Url, RelayError> {
        let mut base = self.base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        Ok(Url::parse(&base)?.join(path)?)
    }
}

/// Sort models with well-known families first, then alphabetically by name.
fn sort_models(models: &mut [ModelInfo]) {
    models.sort_by(|a, b| {
        let a_popular = is_popular(&a.id);
        let b_popular = is_popular(&b.id);
        b_popular.cmp(&a_popular).then_with(|| a.name.cmp(&b.name))
    });
}

fn is_popular(id: &str) -> bool {
    let id = id.to_lowercase();
    POPULAR_MODELS.iter().any(|p| id.contains(p))
}

/// Static catalog served when the upstream catalog is unreachable, so model
/// selection stays usable offline.
#[must_use]
pub fn fallback_models() -> Vec<ModelInfo> {
    fn entry(
        id: &str,
        name: &str,
        description: &str,
        prompt: &str,
        completion: &str,
        context_length: u64,
    ) -> ModelInfo {
        ModelInfo {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            pricing: Some(ModelPricing {
                prompt: prompt.to_string(),
                completion: completion.to_string(),
            }),
            context_length: Some(context_length),
        }
    }

    vec![
        entry(
            "openai/gpt-4o",
            "GPT-4o",
            "OpenAI's most advanced multimodal flagship model",
            "0.000005",
            "0.000015",
            128_000,
        ),
        entry(
            "openai/gpt-4o-mini",
            "GPT-4o Mini",
            "Affordable and intelligent small model for fast, lightweight tasks",
            "0.00000015",
            "0.0000006",
            128_000,
        ),
        entry(
            "anthropic/claude-3.5-sonnet",
            "Claude 3.5 Sonnet",
            "Most intelligent model by Anthropic",
            "0.000003",
            "0.000015",
            200_000,
        ),
        entry(
            "anthropic/claude-3-haiku",
            "Claude 3 Haiku",
            "Fastest and most compact model for near-instant responsiveness",
            "0.00000025",
            "0.00000125",
            200_000,
        ),
        entry(
            "google/gemini-pro-1.5",
            "Gemini Pro 1.5",
            "Google's most capable multimodal model",
            "0.00000125",
            "0.000005",
            1_000_000,
        ),
        entry(
            "meta-llama/llama-3.1-8b-instruct",
            "Llama 3.1 8B",
            "Meta's efficient open-source model",
            "0.00000018",
            "0.00000018",
            131_072,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_catalog() {
        let models = fallback_models();
        assert_eq!(models.len(), 6);
        assert!(models.iter().any(|m| m.id == "openai/gpt-4o-mini"));
        assert!(models.iter().all(|m| m.pricing.is_some()));
    }

    #[test]
    fn test_sort_models_popular_first() {
        let mut models = vec![
            ModelInfo {
                id: "zzz/obscure".to_string(),
                name: "AAA Obscure".to_string(),
                description: String::new(),
                pricing: None,
                context_length: None,
            },
            ModelInfo {
                id: "openai/gpt-4o".to_string(),
                name: "GPT-4o".to_string(),
                description: String::new(),
                pricing: None,
                context_length: None,
            },
        ];
        sort_models(&mut models);
        assert_eq!(models[0].id, "openai/gpt-4o");
    }

    #[test]
    fn test_endpoint_join() {
        let config = ServerConfig::new().with_upstream_url("http://127.0.0.1:9/v1");
        let client = UpstreamClient::new(&config).unwrap();
        assert_eq!(
            client.endpoint("chat/completions").unwrap().as_str(),
            "http://127.0.0.1:9/v1/chat/completions"
        );
        assert_eq!(
            client.endpoint("models").unwrap().as_str(),
            "http://127.0.0.1:9/v1/models"
        );
    }
}
