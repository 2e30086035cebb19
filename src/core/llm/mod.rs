use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.cohere.ai/compatibility/v1";
pub const DEFAULT_MODEL: &str = "command-a-03-2025";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
const TEMPERATURE: f32 = 0.3;

/// Connection settings for an OpenAI-compatible chat-completions endpoint.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LlmConfigError {
    #[error("llm base url is empty")]
    EmptyBaseUrl,
    #[error("llm base url must start with http:// or https://")]
    InvalidBaseUrl,
    #[error("llm api key is empty")]
    EmptyApiKey,
    #[error("llm model is empty")]
    EmptyModel,
    #[error("llm timeout must be greater than zero")]
    ZeroTimeout,
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend timed out")]
    Timeout,
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("backend rejected the credentials (status {0})")]
    Unauthorized(u16),
    #[error("backend quota or rate limit exceeded")]
    RateLimited,
    #[error("backend answered with status {0}")]
    Status(u16),
    #[error("malformed backend response: {0}")]
    Malformed(String),
}

impl BackendError {
    pub fn kind(&self) -> &'static str {
        match self {
            BackendError::Timeout | BackendError::Unavailable(_) => "BackendUnavailable",
            _ => "BackendError",
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            BackendError::Timeout
        } else if error.is_decode() {
            BackendError::Malformed(error.to_string())
        } else {
            BackendError::Unavailable(error.to_string())
        }
    }
}

/// A text-completion backend. Implementations must bound their own latency.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    fn model(&self) -> &str;

    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, BackendError>;
}

pub fn validate_config(config: &LlmConfig) -> Result<(), LlmConfigError> {
    let base_url = config.base_url.trim();
    if base_url.is_empty() {
        return Err(LlmConfigError::EmptyBaseUrl);
    }
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(LlmConfigError::InvalidBaseUrl);
    }
    if config.api_key.trim().is_empty() {
        return Err(LlmConfigError::EmptyApiKey);
    }
    if config.model.trim().is_empty() {
        return Err(LlmConfigError::EmptyModel);
    }
    if config.timeout_secs == 0 {
        return Err(LlmConfigError::ZeroTimeout);
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChatCompletionClient {
    client: reqwest::Client,
    endpoint: String,
    config: LlmConfig,
}

impl ChatCompletionClient {
    pub fn new(config: LlmConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| BackendError::Unavailable(error.to_string()))?;
        let endpoint = format!("{}/chat/completions", config.base_url.trim().trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            config,
        })
    }
}

#[async_trait]
impl LlmBackend for ChatCompletionClient {
    fn model(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, BackendError> {
        call_chat_completion(&self.client, &self.endpoint, &self.config, system_prompt, user_prompt).await
    }
}

pub async fn call_chat_completion(
    client: &reqwest::Client,
    endpoint: &str,
    config: &LlmConfig,
    system_prompt: &str,
    user_prompt: &str,
) -> Result<String, BackendError> {
    let body = ChatRequest {
        model: &config.model,
        messages: [
            ChatMessage {
                role: "system",
                content: system_prompt,
            },
            ChatMessage {
                role: "user",
                content: user_prompt,
            },
        ],
        temperature: TEMPERATURE,
    };

    let request = client
        .post(endpoint)
        .bearer_auth(config.api_key.trim())
        .json(&body)
        .send();
    let response = tokio::time::timeout(Duration::from_secs(config.timeout_secs), request)
        .await
        .map_err(|_| BackendError::Timeout)??;

    let status = response.status().as_u16();
    match status {
        200..=299 => {}
        401 | 403 => return Err(BackendError::Unauthorized(status)),
        429 => return Err(BackendError::RateLimited),
        _ => return Err(BackendError::Status(status)),
    }

    let payload: ChatResponse = response.json().await?;
    payload
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or_else(|| BackendError::Malformed("response carried no message content".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    async fn completions(headers: HeaderMap, Json(body): Json<Value>) -> Response {
        let auth = headers
            .get(reqwest::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        match auth.as_str() {
            "Bearer good-key" => {
                let prompt = body["messages"][1]["content"].as_str().unwrap_or_default();
                Json(json!({
                    "choices": [{"message": {"role": "assistant", "content": format!("  echo: {prompt}  ")}}]
                }))
                .into_response()
            }
            "Bearer empty-key" => Json(json!({"choices": []})).into_response(),
            "Bearer limited-key" => StatusCode::TOO_MANY_REQUESTS.into_response(),
            "Bearer slow-key" => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                StatusCode::OK.into_response()
            }
            _ => StatusCode::UNAUTHORIZED.into_response(),
        }
    }

    async fn spawn_backend() -> (String, tokio::task::JoinHandle<()>) {
        let app = Router::new().route("/v1/chat/completions", post(completions));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let address = listener.local_addr().expect("local addr should exist");
        let join_handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("server should run");
        });
        (format!("http://{address}/v1/"), join_handle)
    }

    fn config(base_url: &str, api_key: &str) -> LlmConfig {
        LlmConfig {
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            model: "test-model".to_string(),
            timeout_secs: 1,
        }
    }

    #[test]
    fn validates_config_fields() {
        assert!(validate_config(&config("https://api.example.com", "key")).is_ok());
        assert!(matches!(
            validate_config(&config("", "key")),
            Err(LlmConfigError::EmptyBaseUrl)
        ));
        assert!(matches!(
            validate_config(&config("api.example.com", "key")),
            Err(LlmConfigError::InvalidBaseUrl)
        ));
        assert!(matches!(
            validate_config(&config("https://api.example.com", " ")),
            Err(LlmConfigError::EmptyApiKey)
        ));
        let mut zero = config("https://api.example.com", "key");
        zero.timeout_secs = 0;
        assert!(matches!(validate_config(&zero), Err(LlmConfigError::ZeroTimeout)));
    }

    #[test]
    fn debug_output_hides_the_api_key() {
        let rendered = format!("{:?}", config("https://api.example.com", "secret-key"));
        assert!(!rendered.contains("secret-key"));
    }

    #[tokio::test]
    async fn maps_backend_responses() {
        let (base_url, server_task) = spawn_backend().await;

        let ok = ChatCompletionClient::new(config(&base_url, "good-key")).expect("client");
        assert_eq!(ok.model(), "test-model");
        let reply = ok.complete("system", "hello").await.expect("completion");
        assert_eq!(reply, "echo: hello");

        let unauthorized = ChatCompletionClient::new(config(&base_url, "bad-key")).expect("client");
        let error = unauthorized.complete("system", "hello").await.expect_err("401");
        assert!(matches!(error, BackendError::Unauthorized(401)));
        assert_eq!(error.kind(), "BackendError");

        let limited = ChatCompletionClient::new(config(&base_url, "limited-key")).expect("client");
        assert!(matches!(
            limited.complete("system", "hello").await,
            Err(BackendError::RateLimited)
        ));

        let empty = ChatCompletionClient::new(config(&base_url, "empty-key")).expect("client");
        assert!(matches!(
            empty.complete("system", "hello").await,
            Err(BackendError::Malformed(_))
        ));

        let slow = ChatCompletionClient::new(config(&base_url, "slow-key")).expect("client");
        let error = slow.complete("system", "hello").await.expect_err("timeout");
        assert!(matches!(error, BackendError::Timeout));
        assert_eq!(error.kind(), "BackendUnavailable");

        server_task.abort();
    }
}
