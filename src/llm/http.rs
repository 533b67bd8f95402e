//! OpenAI-compatible HTTP backend (`/chat/completions`, `/embeddings`).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Embedder, GenerateOptions, Message, TextGenerator};
use crate::config::LlmSettings;
use crate::errors::LlmError;

/// Bounded exponential backoff for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_tries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_tries: 4,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Clone)]
pub struct HttpGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    embedding_model: Option<String>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for HttpGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGenerator")
            .field("base_url", &self.base_url)
            .field("api_key", &"***")
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("embedding_model", &self.embedding_model)
            .finish()
    }
}

impl HttpGenerator {
    /// Build from settings, reading the key from the variable named by
    /// `api_key_env` through `lookup`.
    pub fn from_settings<F>(settings: &LlmSettings, lookup: F) -> Result<Self, LlmError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup(&settings.api_key_env)
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                LlmError::Misconfiguration(format!(
                    "API key not found in environment variable '{}'. \
                     Set it or configure a different [llm] api_key_env.",
                    settings.api_key_env
                ))
            })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| LlmError::Misconfiguration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            embedding_model: settings.embedding_model.clone(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn convert_messages(messages: &[Message]) -> Vec<OpenAiMessage<'_>> {
        messages
            .iter()
            .map(|m| OpenAiMessage {
                role: m.role,
                content: &m.content,
            })
            .collect()
    }

    /// POST `body` to `path`, retrying transport errors, 429 and 5xx.
    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, LlmError>
    where
        B: Serialize + ?Sized + Sync,
        R: for<'de> Deserialize<'de>,
    {
        let url = self.endpoint(path);
        let mut attempt = 1;
        loop {
            let result = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await;

            let error = match result {
                Ok(resp) if resp.status().is_success() => {
                    return resp
                        .json::<R>()
                        .await
                        .map_err(|e| LlmError::InvalidResponse(e.to_string()));
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let body = resp.text().await.unwrap_or_default();
                    let err = LlmError::Status { status, body };
                    if status != 429 && status < 500 {
                        return Err(err);
                    }
                    err
                }
                Err(e) => LlmError::Transport(e.to_string()),
            };

            if attempt >= self.retry.max_tries {
                return Err(error);
            }
            let delay = self.retry.delay(attempt);
            warn!(
                url = %url,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Text generation request failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl TextGenerator for HttpGenerator {
    async fn generate(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<String, LlmError> {
        let model = options.model.as_deref().unwrap_or(&self.model);
        let request = ChatRequest {
            model,
            messages: Self::convert_messages(messages),
            temperature: options.temperature.unwrap_or(self.temperature),
            max_tokens: options.max_tokens.unwrap_or(self.max_tokens),
            stream: false,
        };
        debug!(
            model = %model,
            temperature = request.temperature,
            messages = messages.len(),
            "Invoking chat completion"
        );

        let response: ChatResponse = self.post_json("chat/completions", &request).await?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("response has no choices".into()))?;
        choice
            .message
            .content
            .ok_or_else(|| LlmError::InvalidResponse("choices[0] has no content".into()))
    }
}

#[async_trait]
impl Embedder for HttpGenerator {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let model = self.embedding_model.as_deref().ok_or_else(|| {
            LlmError::Misconfiguration("no [llm] embedding_model configured".into())
        })?;
        let request = EmbeddingRequest {
            model,
            input: inputs,
        };
        let mut response: EmbeddingResponse = self.post_json("embeddings", &request).await?;
        if response.data.len() != inputs.len() {
            return Err(LlmError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                inputs.len(),
                response.data.len()
            )));
        }
        response.data.sort_by_key(|d| d.index);
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[derive(Debug, Serialize)]
struct OpenAiMessage<'a> {
    role: super::Role,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::StatusCode, routing::post};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn settings(base_url: &str) -> LlmSettings {
        LlmSettings {
            base_url: base_url.to_string(),
            embedding_model: Some("embed-small".into()),
            ..LlmSettings::default()
        }
    }

    fn key(_: &str) -> Option<String> {
        Some("sk-test".into())
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/v1", addr)
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_tries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn missing_api_key_is_misconfiguration() {
        let err = HttpGenerator::from_settings(&LlmSettings::default(), |_| None).unwrap_err();
        assert!(matches!(err, LlmError::Misconfiguration(_)));
        assert!(err.to_string().contains("PATCHFORGE_API_KEY"));
    }

    #[test]
    fn debug_output_masks_api_key() {
        let generator = HttpGenerator::from_settings(&settings("http://x/v1/"), key).unwrap();
        let debug = format!("{:?}", generator);
        assert!(!debug.contains("sk-test"));
        assert!(debug.contains("***"));
        assert_eq!(generator.endpoint("embeddings"), "http://x/v1/embeddings");
    }

    #[test]
    fn retry_delays_grow_and_are_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(4));
        assert_eq!(policy.delay(30), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn generate_sends_roles_and_temperature() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["messages"][0]["role"], "system");
                assert_eq!(body["messages"][1]["role"], "user");
                assert_eq!(body["temperature"], json!(0.0));
                assert_eq!(body["model"], "granite-20b-chat");
                Json(json!({"choices": [{"message": {"role": "assistant", "content": "pong"}}]}))
            }),
        );
        let base = serve(app).await;
        let generator = HttpGenerator::from_settings(&settings(&base), key).unwrap();
        let reply = generator
            .generate(
                &[Message::system("be terse"), Message::user("ping")],
                &GenerateOptions::with_temperature(0.0),
            )
            .await
            .unwrap();
        assert_eq!(reply, "pong");
    }

    #[tokio::test]
    async fn server_errors_are_retried_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({})))
                    } else {
                        (
                            StatusCode::OK,
                            Json(json!({"choices": [{"message": {"content": "ok"}}]})),
                        )
                    }
                }
            }),
        );
        let base = serve(app).await;
        let generator = HttpGenerator::from_settings(&settings(&base), key)
            .unwrap()
            .with_retry(fast_retry());
        let reply = generator
            .generate(&[Message::user("x")], &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(reply, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { (StatusCode::BAD_REQUEST, "bad model") }
            }),
        );
        let base = serve(app).await;
        let generator = HttpGenerator::from_settings(&settings(&base), key)
            .unwrap()
            .with_retry(fast_retry());
        let err = generator
            .generate(&[Message::user("x")], &GenerateOptions::default())
            .await
            .unwrap_err();
        match err {
            LlmError::Status { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "bad model");
            }
            other => panic!("Expected Status, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn embeddings_are_returned_in_input_order() {
        let app = Router::new().route(
            "/v1/embeddings",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["model"], "embed-small");
                Json(json!({"data": [
                    {"index": 1, "embedding": [0.0, 1.0]},
                    {"index": 0, "embedding": [1.0, 0.0]}
                ]}))
            }),
        );
        let base = serve(app).await;
        let generator = HttpGenerator::from_settings(&settings(&base), key).unwrap();
        let vectors = generator
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }
}
