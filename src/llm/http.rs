//! HTTP chat-completion client with retry, backoff, and key rotation.

use crate::config::PipelineConfig;
use crate::llm::{CompletionDriver, CompletionRequest};
use crate::{StoryboardError, StoryboardErrorKind, StoryboardResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_retry2::strategy::{jitter, ExponentialBackoff};
use tokio_retry2::{Retry, RetryError};
use tracing::{debug, warn};

/// Longest single backoff wait.
const MAX_BACKOFF: Duration = Duration::from_secs(96);

/// Client for an OpenAI-shaped chat-completion endpoint.
///
/// The wire contract is the minimal one: POST
/// `{model, messages, temperature, max_tokens}`, read
/// `choices[0].message.content`. Nothing else in the response is
/// depended on.
pub struct HttpCompletionClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_keys: Vec<String>,
    key_cursor: AtomicUsize,
    retry_max: u32,
    retry_base: Duration,
}

impl std::fmt::Debug for HttpCompletionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCompletionClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_keys", &self.api_keys.len())
            .finish_non_exhaustive()
    }
}

impl HttpCompletionClient {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns `Config` if no API key is configured or the underlying
    /// HTTP client cannot be constructed.
    pub fn from_config(config: &PipelineConfig) -> StoryboardResult<Self> {
        let api_keys: Vec<String> = config
            .llm_api_keys
            .iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();

        if api_keys.is_empty() {
            return Err(StoryboardError::new(StoryboardErrorKind::Config(
                "no LLM API keys configured (llm_api_keys)".to_string(),
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.llm_request_timeout_seconds))
            .build()
            .map_err(|e| StoryboardError::new(StoryboardErrorKind::Config(e.to_string())))?;

        Ok(Self {
            http,
            endpoint: config.llm_endpoint.clone(),
            model: config.llm_model.clone(),
            api_keys,
            key_cursor: AtomicUsize::new(0),
            retry_max: config.llm_retry_max.max(1),
            retry_base: Duration::from_secs(config.llm_retry_base_seconds.max(1)),
        })
    }

    fn current_key(&self) -> &str {
        let cursor = self.key_cursor.load(Ordering::Relaxed);
        &self.api_keys[cursor % self.api_keys.len()]
    }

    /// Advance to the next key; called when a rate limit is observed.
    fn rotate_key(&self) {
        if self.api_keys.len() > 1 {
            self.key_cursor.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn attempt(&self, request: &CompletionRequest) -> StoryboardResult<String> {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(self.current_key())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                // Timeouts and connection failures are retryable.
                StoryboardError::new(StoryboardErrorKind::TransientApi(e.to_string()))
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            self.rotate_key();
            return Err(StoryboardError::new(StoryboardErrorKind::TransientApi(
                "rate limited (429)".to_string(),
            )));
        }
        if status.is_server_error() {
            return Err(StoryboardError::new(StoryboardErrorKind::TransientApi(
                format!("server error ({status})"),
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(200).collect();
            return Err(StoryboardError::new(
                StoryboardErrorKind::UnrecoverableApi {
                    status: status.as_u16(),
                    message: excerpt,
                },
            ));
        }

        let payload: Value = response.json().await.map_err(|e| {
            StoryboardError::new(StoryboardErrorKind::TransientApi(format!(
                "failed to read response body: {e}"
            )))
        })?;

        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                StoryboardError::new(StoryboardErrorKind::Parse(
                    "completion response has no choices[0].message.content".to_string(),
                ))
            })
    }
}

#[async_trait]
impl CompletionDriver for HttpCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> StoryboardResult<String> {
        // Waits double per attempt starting from the configured base:
        // with a 3 s base, 3 s, 6 s, 12 s, ... capped at 96 s.
        let strategy = ExponentialBackoff::from_millis(2)
            .factor((self.retry_base.as_millis() as u64 / 2).max(1))
            .max_delay(MAX_BACKOFF)
            .map(jitter)
            .take(self.retry_max.saturating_sub(1) as usize);

        Retry::spawn(strategy, || async {
            match self.attempt(request).await {
                Ok(text) => {
                    debug!(chars = text.len(), "completion received");
                    Ok(text)
                }
                Err(e) if e.is_transient() => {
                    warn!(error = %e, "transient completion failure, will retry");
                    Err(RetryError::Transient {
                        err: e,
                        retry_after: None,
                    })
                }
                Err(e) => {
                    warn!(error = %e, "permanent completion failure");
                    Err(RetryError::Permanent(e))
                }
            }
        })
        .await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
