//! LLM client layer.
//!
//! A single request/response primitive over a chat-completion endpoint,
//! behind the [`CompletionDriver`] trait so stages and tests never care
//! which backend answers. The HTTP implementation, the bounded fan-out,
//! and the recovery of structured data from untrusted responses each
//! live in their own submodule.

mod batch;
mod extraction;
mod http;

pub use batch::{run_batch, BatchOutcome, TaskFailure};
pub use extraction::{
    extract_and_parse, extract_json, lenient_string_list, lenient_u32, parse_json,
};
pub use http::HttpCompletionClient;

use crate::StoryboardResult;
use async_trait::async_trait;

/// One chat-completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// User prompt body
    pub prompt: String,
    /// Optional system prompt
    pub system: Option<String>,
    /// Sampling temperature
    pub temperature: f32,
    /// Response token cap
    pub max_tokens: u32,
}

impl CompletionRequest {
    /// Build a plain user-prompt request.
    pub fn new(prompt: impl Into<String>, temperature: f32, max_tokens: u32) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            temperature,
            max_tokens,
        }
    }

    /// Attach a system prompt.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// Core trait every completion backend implements.
///
/// Implementations carry no cross-request state beyond credentials and
/// must be safe to invoke concurrently up to the configured fan-out.
#[async_trait]
pub trait CompletionDriver: Send + Sync {
    /// Send one request and return the assistant's text body.
    ///
    /// # Errors
    ///
    /// `TransientApi` failures are retried internally; an error here
    /// means either a non-retryable failure (`UnrecoverableApi`, `Parse`)
    /// or an exhausted retry budget.
    async fn complete(&self, request: &CompletionRequest) -> StoryboardResult<String>;

    /// Model name sent with requests, for logging.
    fn model_name(&self) -> &str;
}
