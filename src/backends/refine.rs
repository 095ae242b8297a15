//! Text refinement through a chat LLM.

use super::prompts::REFINE_SYSTEM_PROMPT;
use super::{classify_llm_failure, LlmFailure};
use crate::capability::RefinementCapability;
use crate::error::RefinementError;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::debug;

/// [`RefinementCapability`] over any `edgequake-llm` chat provider.
///
/// `batch_refine` issues up to `concurrency` requests at once and returns
/// results in input order.
pub struct LlmRefiner {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    temperature: f32,
    max_tokens: usize,
    concurrency: usize,
}

impl LlmRefiner {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            system_prompt: REFINE_SYSTEM_PROMPT.to_string(),
            temperature: 0.2,
            max_tokens: 4096,
            concurrency: 3,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

#[async_trait]
impl RefinementCapability for LlmRefiner {
    async fn refine(&self, text: &str) -> Result<String, RefinementError> {
        let messages = vec![
            ChatMessage::system(&self.system_prompt),
            ChatMessage::user(text),
        ];
        let options = CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        };
        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| to_refinement_error(&e.to_string()))?;
        debug!(
            input_chars = text.len(),
            output_chars = response.content.len(),
            output_tokens = response.completion_tokens,
            "text refined"
        );
        Ok(response.content.trim().to_string())
    }

    async fn batch_refine(&self, texts: &[String]) -> Result<Vec<String>, RefinementError> {
        stream::iter(
            texts
                .iter()
                .cloned()
                .map(|t| async move { self.refine(&t).await }),
        )
        .buffered(self.concurrency)
        .try_collect()
        .await
    }
}

fn to_refinement_error(message: &str) -> RefinementError {
    match classify_llm_failure(message) {
        LlmFailure::RateLimited => RefinementError::RateLimited {
            retry_after_secs: None,
        },
        LlmFailure::Transient => RefinementError::Unavailable(message.to_string()),
        LlmFailure::Permanent => RefinementError::Rejected(message.to_string()),
    }
}
