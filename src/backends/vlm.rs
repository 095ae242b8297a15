//! OCR through a vision-language model.
//!
//! Each page is sent as a single chat request: the transcription prompt as
//! the system message, the page PNG as the only user attachment. The reply
//! goes through [`clean_ocr_text`] before the quality gate sees it.

use super::encode::encode_page;
use super::postprocess::clean_ocr_text;
use super::prompts::OCR_SYSTEM_PROMPT;
use super::{classify_llm_failure, LlmFailure};
use crate::capability::{OcrCapability, OcrOutput, PageImage};
use crate::error::OcrError;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// [`OcrCapability`] backed by any `edgequake-llm` vision provider.
///
/// The model does not report a confidence, so outputs carry none.
pub struct VisionOcr {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    temperature: f32,
    max_tokens: usize,
}

impl VisionOcr {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            system_prompt: OCR_SYSTEM_PROMPT.to_string(),
            temperature: 0.1,
            max_tokens: 4096,
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

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl OcrCapability for VisionOcr {
    async fn extract_text(&self, page: &PageImage) -> Result<OcrOutput, OcrError> {
        let start = Instant::now();
        let image = encode_page(&page.image)
            .map_err(|e| OcrError::UnreadableImage(format!("page {}: {e}", page.number)))?;

        let messages = vec![
            ChatMessage::system(&self.system_prompt),
            ChatMessage::user_with_images("", vec![image]),
        ];

        let response = self
            .provider
            .chat(&messages, Some(&self.options()))
            .await
            .map_err(|e| to_ocr_error(&e.to_string()))?;

        debug!(
            page = page.number,
            input_tokens = response.prompt_tokens,
            output_tokens = response.completion_tokens,
            duration_ms = start.elapsed().as_millis() as u64,
            "page transcribed"
        );
        Ok(clean_ocr_text(&response.content).into())
    }
}

fn to_ocr_error(message: &str) -> OcrError {
    match classify_llm_failure(message) {
        LlmFailure::RateLimited => OcrError::RateLimited {
            retry_after_secs: None,
        },
        LlmFailure::Transient => OcrError::Unavailable(message.to_string()),
        LlmFailure::Permanent => OcrError::Rejected(message.to_string()),
    }
}
