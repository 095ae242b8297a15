//! Production collaborators for the pipeline.
//!
//! ```text
//! input ──▶ render ──────▶ vlm ──────▶ refine ──────▶ storage
//! (path/URL) (pdfium)    (encode +     (chat LLM)    (JSON + md/txt)
//!                         postprocess)
//! ```
//!
//! - [`PdfiumPageSource`]: resolves the source and rasterises every page
//! - [`VisionOcr`]: transcribes a page image with a vision-language model
//! - [`LlmRefiner`]: repairs low-quality text with a chat model
//! - [`FileStorage`]: persists documents under an output directory

pub mod encode;
pub mod input;
pub mod postprocess;
pub mod prompts;
pub mod refine;
pub mod render;
pub mod storage;
pub mod vlm;

pub use refine::LlmRefiner;
pub use render::PdfiumPageSource;
pub use storage::FileStorage;
pub use vlm::VisionOcr;

use crate::error::ConfigurationError;
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::sync::Arc;

/// How a provider error should be treated by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LlmFailure {
    RateLimited,
    Transient,
    Permanent,
}

/// Classify a provider error from its message.
///
/// Provider crates report HTTP status and transport failures as text, so the
/// status code or a well-known phrase is the only portable signal.
pub(crate) fn classify_llm_failure(message: &str) -> LlmFailure {
    let m = message.to_lowercase();
    if m.contains("429") || m.contains("rate limit") || m.contains("too many requests") {
        return LlmFailure::RateLimited;
    }
    const TRANSIENT: &[&str] = &[
        "500",
        "502",
        "503",
        "504",
        "timeout",
        "timed out",
        "overloaded",
        "unavailable",
        "connection",
        "network",
        "temporarily",
    ];
    if TRANSIENT.iter().any(|needle| m.contains(needle)) {
        LlmFailure::Transient
    } else {
        LlmFailure::Permanent
    }
}

/// Resolve an LLM provider.
///
/// 1. `provider` + `model` given: that provider.
/// 2. `EDGEQUAKE_LLM_PROVIDER` and `EDGEQUAKE_MODEL` both set: that pair.
/// 3. `OPENAI_API_KEY` set: OpenAI with `model` or `gpt-4.1-nano`.
/// 4. Otherwise whatever `ProviderFactory::from_env` detects.
pub fn resolve_provider(
    provider: Option<&str>,
    model: Option<&str>,
) -> Result<Arc<dyn LLMProvider>, ConfigurationError> {
    let default_model = model.unwrap_or("gpt-4.1-nano");
    if let Some(name) = provider {
        return create(name, default_model);
    }

    if let (Ok(name), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !name.is_empty() && !env_model.is_empty() {
            return create(&name, &env_model);
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        return create("openai", default_model);
    }

    ProviderFactory::from_env()
        .map(|(llm, _embedding)| llm)
        .map_err(|e| ConfigurationError::Provider {
            provider: "auto".to_string(),
            hint: format!(
                "nothing detected from the environment; set OPENAI_API_KEY, \
                 ANTHROPIC_API_KEY or EDGEQUAKE_LLM_PROVIDER ({e})"
            ),
        })
}

fn create(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, ConfigurationError> {
    ProviderFactory::create_llm_provider(name, model).map_err(|e| ConfigurationError::Provider {
        provider: name.to_string(),
        hint: e.to_string(),
    })
}
