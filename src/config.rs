//! Configuration types for the digitisation pipeline.
//!
//! Every knob lives in [`PipelineConfig`], built once at process start via
//! [`PipelineConfigBuilder`] and handed to the orchestrator by value. There is
//! no global settings object: two orchestrators with different configs can
//! run side by side in one process.
//!
//! # Example
//! ```rust
//! use ocrflow::PipelineConfig;
//! use std::time::Duration;
//!
//! let config = PipelineConfig::builder()
//!     .min_confidence(0.8)
//!     .max_attempts(5)
//!     .base_delay(Duration::from_millis(250))
//!     .concurrency(8)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.retry.max_attempts, 5);
//! ```

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A contiguous Unicode range whose long runs signal OCR hallucination.
///
/// Vision models hallucinate in model-specific ways; the default matches the
/// Hangul-syllable failure mode of Donut-style encoders. Swap it (or disable it
/// with `None`) when a different OCR backend is in use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptBlock {
    /// Human-readable label used in logs.
    pub name: String,
    /// First code point of the block (inclusive).
    pub start: char,
    /// Last code point of the block (inclusive).
    pub end: char,
    /// Consecutive in-block characters that count as corruption.
    pub min_run: usize,
}

impl ScriptBlock {
    /// Hangul syllables U+AC00–U+D7A3, 10 characters in a row.
    pub fn hangul() -> Self {
        Self {
            name: "hangul".to_string(),
            start: '\u{AC00}',
            end: '\u{D7A3}',
            min_run: 10,
        }
    }

    pub fn contains(&self, c: char) -> bool {
        (self.start..=self.end).contains(&c)
    }
}

/// Thresholds used by [`crate::quality::QualityAssessor::should_retry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityThresholds {
    /// Pages scoring below this confidence are refined. Default: 0.7.
    pub min_confidence: f64,

    /// Pages whose special-character ratio exceeds this are refined. Default: 0.3.
    pub max_special_char_ratio: f64,

    /// Pages with fewer whitespace-delimited words are refined. Default: 5.
    pub min_word_count: usize,

    /// Script-block hallucination check. Default: [`ScriptBlock::hangul`].
    pub script_block: Option<ScriptBlock>,

    /// Confidence the orchestrator scores a page with when the OCR backend
    /// reports none. Default: `Some(1.0)`, so the gate decides on the text
    /// alone. `None` falls through to the assessor's 0.5 default, which sends
    /// every unscored page to refinement.
    pub unreported_confidence: Option<f64>,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_confidence: 0.7,
            max_special_char_ratio: 0.3,
            min_word_count: 5,
            script_block: Some(ScriptBlock::hangul()),
            unreported_confidence: Some(1.0),
        }
    }
}

/// Parameters for [`crate::retry::RetryPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts including the first one. Default: 3.
    pub max_attempts: u32,

    /// Wait before attempt 2; doubles for every later attempt. Default: 1s.
    pub base_delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// What the cache key of a source is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CacheKeyMode {
    /// Hash of the file bytes; renamed copies share one entry. (default)
    ///
    /// Falls back to [`CacheKeyMode::Path`] for URLs and unreadable paths.
    #[default]
    Content,
    /// Hash of the source path, canonicalised when it exists locally.
    Path,
}

/// Longest accepted `cache_ttl`: ten years.
pub const MAX_CACHE_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Configuration for one [`crate::orchestrator::PipelineOrchestrator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub quality: QualityThresholds,

    pub retry: RetrySettings,

    /// Consult and populate the cache. Default: true.
    pub cache_enabled: bool,

    /// Lifetime of cached documents. Default: 24h.
    pub cache_ttl: Duration,

    pub cache_key_mode: CacheKeyMode,

    /// Pages per `batch_refine` call. Default: 5.
    pub refinement_batch_size: usize,

    /// Documents processed at once by `process_batch`. Default: 4.
    pub concurrency: usize,

    /// OCR calls in flight for one document. Default: 4.
    pub page_concurrency: usize,

    /// Upper bound on one OCR call. Default: 60s.
    pub ocr_timeout: Duration,

    /// Upper bound on one refinement call. Default: 60s.
    pub refine_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            quality: QualityThresholds::default(),
            retry: RetrySettings::default(),
            cache_enabled: true,
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            cache_key_mode: CacheKeyMode::default(),
            refinement_batch_size: 5,
            concurrency: 4,
            page_concurrency: 4,
            ocr_timeout: Duration::from_secs(60),
            refine_timeout: Duration::from_secs(60),
        }
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Check every invariant the pipeline relies on.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let q = &self.quality;
        for (name, v) in [
            ("min_confidence", q.min_confidence),
            ("max_special_char_ratio", q.max_special_char_ratio),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(ConfigurationError::Invalid(format!(
                    "{name} must be within [0, 1], got {v}"
                )));
            }
        }
        if let Some(c) = q.unreported_confidence {
            if !(0.0..=1.0).contains(&c) {
                return Err(ConfigurationError::Invalid(format!(
                    "unreported_confidence must be within [0, 1], got {c}"
                )));
            }
        }
        if let Some(block) = &q.script_block {
            if block.start > block.end {
                return Err(ConfigurationError::Invalid(format!(
                    "script block '{}' has an empty range",
                    block.name
                )));
            }
            if block.min_run == 0 {
                return Err(ConfigurationError::Invalid(format!(
                    "script block '{}' needs min_run ≥ 1",
                    block.name
                )));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigurationError::Invalid("max_attempts must be ≥ 1".into()));
        }
        if self.refinement_batch_size == 0 {
            return Err(ConfigurationError::Invalid(
                "refinement_batch_size must be ≥ 1".into(),
            ));
        }
        if self.concurrency == 0 || self.page_concurrency == 0 {
            return Err(ConfigurationError::Invalid("concurrency must be ≥ 1".into()));
        }
        if self.ocr_timeout.is_zero() || self.refine_timeout.is_zero() {
            return Err(ConfigurationError::Invalid("timeouts must be non-zero".into()));
        }
        if self.cache_ttl.is_zero() || self.cache_ttl > MAX_CACHE_TTL {
            return Err(ConfigurationError::Invalid(format!(
                "cache_ttl must be within (0, {}s], got {}s",
                MAX_CACHE_TTL.as_secs(),
                self.cache_ttl.as_secs()
            )));
        }
        Ok(())
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn quality(mut self, thresholds: QualityThresholds) -> Self {
        self.config.quality = thresholds;
        self
    }

    pub fn min_confidence(mut self, v: f64) -> Self {
        self.config.quality.min_confidence = v;
        self
    }

    pub fn max_special_char_ratio(mut self, v: f64) -> Self {
        self.config.quality.max_special_char_ratio = v;
        self
    }

    pub fn min_word_count(mut self, n: usize) -> Self {
        self.config.quality.min_word_count = n;
        self
    }

    pub fn script_block(mut self, block: Option<ScriptBlock>) -> Self {
        self.config.quality.script_block = block;
        self
    }

    pub fn unreported_confidence(mut self, v: Option<f64>) -> Self {
        self.config.quality.unreported_confidence = v;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.retry.max_attempts = n;
        self
    }

    pub fn base_delay(mut self, d: Duration) -> Self {
        self.config.retry.base_delay = d;
        self
    }

    pub fn cache_enabled(mut self, v: bool) -> Self {
        self.config.cache_enabled = v;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttl = ttl;
        self
    }

    pub fn cache_key_mode(mut self, mode: CacheKeyMode) -> Self {
        self.config.cache_key_mode = mode;
        self
    }

    pub fn refinement_batch_size(mut self, n: usize) -> Self {
        self.config.refinement_batch_size = n;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn page_concurrency(mut self, n: usize) -> Self {
        self.config.page_concurrency = n;
        self
    }

    pub fn ocr_timeout(mut self, d: Duration) -> Self {
        self.config.ocr_timeout = d;
        self
    }

    pub fn refine_timeout(mut self, d: Duration) -> Self {
        self.config.refine_timeout = d;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, ConfigurationError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Output enums ─────────────────────────────────────────────────────────

/// Extra rendering written next to the JSON document by file storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    /// JSON only. (default)
    #[default]
    Json,
    /// JSON plus `<name>.md`.
    Markdown,
    /// JSON plus `<name>.txt`.
    Text,
}

/// How to separate pages when a document is rendered as one string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSeparator {
    /// Pages joined with "\n\n". (default)
    #[default]
    None,
    /// Horizontal rule: "\n\n---\n\n"
    HorizontalRule,
    /// HTML comment with page number: "<!-- page N -->"
    Comment,
    /// Custom string inserted between pages.
    Custom(String),
}

impl PageSeparator {
    /// Render the separator placed before `page_num` (1-indexed).
    pub fn render(&self, page_num: u32) -> String {
        match self {
            PageSeparator::None => "\n\n".to_string(),
            PageSeparator::HorizontalRule => "\n\n---\n\n".to_string(),
            PageSeparator::Comment => format!("\n\n<!-- page {} -->\n\n", page_num),
            PageSeparator::Custom(s) => format!("\n\n{}\n\n", s),
        }
    }
}
