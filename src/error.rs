//! Error types for the ocrflow pipeline.
//!
//! Failures live at three different scopes, and each scope has its own type:
//!
//! * **Page-scoped** collaborator failures: [`OcrError`] and
//!   [`RefinementError`]. These carry a retry classification (see
//!   [`Retryable`]) so the [`crate::retry::RetryPolicy`] can decide whether
//!   another attempt has a chance of succeeding.
//!
//! * **Document-fatal** failures: [`PipelineError`]. Returned from
//!   [`crate::orchestrator::PipelineOrchestrator::process_one`]; inside a batch
//!   they are caught at the per-document boundary and counted.
//!
//! * **Degraded-mode** conditions: [`CacheError`]. The orchestrator logs them
//!   and carries on as if the cache had missed.
//!
//! A low quality score is not an error at all. It is a routing decision made
//! by [`crate::quality::QualityAssessor::should_retry`].

use std::path::PathBuf;
use thiserror::Error;

/// Classifies a failure as transient (worth another attempt) or structural.
pub trait Retryable {
    /// `true` when repeating the same operation may succeed.
    fn is_retryable(&self) -> bool;
}

// ── Page-scoped collaborator errors ──────────────────────────────────────

/// Failure of the OCR capability for a single page image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OcrError {
    /// The call did not finish within the configured timeout.
    #[error("OCR call timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// Backend overloaded, 5xx, connection reset.
    #[error("OCR backend unavailable: {0}")]
    Unavailable(String),

    /// Backend asked us to slow down (HTTP 429).
    #[error("OCR backend rate limit exceeded")]
    RateLimited { retry_after_secs: Option<u64> },

    /// The page image could not be decoded or encoded for the backend.
    #[error("page image is unreadable: {0}")]
    UnreadableImage(String),

    /// The backend refused the request (bad credentials, invalid payload).
    #[error("OCR backend rejected the request: {0}")]
    Rejected(String),
}

impl Retryable for OcrError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            OcrError::Timeout { .. } | OcrError::Unavailable(_) | OcrError::RateLimited { .. }
        )
    }
}

/// Failure of the text-refinement capability.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefinementError {
    #[error("refinement call timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("refinement backend unavailable: {0}")]
    Unavailable(String),

    #[error("refinement backend rate limit exceeded")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("refinement backend rejected the request: {0}")]
    Rejected(String),

    /// `batch_refine` must return exactly one text per input text.
    #[error("batch refinement returned {got} texts for {expected} inputs")]
    LengthMismatch { expected: usize, got: usize },
}

impl Retryable for RefinementError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            RefinementError::Timeout { .. }
                | RefinementError::Unavailable(_)
                | RefinementError::RateLimited { .. }
        )
    }
}

/// Unrecoverable fault while scoring text.
///
/// Never raised for low-quality text; only for inputs the assessor cannot
/// score at all.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QualityError {
    #[error("confidence {0} is outside [0, 1]")]
    InvalidConfidence(f64),
}

impl Retryable for QualityError {
    fn is_retryable(&self) -> bool {
        false
    }
}

// ── Collaborator errors that are fatal or degraded ───────────────────────

/// Persistence failure. Always document-fatal.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("document serialisation failed: {0}")]
    Serialization(String),

    #[error("no stored document at '{0}'")]
    NotFound(String),
}

impl Retryable for StorageError {
    fn is_retryable(&self) -> bool {
        false
    }
}

/// Cache backend failure. Degraded mode, never fatal to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("cache payload could not be (de)serialised: {0}")]
    Serialization(String),

    #[error("cache backend error: {0}")]
    Backend(String),
}

/// Failure resolving or rasterising a source document.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    #[error("permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    #[error("failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    #[error("file is not a valid PDF: '{path}' (first bytes: {magic:?})")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    #[error("PDF '{path}' is encrypted and requires a password")]
    PasswordRequired { path: PathBuf },

    #[error("wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    #[error("rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: u32, detail: String },

    #[error("'{path}' has no pages")]
    EmptyDocument { path: PathBuf },

    #[error("failed to bind to pdfium library: {0}")]
    PdfiumBindingFailed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Invalid settings or missing collaborators. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("pipeline is missing its {0} collaborator")]
    MissingCollaborator(&'static str),

    /// An LLM provider could not be created.
    #[error("LLM provider '{provider}' is not configured: {hint}")]
    Provider { provider: String, hint: String },
}

// ── Document-level error ─────────────────────────────────────────────────

/// A failure that aborts processing of one document.
///
/// No partial document is cached or persisted when this is returned.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("page {page}: OCR failed: {source}")]
    Ocr {
        page: u32,
        #[source]
        source: OcrError,
    },

    #[error("pages {pages:?}: refinement failed: {source}")]
    Refinement {
        pages: Vec<u32>,
        #[source]
        source: RefinementError,
    },

    #[error("page {page}: {source}")]
    Quality {
        page: u32,
        #[source]
        source: QualityError,
    },

    #[error("storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Page numbering broke the "unique and contiguous from 1" rule.
    #[error("invalid document '{name}': {detail}")]
    InvalidDocument { name: String, detail: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Page numbers this error is scoped to, if any.
    pub fn pages(&self) -> Vec<u32> {
        match self {
            PipelineError::Ocr { page, .. } | PipelineError::Quality { page, .. } => vec![*page],
            PipelineError::Refinement { pages, .. } => pages.clone(),
            PipelineError::Source(SourceError::RasterisationFailed { page, .. }) => vec![*page],
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ocr_classification() {
        assert!(OcrError::Timeout { elapsed_ms: 10 }.is_retryable());
        assert!(OcrError::Unavailable("503".into()).is_retryable());
        assert!(OcrError::RateLimited {
            retry_after_secs: None
        }
        .is_retryable());
        assert!(!OcrError::UnreadableImage("bad png".into()).is_retryable());
        assert!(!OcrError::Rejected("401".into()).is_retryable());
    }

    #[test]
    fn refinement_classification() {
        assert!(RefinementError::Timeout { elapsed_ms: 5 }.is_retryable());
        assert!(!RefinementError::LengthMismatch {
            expected: 3,
            got: 2
        }
        .is_retryable());
    }

    #[test]
    fn ocr_error_display_carries_page() {
        let e = PipelineError::Ocr {
            page: 4,
            source: OcrError::Timeout { elapsed_ms: 5000 },
        };
        let msg = e.to_string();
        assert!(msg.contains("page 4"), "got: {msg}");
        assert!(msg.contains("5000ms"), "got: {msg}");
        assert_eq!(e.pages(), vec![4]);
    }

    #[test]
    fn refinement_error_lists_pages() {
        let e = PipelineError::Refinement {
            pages: vec![2, 5],
            source: RefinementError::Rejected("content filter".into()),
        };
        assert!(e.to_string().contains("[2, 5]"));
        assert_eq!(e.pages(), vec![2, 5]);
    }

    #[test]
    fn configuration_error_display() {
        let e = PipelineError::from(ConfigurationError::MissingCollaborator("storage"));
        assert!(e.to_string().contains("storage"));
    }
}
