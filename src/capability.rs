//! Capability traits for the pipeline's external collaborators.
//!
//! The orchestrator depends only on these traits. Production implementations
//! live in [`crate::backends`]; tests substitute in-memory doubles.
//!
//! ```text
//! PageSource ──▶ OcrCapability ──▶ (quality gate) ──▶ RefinementCapability
//!                                                          │
//!                         StorageCapability ◀──────────────┘
//! ```

use crate::document::Document;
use crate::error::{OcrError, RefinementError, SourceError, StorageError};
use async_trait::async_trait;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One rasterised page, ready for OCR.
#[derive(Clone)]
pub struct PageImage {
    /// 1-indexed page number.
    pub number: u32,
    pub image: DynamicImage,
}

impl PageImage {
    pub fn new(number: u32, image: DynamicImage) -> Self {
        Self { number, image }
    }
}

impl fmt::Debug for PageImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageImage")
            .field("number", &self.number)
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .finish()
    }
}

/// Text extracted from one page.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrOutput {
    pub text: String,
    /// Backend confidence in [0, 1], when the backend reports one.
    pub confidence: Option<f64>,
}

impl OcrOutput {
    pub fn with_confidence(text: impl Into<String>, confidence: f64) -> Self {
        Self {
            text: text.into(),
            confidence: Some(confidence),
        }
    }
}

impl From<String> for OcrOutput {
    fn from(text: String) -> Self {
        Self {
            text,
            confidence: None,
        }
    }
}

impl From<&str> for OcrOutput {
    fn from(text: &str) -> Self {
        text.to_string().into()
    }
}

/// Where a persisted document lives (a path, an object key, a row id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageHandle(pub String);

impl fmt::Display for StorageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Turns a source identifier (path or URL) into page images.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Pages in any order; numbers must be exactly `1..=n`.
    async fn pages(&self, source: &str) -> Result<Vec<PageImage>, SourceError>;
}

/// OCR / vision-language extraction for a single page.
#[async_trait]
pub trait OcrCapability: Send + Sync {
    async fn extract_text(&self, page: &PageImage) -> Result<OcrOutput, OcrError>;
}

/// Post-processing of raw OCR text.
#[async_trait]
pub trait RefinementCapability: Send + Sync {
    async fn refine(&self, text: &str) -> Result<String, RefinementError>;

    /// Refine several texts; output order matches input order.
    async fn batch_refine(&self, texts: &[String]) -> Result<Vec<String>, RefinementError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.refine(text).await?);
        }
        Ok(out)
    }
}

/// Durable document persistence.
#[async_trait]
pub trait StorageCapability: Send + Sync {
    async fn save_document(&self, doc: &Document) -> Result<StorageHandle, StorageError>;

    async fn load_document(&self, handle: &StorageHandle) -> Result<Document, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    #[async_trait]
    impl RefinementCapability for Upper {
        async fn refine(&self, text: &str) -> Result<String, RefinementError> {
            if text.is_empty() {
                return Err(RefinementError::Rejected("empty".into()));
            }
            Ok(text.to_uppercase())
        }
    }

    #[tokio::test]
    async fn default_batch_refine_preserves_order() {
        let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let out = Upper.batch_refine(&texts).await.unwrap();
        assert_eq!(out, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn default_batch_refine_stops_on_error() {
        let texts = vec!["a".to_string(), String::new()];
        assert!(Upper.batch_refine(&texts).await.is_err());
    }

    #[test]
    fn ocr_output_from_text_has_no_confidence() {
        let out: OcrOutput = "hello".into();
        assert_eq!(out.confidence, None);
        assert_eq!(OcrOutput::with_confidence("x", 0.8).confidence, Some(0.8));
    }
}
