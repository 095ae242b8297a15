//! Output types: pages, documents, and batch results.

use crate::config::PageSeparator;
use crate::error::PipelineError;
use crate::quality::QualityMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One OCR'd page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// 1-indexed page number.
    pub number: u32,

    /// Text exactly as the OCR backend produced it.
    pub raw_text: String,

    /// Set only when the page failed the quality gate and was refined.
    pub refined_text: Option<String>,

    /// Quality-gate scores for `raw_text`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<QualityMetrics>,
}

impl Page {
    pub fn new(number: u32, raw_text: impl Into<String>) -> Self {
        Self {
            number,
            raw_text: raw_text.into(),
            refined_text: None,
            metrics: None,
        }
    }

    /// Best available text: refined if present, raw otherwise.
    pub fn text(&self) -> &str {
        self.refined_text.as_deref().unwrap_or(&self.raw_text)
    }

    pub fn was_refined(&self) -> bool {
        self.refined_text.is_some()
    }
}

/// A processed source document.
///
/// Pages are always ordered by page number, numbered contiguously from 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub name: String,
    pub pages: Vec<Page>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Document {
    /// Build a document from pages that may arrive in any order.
    ///
    /// Fails unless the page numbers are exactly `1..=pages.len()`.
    pub fn assemble(name: impl Into<String>, mut pages: Vec<Page>) -> Result<Self, PipelineError> {
        let name = name.into();
        pages.sort_by_key(|p| p.number);
        for (idx, page) in pages.iter().enumerate() {
            let expected = idx as u32 + 1;
            if page.number != expected {
                return Err(PipelineError::InvalidDocument {
                    name,
                    detail: format!(
                        "expected page {expected} at position {}, found page {}",
                        idx, page.number
                    ),
                });
            }
        }
        Ok(Self {
            name,
            pages,
            metadata: Map::new(),
        })
    }

    pub fn page(&self, number: u32) -> Option<&Page> {
        number
            .checked_sub(1)
            .and_then(|i| self.pages.get(i as usize))
    }

    pub fn refined_pages(&self) -> usize {
        self.pages.iter().filter(|p| p.was_refined()).count()
    }

    /// Join the best text of every page with `separator`.
    pub fn to_markdown(&self, separator: &PageSeparator) -> String {
        let mut out = String::new();
        for (i, page) in self.pages.iter().enumerate() {
            if i > 0 {
                out.push_str(&separator.render(page.number));
            }
            out.push_str(page.text().trim_end());
        }
        out.push('\n');
        out
    }

    /// Plain text with pages separated by form feeds.
    pub fn to_text(&self) -> String {
        self.pages
            .iter()
            .map(|p| p.text().trim_end())
            .collect::<Vec<_>>()
            .join("\n\u{000C}\n")
    }
}

/// Why one document in a batch failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFailure {
    pub source: String,
    pub error: String,
}

/// Aggregate outcome of [`crate::orchestrator::PipelineOrchestrator::process_batch`].
///
/// Once `completed_at` is set, `processed_documents + failed_documents ==
/// total_documents`. The order of `documents` is unspecified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchProcessingResult {
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_documents: usize,
    pub processed_documents: usize,
    pub failed_documents: usize,
    pub documents: Vec<Document>,
    /// Per-document error details, for diagnostics.
    #[serde(default)]
    pub failures: Vec<DocumentFailure>,
}

impl BatchProcessingResult {
    pub(crate) fn start(total_documents: usize) -> Self {
        Self {
            started_at: Utc::now(),
            completed_at: None,
            total_documents,
            processed_documents: 0,
            failed_documents: 0,
            documents: Vec::with_capacity(total_documents),
            failures: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, source: String, outcome: Result<Document, PipelineError>) {
        match outcome {
            Ok(doc) => {
                self.processed_documents += 1;
                self.documents.push(doc);
            }
            Err(e) => {
                self.failed_documents += 1;
                self.failures.push(DocumentFailure {
                    source,
                    error: e.to_string(),
                });
            }
        }
    }

    pub(crate) fn finish(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Counts add up (only meaningful once complete).
    pub fn is_consistent(&self) -> bool {
        self.processed_documents + self.failed_documents == self.total_documents
            && self.documents.len() == self.processed_documents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OcrError;

    #[test]
    fn assemble_sorts_out_of_order_pages() {
        let pages = vec![Page::new(3, "c"), Page::new(1, "a"), Page::new(2, "b")];
        let doc = Document::assemble("doc.pdf", pages).unwrap();
        let numbers: Vec<u32> = doc.pages.iter().map(|p| p.number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(doc.page(2).unwrap().raw_text, "b");
        assert!(doc.page(0).is_none());
        assert!(doc.page(4).is_none());
    }

    #[test]
    fn assemble_rejects_gaps_and_duplicates() {
        let gap = vec![Page::new(1, "a"), Page::new(3, "c")];
        assert!(matches!(
            Document::assemble("gap.pdf", gap),
            Err(PipelineError::InvalidDocument { .. })
        ));

        let dup = vec![Page::new(1, "a"), Page::new(1, "a again")];
        assert!(Document::assemble("dup.pdf", dup).is_err());

        let zero = vec![Page::new(0, "zero")];
        assert!(Document::assemble("zero.pdf", zero).is_err());
    }

    #[test]
    fn page_text_prefers_refined() {
        let mut p = Page::new(1, "raw");
        assert_eq!(p.text(), "raw");
        p.refined_text = Some("refined".into());
        assert_eq!(p.text(), "refined");
        assert!(p.was_refined());
    }

    #[test]
    fn markdown_joins_pages() {
        let mut second = Page::new(2, "garbled");
        second.refined_text = Some("second page".into());
        let doc = Document::assemble("d.pdf", vec![Page::new(1, "first page\n"), second]).unwrap();
        assert_eq!(
            doc.to_markdown(&PageSeparator::HorizontalRule),
            "first page\n\n---\n\nsecond page\n"
        );
        assert_eq!(doc.to_text(), "first page\n\u{000C}\nsecond page");
        assert_eq!(doc.refined_pages(), 1);
    }

    #[test]
    fn json_round_trip_keeps_null_refined_text() {
        let doc = Document::assemble("d.pdf", vec![Page::new(1, "hello")]).unwrap();
        let json = serde_json::to_value(&doc).unwrap();
        assert!(json["pages"][0]["refined_text"].is_null());
        let back: Document = serde_json::from_value(json).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn batch_counts_add_up() {
        let mut batch = BatchProcessingResult::start(3);
        assert!(!batch.is_complete());
        let doc = Document::assemble("a.pdf", vec![Page::new(1, "a")]).unwrap();
        batch.record("a.pdf".into(), Ok(doc.clone()));
        batch.record("b.pdf".into(), Ok(doc));
        batch.record(
            "c.pdf".into(),
            Err(PipelineError::Ocr {
                page: 1,
                source: OcrError::Rejected("bad".into()),
            }),
        );
        batch.finish();
        assert!(batch.is_complete());
        assert!(batch.is_consistent());
        assert_eq!(batch.failed_documents, 1);
        assert_eq!(batch.failures[0].source, "c.pdf");
        assert!(batch.failures[0].error.contains("page 1"));
    }
}
