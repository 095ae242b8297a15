//! Observer trait for pipeline events.
//!
//! Inject an [`Arc<dyn PipelineObserver>`] through
//! [`crate::orchestrator::PipelineOrchestratorBuilder::observer`] to receive
//! events as documents move through the pipeline. Callers can forward them to
//! a progress bar, a metrics registry, or a job table without the library
//! knowing anything about it.
//!
//! Every method has a no-op default so implementations override only what
//! they need. Documents (and pages within a document) are processed
//! concurrently, so methods may be called from several tasks at once.

use std::sync::Arc;
use std::time::Duration;

pub trait PipelineObserver: Send + Sync {
    /// A document entered the pipeline.
    fn on_document_start(&self, source: &str) {
        let _ = source;
    }

    /// The cache held a completed document; OCR was skipped.
    fn on_cache_hit(&self, source: &str, key: &str) {
        let _ = (source, key);
    }

    /// OCR finished for one page.
    fn on_page_extracted(&self, source: &str, page: u32, total_pages: usize) {
        let _ = (source, page, total_pages);
    }

    /// A page failed the quality gate and received refined text.
    fn on_page_refined(&self, source: &str, page: u32) {
        let _ = (source, page);
    }

    /// A retryable failure occurred; the operation will run again after `delay`.
    fn on_retry(&self, operation: &str, attempt: u32, delay: Duration, error: &str) {
        let _ = (operation, attempt, delay, error);
    }

    /// An operation succeeded on an attempt after the first.
    fn on_retry_recovered(&self, operation: &str, attempts: u32) {
        let _ = (operation, attempts);
    }

    /// The document was stored; `refined_pages` counts pages that went through refinement.
    fn on_document_complete(&self, source: &str, pages: usize, refined_pages: usize) {
        let _ = (source, pages, refined_pages);
    }

    /// The document failed; nothing was cached or stored for it.
    fn on_document_failed(&self, source: &str, error: &str) {
        let _ = (source, error);
    }
}

/// Observer that ignores every event. Used when none is configured.
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// Shared observer handle.
pub type SharedObserver = Arc<dyn PipelineObserver>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        retries: AtomicUsize,
        recovered: AtomicUsize,
        failed: AtomicUsize,
    }

    impl PipelineObserver for Counting {
        fn on_retry(&self, _op: &str, _attempt: u32, _delay: Duration, _error: &str) {
            self.retries.fetch_add(1, Ordering::SeqCst);
        }

        fn on_retry_recovered(&self, _op: &str, _attempts: u32) {
            self.recovered.fetch_add(1, Ordering::SeqCst);
        }

        fn on_document_failed(&self, _source: &str, _error: &str) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_observer_does_not_panic() {
        let o = NoopObserver;
        o.on_document_start("a.pdf");
        o.on_cache_hit("a.pdf", "k");
        o.on_page_extracted("a.pdf", 1, 2);
        o.on_page_refined("a.pdf", 2);
        o.on_retry("ocr", 1, Duration::from_millis(10), "timeout");
        o.on_retry_recovered("ocr", 2);
        o.on_document_complete("a.pdf", 2, 1);
        o.on_document_failed("b.pdf", "boom");
    }

    #[test]
    fn overridden_methods_receive_events() {
        let o = Counting::default();
        o.on_retry("ocr", 1, Duration::ZERO, "timeout");
        o.on_retry("ocr", 2, Duration::ZERO, "timeout");
        o.on_retry_recovered("ocr", 3);
        o.on_document_failed("x.pdf", "storage");
        // defaults stay silent
        o.on_page_refined("x.pdf", 1);

        assert_eq!(o.retries.load(Ordering::SeqCst), 2);
        assert_eq!(o.recovered.load(Ordering::SeqCst), 1);
        assert_eq!(o.failed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_observer_works() {
        let o: SharedObserver = Arc::new(NoopObserver);
        o.on_document_start("doc.pdf");
    }
}
