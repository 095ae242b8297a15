//! Per-document pipeline and bounded batch fan-out.
//!
//! ## Per-document flow
//!
//! ```text
//! cache lookup ──hit──▶ return cached Document
//!      │ miss / degraded
//!      ▼
//! PageSource::pages ──▶ OCR (page_concurrency, timeout + retry per page)
//!      ──▶ quality gate ──▶ Document::assemble (page order)
//!      ──▶ batch_refine failing pages (groups of refinement_batch_size)
//!      ──▶ storage (fatal on error) ──▶ cache write (best effort)
//! ```
//!
//! Nothing is written to storage or the cache until every page has been
//! extracted and refined, so a failed or cancelled document never leaves a
//! partial entry behind.

use crate::cache::{derive_key, CacheBackend, CacheLookup, DocumentCache};
use crate::capability::{
    OcrCapability, OcrOutput, PageImage, PageSource, RefinementCapability, StorageCapability,
};
use crate::config::PipelineConfig;
use crate::document::{BatchProcessingResult, Document, Page};
use crate::error::{ConfigurationError, OcrError, PipelineError, RefinementError, SourceError};
use crate::progress::{NoopObserver, SharedObserver};
use crate::quality::QualityAssessor;
use crate::retry::RetryPolicy;
use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Drives documents through extraction, quality gating, refinement,
/// caching and persistence.
///
/// Built with [`PipelineOrchestrator::builder`]. All collaborators are trait
/// objects, so tests can swap any of them for in-memory doubles.
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    assessor: QualityAssessor,
    retry: RetryPolicy,
    page_source: Arc<dyn PageSource>,
    ocr: Arc<dyn OcrCapability>,
    refiner: Arc<dyn RefinementCapability>,
    storage: Arc<dyn StorageCapability>,
    cache: Option<DocumentCache>,
    observer: SharedObserver,
}

impl PipelineOrchestrator {
    pub fn builder() -> PipelineOrchestratorBuilder {
        PipelineOrchestratorBuilder::default()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// `None` when caching is disabled or no backend was supplied.
    pub fn cache(&self) -> Option<&DocumentCache> {
        self.cache.as_ref()
    }

    /// Process a single source (path or URL).
    ///
    /// Returns the stored document, or the error that stopped it. A cached
    /// document is returned without touching OCR, refinement or storage.
    ///
    /// `metadata["location"]` is set from the storage handle after
    /// `save_document` returns. The returned and cached copies carry it; the
    /// persisted copy does not, since its location is wherever it was loaded
    /// from.
    pub async fn process_one(&self, source: &str) -> Result<Document, PipelineError> {
        self.observer.on_document_start(source);
        let result = self.run(source).await;
        if let Err(e) = &result {
            self.observer.on_document_failed(source, &e.to_string());
        }
        result
    }

    /// Process every source with at most `concurrency` documents in flight.
    ///
    /// Never fails as a whole: each document's error is counted in
    /// `failed_documents` and described in `failures`.
    pub async fn process_batch<S: AsRef<str>>(&self, sources: &[S]) -> BatchProcessingResult {
        let mut batch = BatchProcessingResult::start(sources.len());
        info!(
            documents = sources.len(),
            concurrency = self.config.concurrency,
            "starting batch"
        );

        let mut outcomes = stream::iter(sources.iter().map(|s| async move {
            let source = s.as_ref();
            (source.to_string(), self.process_one(source).await)
        }))
        .buffer_unordered(self.config.concurrency.max(1));

        while let Some((source, outcome)) = outcomes.next().await {
            if let Err(e) = &outcome {
                warn!(source = %source, error = %e, "document failed");
            }
            batch.record(source, outcome);
        }

        batch.finish();
        info!(
            total = batch.total_documents,
            processed = batch.processed_documents,
            failed = batch.failed_documents,
            "batch complete"
        );
        batch
    }

    async fn run(&self, source: &str) -> Result<Document, PipelineError> {
        let start = Instant::now();

        // ── Cache check ──────────────────────────────────────────────────
        let key = match &self.cache {
            Some(_) => Some(derive_key(source, self.config.cache_key_mode).await),
            None => None,
        };
        if let (Some(cache), Some(key)) = (&self.cache, key.as_deref()) {
            match cache.lookup(key).await {
                CacheLookup::Hit(doc) => {
                    info!(source, key, pages = doc.pages.len(), "cache hit, skipping OCR");
                    self.observer.on_cache_hit(source, key);
                    return Ok(doc);
                }
                CacheLookup::Miss => debug!(source, key, "cache miss"),
                CacheLookup::Degraded(e) => {
                    warn!(source, error = %e, "cache lookup failed, continuing without cache")
                }
            }
        }

        // ── Extraction + quality gate ────────────────────────────────────
        let images = self.page_source.pages(source).await?;
        if images.is_empty() {
            return Err(SourceError::EmptyDocument {
                path: source.into(),
            }
            .into());
        }
        info!(source, pages = images.len(), "extracting text");
        let pages = self.extract_pages(source, images).await?;
        let mut doc = Document::assemble(document_name(source), pages)?;

        // ── Refinement ───────────────────────────────────────────────────
        self.refine_pages(source, &mut doc).await?;
        let refined = doc.refined_pages();

        doc.metadata.insert("source".into(), json!(source));
        if let Some(key) = &key {
            doc.metadata.insert("cache_key".into(), json!(key));
        }
        doc.metadata
            .insert("processed_at".into(), json!(Utc::now().to_rfc3339()));
        doc.metadata
            .insert("page_count".into(), json!(doc.pages.len()));
        doc.metadata.insert("refined_pages".into(), json!(refined));

        // ── Persist, then cache ──────────────────────────────────────────
        let location = self.storage.save_document(&doc).await?;
        doc.metadata
            .insert("location".into(), json!(location.to_string()));

        if let (Some(cache), Some(key)) = (&self.cache, key.as_deref()) {
            if let Err(e) = cache.store(key, &doc).await {
                warn!(source, key, error = %e, "cache write failed");
            }
        }

        info!(
            source,
            pages = doc.pages.len(),
            refined,
            location = %location,
            duration_ms = start.elapsed().as_millis() as u64,
            "document processed"
        );
        self.observer
            .on_document_complete(source, doc.pages.len(), refined);
        Ok(doc)
    }

    /// OCR and score every page. Stops at the first page that fails for good.
    async fn extract_pages(
        &self,
        source: &str,
        images: Vec<PageImage>,
    ) -> Result<Vec<Page>, PipelineError> {
        let total = images.len();
        stream::iter(images.into_iter().map(|image| async move {
            let number = image.number;
            let output = self
                .extract_one(&image)
                .await
                .map_err(|e| PipelineError::Ocr {
                    page: number,
                    source: e,
                })?;

            let confidence = output
                .confidence
                .or(self.config.quality.unreported_confidence);
            let metrics = self
                .assessor
                .try_assess(&output.text, confidence)
                .map_err(|e| PipelineError::Quality {
                    page: number,
                    source: e,
                })?;
            debug!(
                source,
                page = number,
                confidence = metrics.confidence_score,
                words = metrics.word_count,
                corrupted = metrics.has_corrupted_output,
                "page scored"
            );
            self.observer.on_page_extracted(source, number, total);

            let mut page = Page::new(number, output.text);
            page.metrics = Some(metrics);
            Ok::<_, PipelineError>(page)
        }))
        .buffer_unordered(self.config.page_concurrency.max(1))
        .try_collect()
        .await
    }

    async fn extract_one(&self, image: &PageImage) -> Result<OcrOutput, OcrError> {
        let timeout = self.config.ocr_timeout;
        let operation = format!("ocr page {}", image.number);
        self.retry
            .run(&operation, |_| async move {
                match tokio::time::timeout(timeout, self.ocr.extract_text(image)).await {
                    Ok(result) => result,
                    Err(_) => Err(OcrError::Timeout {
                        elapsed_ms: timeout.as_millis() as u64,
                    }),
                }
            })
            .await
    }

    /// Send every page that fails the quality gate through the refiner.
    ///
    /// Groups run concurrently but are reassembled in page order.
    async fn refine_pages(&self, source: &str, doc: &mut Document) -> Result<(), PipelineError> {
        let pending: Vec<(u32, String)> = doc
            .pages
            .iter()
            .filter(|p| {
                p.metrics
                    .as_ref()
                    .is_some_and(|m| self.assessor.should_retry(m))
            })
            .map(|p| (p.number, p.raw_text.clone()))
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        info!(source, pages = pending.len(), "refining low-quality pages");

        let groups: Vec<Vec<(u32, String)>> = pending
            .chunks(self.config.refinement_batch_size.max(1))
            .map(<[_]>::to_vec)
            .collect();

        let refined: Vec<Vec<(u32, String)>> =
            stream::iter(groups.into_iter().map(|group| self.refine_numbered(group)))
                .buffered(self.config.page_concurrency.max(1))
                .try_collect()
                .await?;

        for (number, text) in refined.into_iter().flatten() {
            if let Some(page) = doc.pages.get_mut(number as usize - 1) {
                page.refined_text = Some(text);
                self.observer.on_page_refined(source, number);
            }
        }
        Ok(())
    }

    /// Refine one group, keeping each result paired with its page number.
    async fn refine_numbered(
        &self,
        group: Vec<(u32, String)>,
    ) -> Result<Vec<(u32, String)>, PipelineError> {
        let (numbers, texts): (Vec<u32>, Vec<String>) = group.into_iter().unzip();
        match self.refine_group(&texts).await {
            Ok(out) => Ok(numbers.into_iter().zip(out).collect()),
            Err(e) => Err(PipelineError::Refinement {
                pages: numbers,
                source: e,
            }),
        }
    }

    async fn refine_group(&self, texts: &[String]) -> Result<Vec<String>, RefinementError> {
        let timeout = self.config.refine_timeout;
        let out = self
            .retry
            .run("refine", |_| async move {
                match tokio::time::timeout(timeout, self.refiner.batch_refine(texts)).await {
                    Ok(result) => result,
                    Err(_) => Err(RefinementError::Timeout {
                        elapsed_ms: timeout.as_millis() as u64,
                    }),
                }
            })
            .await?;
        if out.len() != texts.len() {
            return Err(RefinementError::LengthMismatch {
                expected: texts.len(),
                got: out.len(),
            });
        }
        Ok(out)
    }
}

/// Last path or URL segment, falling back to the source itself.
fn document_name(source: &str) -> String {
    let trimmed = source.split(['?', '#']).next().unwrap_or(source);
    Path::new(trimmed)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| source.to_string())
}

/// Builder for [`PipelineOrchestrator`].
///
/// Page source, OCR, refiner and storage are required; the cache and the
/// observer are optional.
#[derive(Default)]
pub struct PipelineOrchestratorBuilder {
    config: Option<PipelineConfig>,
    page_source: Option<Arc<dyn PageSource>>,
    ocr: Option<Arc<dyn OcrCapability>>,
    refiner: Option<Arc<dyn RefinementCapability>>,
    storage: Option<Arc<dyn StorageCapability>>,
    cache: Option<Arc<dyn CacheBackend>>,
    observer: Option<SharedObserver>,
}

impl PipelineOrchestratorBuilder {
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn page_source(mut self, source: Arc<dyn PageSource>) -> Self {
        self.page_source = Some(source);
        self
    }

    pub fn ocr(mut self, ocr: Arc<dyn OcrCapability>) -> Self {
        self.ocr = Some(ocr);
        self
    }

    pub fn refiner(mut self, refiner: Arc<dyn RefinementCapability>) -> Self {
        self.refiner = Some(refiner);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn StorageCapability>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Ignored when `cache_enabled` is false.
    pub fn cache(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.cache = Some(backend);
        self
    }

    pub fn observer(mut self, observer: SharedObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> Result<PipelineOrchestrator, ConfigurationError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let observer = self
            .observer
            .unwrap_or_else(|| Arc::new(NoopObserver) as SharedObserver);
        let cache = match self.cache {
            Some(backend) if config.cache_enabled => {
                Some(DocumentCache::new(backend, config.cache_ttl))
            }
            _ => None,
        };

        Ok(PipelineOrchestrator {
            assessor: QualityAssessor::new(config.quality.clone()),
            retry: RetryPolicy::from_settings(&config.retry).with_observer(Arc::clone(&observer)),
            page_source: self
                .page_source
                .ok_or(ConfigurationError::MissingCollaborator("page source"))?,
            ocr: self
                .ocr
                .ok_or(ConfigurationError::MissingCollaborator("OCR"))?,
            refiner: self
                .refiner
                .ok_or(ConfigurationError::MissingCollaborator("refinement"))?,
            storage: self
                .storage
                .ok_or(ConfigurationError::MissingCollaborator("storage"))?,
            cache,
            observer,
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::StorageHandle;
    use crate::error::StorageError;
    use async_trait::async_trait;

    struct Nothing;

    #[async_trait]
    impl PageSource for Nothing {
        async fn pages(&self, _source: &str) -> Result<Vec<PageImage>, SourceError> {
            Ok(Vec::new())
        }
    }

    #[async_trait]
    impl OcrCapability for Nothing {
        async fn extract_text(&self, _page: &PageImage) -> Result<OcrOutput, OcrError> {
            Ok("".into())
        }
    }

    #[async_trait]
    impl RefinementCapability for Nothing {
        async fn refine(&self, text: &str) -> Result<String, RefinementError> {
            Ok(text.to_string())
        }
    }

    #[async_trait]
    impl StorageCapability for Nothing {
        async fn save_document(&self, doc: &Document) -> Result<StorageHandle, StorageError> {
            Ok(StorageHandle(doc.name.clone()))
        }
        async fn load_document(&self, handle: &StorageHandle) -> Result<Document, StorageError> {
            Err(StorageError::NotFound(handle.to_string()))
        }
    }

    fn full_builder() -> PipelineOrchestratorBuilder {
        let n = Arc::new(Nothing);
        PipelineOrchestrator::builder()
            .page_source(n.clone())
            .ocr(n.clone())
            .refiner(n.clone())
            .storage(n)
    }

    #[test]
    fn missing_collaborator_is_a_configuration_error() {
        let err = PipelineOrchestrator::builder()
            .ocr(Arc::new(Nothing))
            .build()
            .err()
            .unwrap();
        assert_eq!(err, ConfigurationError::MissingCollaborator("page source"));

        let err = PipelineOrchestrator::builder()
            .page_source(Arc::new(Nothing))
            .ocr(Arc::new(Nothing))
            .refiner(Arc::new(Nothing))
            .build()
            .err()
            .unwrap();
        assert_eq!(err, ConfigurationError::MissingCollaborator("storage"));
    }

    #[test]
    fn invalid_config_is_rejected_at_build() {
        let mut config = PipelineConfig::default();
        config.concurrency = 0;
        assert!(matches!(
            full_builder().config(config).build(),
            Err(ConfigurationError::Invalid(_))
        ));
    }

    #[test]
    fn unbounded_cache_ttl_is_rejected_at_build() {
        let mut config = PipelineConfig::default();
        config.cache_ttl = std::time::Duration::from_secs(u64::MAX);
        assert!(matches!(
            full_builder().config(config).build(),
            Err(ConfigurationError::Invalid(_))
        ));
    }

    #[test]
    fn disabled_cache_drops_backend() {
        let mut config = PipelineConfig::default();
        config.cache_enabled = false;
        let orch = full_builder()
            .config(config)
            .cache(Arc::new(crate::cache::MemoryCache::new()))
            .build()
            .unwrap();
        assert!(orch.cache().is_none());

        let orch = full_builder()
            .cache(Arc::new(crate::cache::MemoryCache::new()))
            .build()
            .unwrap();
        assert!(orch.cache().is_some());
    }

    #[tokio::test]
    async fn empty_source_fails() {
        let orch = full_builder().build().unwrap();
        let err = orch.process_one("empty.pdf").await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Source(SourceError::EmptyDocument { .. })
        ));
    }

    #[test]
    fn document_names() {
        assert_eq!(document_name("/data/scans/report.pdf"), "report.pdf");
        assert_eq!(
            document_name("https://example.org/papers/a.pdf?dl=1"),
            "a.pdf"
        );
        assert_eq!(document_name("plain"), "plain");
    }
}
