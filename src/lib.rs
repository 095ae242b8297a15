//! # ocrflow
//!
//! Document digitisation pipeline: PDF pages go through OCR, a quality gate
//! decides which pages need repair, an LLM refines those, and the finished
//! document is cached and persisted.
//!
//! ## Pipeline Overview
//!
//! ```text
//! source (path / URL)
//!  │
//!  ├─ 1. Cache     hit? return the stored Document, no OCR at all
//!  ├─ 2. Render    PageSource rasterises every page
//!  ├─ 3. OCR       OcrCapability per page (bounded concurrency, timeout, retry)
//!  ├─ 4. Gate      QualityAssessor scores each page; failing pages are queued
//!  ├─ 5. Refine    RefinementCapability::batch_refine on groups of pages
//!  ├─ 6. Persist   StorageCapability (must succeed)
//!  └─ 7. Cache     best-effort write keyed by the source's identity
//! ```
//!
//! The orchestrator only knows the traits in [`capability`]. The crate ships
//! production implementations in [`backends`] (pdfium rendering, vision-LLM
//! OCR, LLM refinement, JSON file storage) and cache backends in [`cache`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ocrflow::backends::{resolve_provider, FileStorage, LlmRefiner, PdfiumPageSource, VisionOcr};
//! use ocrflow::cache::MemoryCache;
//! use ocrflow::{PipelineConfig, PipelineOrchestrator};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let llm = resolve_provider(None, None)?;
//!     let orchestrator = PipelineOrchestrator::builder()
//!         .config(PipelineConfig::default())
//!         .page_source(Arc::new(PdfiumPageSource::new()))
//!         .ocr(Arc::new(VisionOcr::new(llm.clone())))
//!         .refiner(Arc::new(LlmRefiner::new(llm)))
//!         .storage(Arc::new(FileStorage::new("out")))
//!         .cache(Arc::new(MemoryCache::new()))
//!         .build()?;
//!
//!     let doc = orchestrator.process_one("scan.pdf").await?;
//!     println!("{} pages, {} refined", doc.pages.len(), doc.refined_pages());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature   | Default | Description |
//! |-----------|---------|-------------|
//! | `cli`     | on      | Enables the `ocrflow` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `bundled` | on      | Embeds the pdfium shared library at compile time |
//! | `redis`   | off     | [`cache::RedisCache`], a cache shared between hosts |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backends;
pub mod cache;
pub mod capability;
pub mod config;
pub mod document;
pub mod error;
pub mod orchestrator;
pub mod progress;
pub mod quality;
pub mod retry;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cache::{CacheBackend, CacheLookup, DocumentCache, FileCache, MemoryCache};
pub use capability::{
    OcrCapability, OcrOutput, PageImage, PageSource, RefinementCapability, StorageCapability,
    StorageHandle,
};
pub use config::{
    CacheKeyMode, OutputFormat, PageSeparator, PipelineConfig, PipelineConfigBuilder,
    QualityThresholds, RetrySettings, ScriptBlock, MAX_CACHE_TTL,
};
pub use document::{BatchProcessingResult, Document, DocumentFailure, Page};
pub use error::{
    CacheError, ConfigurationError, OcrError, PipelineError, QualityError, RefinementError,
    Retryable, SourceError, StorageError,
};
pub use orchestrator::{PipelineOrchestrator, PipelineOrchestratorBuilder};
pub use progress::{NoopObserver, PipelineObserver, SharedObserver};
pub use quality::{QualityAssessor, QualityMetrics};
pub use retry::RetryPolicy;
