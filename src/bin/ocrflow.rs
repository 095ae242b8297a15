//! CLI binary for ocrflow.
//!
//! Wires the production backends into a [`PipelineOrchestrator`], maps flags
//! to [`PipelineConfig`], and prints documents or batch summaries.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use ocrflow::backends::{resolve_provider, FileStorage, LlmRefiner, PdfiumPageSource, VisionOcr};
use ocrflow::{
    CacheBackend, CacheKeyMode, FileCache, OutputFormat, PageSeparator, PipelineConfig,
    PipelineObserver, PipelineOrchestrator, ScriptBlock, StorageCapability, StorageHandle,
};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── Progress observer ────────────────────────────────────────────────────

/// Renders pipeline events on a single indicatif bar.
///
/// For one document the bar is a spinner showing the page being read; for a
/// batch it counts settled documents.
struct CliProgress {
    bar: ProgressBar,
    cache_hits: AtomicUsize,
}

impl CliProgress {
    fn spinner() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Processing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            cache_hits: AtomicUsize::new(0),
        })
    }

    fn counter(total: usize) -> Arc<Self> {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} documents  \
                 ⏱ {elapsed_precise}  ETA {eta_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        bar.set_prefix("Batch");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            cache_hits: AtomicUsize::new(0),
        })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl PipelineObserver for CliProgress {
    fn on_cache_hit(&self, source: &str, _key: &str) {
        self.cache_hits.fetch_add(1, Ordering::SeqCst);
        self.bar
            .println(format!("  {} {}  {}", cyan("◆"), source, dim("cached")));
        self.bar.inc(1);
    }

    fn on_page_extracted(&self, source: &str, page: u32, total_pages: usize) {
        self.bar
            .set_message(format!("{source}  page {page}/{total_pages}"));
    }

    fn on_page_refined(&self, source: &str, page: u32) {
        self.bar.set_message(format!("{source}  refined page {page}"));
    }

    fn on_retry(&self, operation: &str, attempt: u32, delay: Duration, _error: &str) {
        self.bar.println(format!(
            "  {} {operation}: attempt {attempt} failed, retrying in {:.1}s",
            cyan("↻"),
            delay.as_secs_f64()
        ));
    }

    fn on_document_complete(&self, source: &str, pages: usize, refined_pages: usize) {
        self.bar.println(format!(
            "  {} {}  {}",
            green("✓"),
            source,
            dim(&format!("{pages} pages, {refined_pages} refined")),
        ));
        self.bar.inc(1);
    }

    fn on_document_failed(&self, source: &str, error: &str) {
        let msg = if error.chars().count() > 100 {
            format!("{}…", error.chars().take(99).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar
            .println(format!("  {} {}  {}", red("✗"), source, red(&msg)));
        self.bar.inc(1);
    }
}

// ── CLI definition ───────────────────────────────────────────────────────

const AFTER_HELP: &str = r#"EXAMPLES:
  # One document, Markdown on stdout, JSON stored under ./ocrflow-out
  ocrflow process scan.pdf

  # Also write a .md next to the stored JSON
  ocrflow --format markdown --separator hr process scan.pdf

  # A folder of scans, 8 documents at a time, summary as JSON
  ocrflow --concurrency 8 batch --json scans/*.pdf

  # Stricter quality gate: more pages go through refinement
  ocrflow --min-confidence 0.9 --min-word-count 20 process report.pdf

  # Re-render a stored document
  ocrflow show ocrflow-out/scan-1a2b3c4d.json

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to an existing libpdfium; skips auto-download
  RUST_LOG                Log filter, overrides --verbose / --quiet
"#;

/// OCR PDF documents, repair low-quality pages with an LLM, and store the result.
#[derive(Parser, Debug)]
#[command(
    name = "ocrflow",
    version,
    about = "OCR PDF documents with a vision LLM, refine low-quality pages, cache and store the result",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    pipeline: PipelineArgs,

    #[command(flatten)]
    backend: BackendArgs,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "OCRFLOW_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "OCRFLOW_QUIET")]
    quiet: bool,

    /// Disable the progress display.
    #[arg(long, global = true, env = "OCRFLOW_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process one PDF file or URL and print it.
    Process {
        /// Local PDF path or HTTP/HTTPS URL.
        source: String,

        /// Print the document as JSON instead of Markdown.
        #[arg(long)]
        json: bool,
    },

    /// Process many PDFs concurrently and print a summary.
    Batch {
        /// Local PDF paths or HTTP/HTTPS URLs.
        #[arg(required = true)]
        sources: Vec<String>,

        /// Print the full batch result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print a previously stored document.
    Show {
        /// Path of the stored `.json` document.
        location: PathBuf,

        /// Print plain text (form-feed page breaks) instead of Markdown.
        #[arg(long)]
        text: bool,
    },
}

#[derive(Args, Debug)]
struct PipelineArgs {
    /// Minimum OCR confidence before a page is refined.
    #[arg(long, global = true, env = "OCRFLOW_MIN_CONFIDENCE", default_value_t = 0.7)]
    min_confidence: f64,

    /// Maximum share of non-alphanumeric, non-space characters.
    #[arg(long, global = true, env = "OCRFLOW_MAX_SPECIAL_CHAR_RATIO", default_value_t = 0.3)]
    max_special_char_ratio: f64,

    /// Pages with fewer words are refined.
    #[arg(long, global = true, env = "OCRFLOW_MIN_WORD_COUNT", default_value_t = 5)]
    min_word_count: usize,

    /// Disable the Hangul-run hallucination check.
    #[arg(long, global = true, env = "OCRFLOW_NO_SCRIPT_CHECK")]
    no_script_check: bool,

    /// Attempts per OCR / refinement call (first try included).
    #[arg(long, global = true, env = "OCRFLOW_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    /// Backoff before the second attempt; doubles after each failure.
    #[arg(long, global = true, env = "OCRFLOW_BASE_DELAY_MS", default_value_t = 1000)]
    base_delay_ms: u64,

    /// Do not read or write the document cache.
    #[arg(long, global = true, env = "OCRFLOW_NO_CACHE")]
    no_cache: bool,

    /// Lifetime of cached documents.
    #[arg(long, global = true, env = "OCRFLOW_CACHE_TTL_SECS", default_value_t = 86_400)]
    cache_ttl_secs: u64,

    /// Cache identity: file content or source path.
    #[arg(long, global = true, env = "OCRFLOW_CACHE_KEY", value_enum, default_value = "content")]
    cache_key: CacheKeyArg,

    /// Directory of the on-disk cache [default: <OUTPUT_DIR>/.cache].
    #[arg(long, global = true, env = "OCRFLOW_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Redis URL for a cache shared between hosts (needs the `redis` feature).
    /// Falls back to the on-disk cache when Redis is unreachable.
    #[arg(long, global = true, env = "OCRFLOW_REDIS_URL")]
    redis_url: Option<String>,

    /// Pages per refinement request.
    #[arg(long, global = true, env = "OCRFLOW_REFINE_BATCH_SIZE", default_value_t = 5)]
    refine_batch_size: usize,

    /// Documents processed at once in `batch`.
    #[arg(short, long, global = true, env = "OCRFLOW_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// OCR calls in flight per document.
    #[arg(long, global = true, env = "OCRFLOW_PAGE_CONCURRENCY", default_value_t = 4)]
    page_concurrency: usize,

    /// Timeout for one OCR call, in seconds.
    #[arg(long, global = true, env = "OCRFLOW_OCR_TIMEOUT", default_value_t = 60)]
    ocr_timeout: u64,

    /// Timeout for one refinement call, in seconds.
    #[arg(long, global = true, env = "OCRFLOW_REFINE_TIMEOUT", default_value_t = 60)]
    refine_timeout: u64,
}

#[derive(Args, Debug)]
struct BackendArgs {
    /// LLM model ID used for OCR and refinement.
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "OCRFLOW_PROVIDER")]
    provider: Option<String>,

    /// Directory where documents are stored.
    #[arg(short, long, global = true, env = "OCRFLOW_OUTPUT_DIR", default_value = "ocrflow-out")]
    output_dir: PathBuf,

    /// Extra rendering stored next to the JSON document.
    #[arg(long, global = true, env = "OCRFLOW_FORMAT", value_enum, default_value = "json")]
    format: FormatArg,

    /// Page separator: none, hr, comment, or a custom string.
    #[arg(long, global = true, env = "OCRFLOW_SEPARATOR", default_value = "none")]
    separator: String,

    /// PDF user password for encrypted documents.
    #[arg(long, global = true, env = "OCRFLOW_PASSWORD")]
    password: Option<String>,

    /// Longest rendered page edge, in pixels.
    #[arg(long, global = true, env = "OCRFLOW_MAX_PIXELS", default_value_t = 2000)]
    max_pixels: u32,

    /// HTTP download timeout for URL sources, in seconds.
    #[arg(long, global = true, env = "OCRFLOW_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CacheKeyArg {
    Content,
    Path,
}

impl From<CacheKeyArg> for CacheKeyMode {
    fn from(v: CacheKeyArg) -> Self {
        match v {
            CacheKeyArg::Content => CacheKeyMode::Content,
            CacheKeyArg::Path => CacheKeyMode::Path,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Json,
    Markdown,
    Text,
}

impl From<FormatArg> for OutputFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Json => OutputFormat::Json,
            FormatArg::Markdown => OutputFormat::Markdown,
            FormatArg::Text => OutputFormat::Text,
        }
    }
}

fn parse_separator(s: &str) -> PageSeparator {
    match s {
        "none" => PageSeparator::None,
        "hr" => PageSeparator::HorizontalRule,
        "comment" => PageSeparator::Comment,
        other => PageSeparator::Custom(other.to_string()),
    }
}

impl PipelineArgs {
    fn to_config(&self) -> Result<PipelineConfig> {
        PipelineConfig::builder()
            .min_confidence(self.min_confidence)
            .max_special_char_ratio(self.max_special_char_ratio)
            .min_word_count(self.min_word_count)
            .script_block((!self.no_script_check).then(ScriptBlock::hangul))
            .max_attempts(self.max_attempts)
            .base_delay(Duration::from_millis(self.base_delay_ms))
            .cache_enabled(!self.no_cache)
            .cache_ttl(Duration::from_secs(self.cache_ttl_secs))
            .cache_key_mode(self.cache_key.into())
            .refinement_batch_size(self.refine_batch_size)
            .concurrency(self.concurrency)
            .page_concurrency(self.page_concurrency)
            .ocr_timeout(Duration::from_secs(self.ocr_timeout))
            .refine_timeout(Duration::from_secs(self.refine_timeout))
            .build()
            .context("Invalid pipeline configuration")
    }
}

// ── Wiring ───────────────────────────────────────────────────────────────

fn file_storage(args: &BackendArgs) -> FileStorage {
    FileStorage::new(&args.output_dir)
        .with_format(args.format.into())
        .with_separator(parse_separator(&args.separator))
}

fn file_cache(cli: &Cli) -> FileCache {
    let dir = match &cli.pipeline.cache_dir {
        Some(dir) => dir.clone(),
        None => cli.backend.output_dir.join(".cache"),
    };
    FileCache::new(dir)
}

#[cfg(feature = "redis")]
async fn cache_backend(cli: &Cli) -> Arc<dyn CacheBackend> {
    if let Some(url) = cli.pipeline.redis_url.as_deref() {
        match ocrflow::cache::RedisCache::connect(url).await {
            Ok(cache) => return Arc::new(cache),
            Err(e) => tracing::warn!(error = %e, "Redis unavailable, using on-disk cache"),
        }
    }
    Arc::new(file_cache(cli))
}

#[cfg(not(feature = "redis"))]
async fn cache_backend(cli: &Cli) -> Arc<dyn CacheBackend> {
    if cli.pipeline.redis_url.is_some() {
        tracing::warn!("built without the `redis` feature; --redis-url ignored");
    }
    Arc::new(file_cache(cli))
}

async fn build_orchestrator(
    cli: &Cli,
    observer: Option<Arc<CliProgress>>,
) -> Result<PipelineOrchestrator> {
    let config = cli.pipeline.to_config()?;
    let llm = resolve_provider(cli.backend.provider.as_deref(), cli.backend.model.as_deref())
        .context("Failed to configure LLM provider")?;

    let mut pages = PdfiumPageSource::new()
        .with_max_rendered_pixels(cli.backend.max_pixels)
        .with_download_timeout(Duration::from_secs(cli.backend.download_timeout));
    if let Some(password) = &cli.backend.password {
        pages = pages.with_password(password);
    }

    let mut builder = PipelineOrchestrator::builder()
        .config(config)
        .page_source(Arc::new(pages))
        .ocr(Arc::new(VisionOcr::new(Arc::clone(&llm))))
        .refiner(Arc::new(LlmRefiner::new(llm)))
        .storage(Arc::new(file_storage(&cli.backend)))
        .cache(cache_backend(cli).await);
    if let Some(observer) = observer {
        builder = builder.observer(observer);
    }
    builder.build().context("Failed to build pipeline")
}

/// Make sure the pdfium shared library is available before any rendering.
fn ensure_pdfium() -> Result<()> {
    #[cfg(feature = "bundled")]
    {
        tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_bundled())
            .context("Failed to extract bundled PDFium engine")?;
    }

    #[cfg(not(feature = "bundled"))]
    if !pdfium_auto::is_pdfium_cached() {
        eprintln!("{} downloading PDFium engine (first run only)…", cyan("◆"));
        tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_library(None))
            .context("Failed to download PDFium engine")?;
    }
    Ok(())
}

// ── Entry point ──────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match &cli.command {
        Command::Process { source, json } => {
            ensure_pdfium()?;
            let progress = show_progress.then(CliProgress::spinner);
            let orchestrator = build_orchestrator(&cli, progress.clone()).await?;
            let result = orchestrator.process_one(source).await;
            if let Some(p) = &progress {
                p.finish();
            }
            let doc = result.with_context(|| format!("Failed to process '{source}'"))?;

            if *json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&doc).context("Failed to serialize document")?
                );
            } else {
                print!("{}", doc.to_markdown(&parse_separator(&cli.backend.separator)));
            }
            if !cli.quiet {
                let location = doc
                    .metadata
                    .get("location")
                    .and_then(|v| v.as_str())
                    .unwrap_or("(cached)");
                eprintln!(
                    "{} {} pages, {} refined  {}",
                    green("✔"),
                    bold(&doc.pages.len().to_string()),
                    doc.refined_pages(),
                    dim(location)
                );
            }
        }

        Command::Batch { sources, json } => {
            ensure_pdfium()?;
            let progress = show_progress.then(|| CliProgress::counter(sources.len()));
            let orchestrator = build_orchestrator(&cli, progress.clone()).await?;
            let batch = orchestrator.process_batch(sources.as_slice()).await;
            let cache_hits = progress
                .as_ref()
                .map(|p| p.cache_hits.load(Ordering::SeqCst))
                .unwrap_or(0);
            if let Some(p) = &progress {
                p.finish();
            }

            if *json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&batch).context("Failed to serialize batch")?
                );
            } else if !cli.quiet {
                let elapsed = batch
                    .completed_at
                    .map(|end| (end - batch.started_at).num_milliseconds() as f64 / 1000.0)
                    .unwrap_or_default();
                eprintln!(
                    "{} {}/{} documents processed, {} failed, {} from cache  {}",
                    if batch.failed_documents == 0 {
                        green("✔")
                    } else {
                        red("✘")
                    },
                    bold(&batch.processed_documents.to_string()),
                    batch.total_documents,
                    batch.failed_documents,
                    cache_hits,
                    dim(&format!("{elapsed:.1}s")),
                );
                for failure in &batch.failures {
                    eprintln!("  {} {}: {}", red("✗"), failure.source, failure.error);
                }
            }
            if batch.failed_documents > 0 && batch.processed_documents == 0 {
                bail!("all {} documents failed", batch.total_documents);
            }
        }

        Command::Show { location, text } => {
            let storage = file_storage(&cli.backend);
            let handle = StorageHandle(location.to_string_lossy().into_owned());
            let doc = storage
                .load_document(&handle)
                .await
                .with_context(|| format!("Failed to load '{}'", location.display()))?;
            if *text {
                println!("{}", doc.to_text());
            } else {
                print!("{}", doc.to_markdown(&parse_separator(&cli.backend.separator)));
            }
        }
    }

    Ok(())
}
