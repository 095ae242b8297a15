//! PDF rasterisation with pdfium.
//!
//! pdfium is a C++ library with thread-local state, so every call runs on
//! `spawn_blocking`. Page size is capped by the longest edge in pixels rather
//! than by DPI; an A0 poster and a receipt both come out at a size a vision
//! model can read.

use super::input;
use crate::capability::{PageImage, PageSource};
use crate::error::SourceError;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Default cap on the longest rendered edge.
pub const DEFAULT_MAX_RENDERED_PIXELS: u32 = 2000;

/// [`PageSource`] that renders every page of a local or remote PDF.
#[derive(Debug, Clone)]
pub struct PdfiumPageSource {
    max_rendered_pixels: u32,
    password: Option<String>,
    download_timeout: Duration,
}

impl Default for PdfiumPageSource {
    fn default() -> Self {
        Self {
            max_rendered_pixels: DEFAULT_MAX_RENDERED_PIXELS,
            password: None,
            download_timeout: Duration::from_secs(120),
        }
    }
}

impl PdfiumPageSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_rendered_pixels(mut self, pixels: u32) -> Self {
        self.max_rendered_pixels = pixels.max(1);
        self
    }

    /// Password for encrypted PDFs.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }
}

#[async_trait]
impl PageSource for PdfiumPageSource {
    async fn pages(&self, source: &str) -> Result<Vec<PageImage>, SourceError> {
        let resolved = input::resolve(source, self.download_timeout).await?;
        let path = resolved.path().to_path_buf();
        let password = self.password.clone();
        let max_pixels = self.max_rendered_pixels;

        let pages = tokio::task::spawn_blocking(move || {
            render_all(&path, password.as_deref(), max_pixels)
        })
        .await
        .map_err(|e| SourceError::Internal(format!("render task panicked: {e}")))??;

        // `resolved` (and any downloaded temp file) lives until rendering is done.
        drop(resolved);
        Ok(pages)
    }
}

fn render_all(
    path: &Path,
    password: Option<&str>,
    max_pixels: u32,
) -> Result<Vec<PageImage>, SourceError> {
    let pdfium = pdfium_auto::bind_pdfium_silent()
        .map_err(|e| SourceError::PdfiumBindingFailed(e.to_string()))?;

    let document = pdfium
        .load_pdf_from_file(path, password)
        .map_err(|e| classify_load_error(path, password.is_some(), &e))?;

    let pages = document.pages();
    let total = pages.len();
    if total == 0 {
        return Err(SourceError::EmptyDocument {
            path: path.to_path_buf(),
        });
    }
    info!(path = %path.display(), pages = total, "PDF loaded");

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut out = Vec::with_capacity(total as usize);
    for (idx, page) in pages.iter().enumerate() {
        let number = idx as u32 + 1;
        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            SourceError::RasterisationFailed {
                page: number,
                detail: format!("{e:?}"),
            }
        })?;
        let image = bitmap.as_image();
        debug!(page = number, width = image.width(), height = image.height(), "rendered");
        out.push(PageImage::new(number, image));
    }
    Ok(out)
}

fn classify_load_error(path: &Path, had_password: bool, err: &PdfiumError) -> SourceError {
    let detail = format!("{err:?}");
    if detail.to_lowercase().contains("password") {
        if had_password {
            SourceError::WrongPassword {
                path: path.to_path_buf(),
            }
        } else {
            SourceError::PasswordRequired {
                path: path.to_path_buf(),
            }
        }
    } else {
        SourceError::CorruptPdf {
            path: path.to_path_buf(),
            detail,
        }
    }
}
