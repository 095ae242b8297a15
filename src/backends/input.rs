//! Source resolution: turn a path or URL into a local PDF pdfium can open.
//!
//! pdfium needs a file-system path, so URLs are streamed into a `TempDir`
//! that lives as long as the returned [`ResolvedPdf`]. Both branches check
//! the `%PDF` magic bytes so a mislabelled file surfaces as
//! [`SourceError::NotAPdf`] rather than a pdfium parse failure.

use crate::error::SourceError;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// A PDF on local disk, possibly backed by a temporary download.
#[derive(Debug)]
pub enum ResolvedPdf {
    Local(PathBuf),
    /// The `TempDir` is removed when this value is dropped.
    Downloaded { path: PathBuf, _dir: TempDir },
}

impl ResolvedPdf {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedPdf::Local(p) => p,
            ResolvedPdf::Downloaded { path, .. } => path,
        }
    }
}

pub fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

pub async fn resolve(source: &str, download_timeout: Duration) -> Result<ResolvedPdf, SourceError> {
    if is_url(source) {
        download(source, download_timeout).await
    } else {
        open_local(Path::new(source)).await
    }
}

async fn open_local(path: &Path) -> Result<ResolvedPdf, SourceError> {
    let mut file = tokio::fs::File::open(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => SourceError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => SourceError::FileNotFound {
            path: path.to_path_buf(),
        },
    })?;

    let mut head = [0u8; 4];
    let n = read_head(&mut file, &mut head).await.map_err(|e| SourceError::CorruptPdf {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    check_magic(path, &head[..n])?;

    debug!(path = %path.display(), "resolved local PDF");
    Ok(ResolvedPdf::Local(path.to_path_buf()))
}

/// Fill `buf` as far as the file allows; returns the byte count read.
async fn read_head(file: &mut tokio::fs::File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn check_magic(path: &Path, head: &[u8]) -> Result<(), SourceError> {
    if head.len() < PDF_MAGIC.len() {
        return Err(SourceError::CorruptPdf {
            path: path.to_path_buf(),
            detail: format!("file is only {} bytes long", head.len()),
        });
    }
    if &head[..4] != PDF_MAGIC {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&head[..4]);
        return Err(SourceError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        });
    }
    Ok(())
}

async fn download(url: &str, timeout: Duration) -> Result<ResolvedPdf, SourceError> {
    info!(url, "downloading PDF");
    let failed = |reason: String| SourceError::DownloadFailed {
        url: url.to_string(),
        reason,
    };
    let classify = |e: reqwest::Error| {
        if e.is_timeout() {
            SourceError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout.as_secs(),
            }
        } else {
            failed(e.to_string())
        }
    };

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| failed(e.to_string()))?;
    let response = client.get(url).send().await.map_err(classify)?;
    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let dir = TempDir::new().map_err(|e| SourceError::Internal(format!("tempdir: {e}")))?;
    let path = dir.path().join(file_name_for(url));
    let mut file = tokio::fs::File::create(&path)
        .await
        .map_err(|e| SourceError::Internal(format!("temp file: {e}")))?;

    let mut head = Vec::with_capacity(PDF_MAGIC.len());
    let mut written = 0u64;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(classify)?;
        if head.len() < PDF_MAGIC.len() {
            let take = (PDF_MAGIC.len() - head.len()).min(chunk.len());
            head.extend_from_slice(&chunk[..take]);
            if head.len() == PDF_MAGIC.len() {
                check_magic(&path, &head)?;
            }
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| SourceError::Internal(format!("temp file write: {e}")))?;
        written += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| SourceError::Internal(format!("temp file flush: {e}")))?;
    check_magic(&path, &head)?;

    info!(url, bytes = written, path = %path.display(), "download complete");
    Ok(ResolvedPdf::Downloaded { path, _dir: dir })
}

/// File name for a downloaded URL: its last path segment when it has an
/// extension, `downloaded.pdf` otherwise.
fn file_name_for(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| {
            let last = u.path_segments()?.next_back()?.to_string();
            Some(last)
        })
        .filter(|last| !last.is_empty() && last.contains('.'))
        .unwrap_or_else(|| "downloaded.pdf".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn url_detection() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn download_file_names() {
        assert_eq!(file_name_for("https://a.org/x/report.pdf"), "report.pdf");
        assert_eq!(file_name_for("https://a.org/x/download"), "downloaded.pdf");
        assert_eq!(file_name_for("https://a.org/"), "downloaded.pdf");
    }

    #[tokio::test]
    async fn missing_local_file() {
        let err = resolve("/definitely/not/here.pdf", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn rejects_non_pdf_bytes() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"PK\x03\x04 zip archive").unwrap();
        let err = resolve(f.path().to_str().unwrap(), Duration::from_secs(1))
            .await
            .unwrap_err();
        match err {
            SourceError::NotAPdf { magic, .. } => assert_eq!(&magic, b"PK\x03\x04"),
            other => panic!("expected NotAPdf, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_truncated_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"%P").unwrap();
        let err = resolve(f.path().to_str().unwrap(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::CorruptPdf { .. }));
    }

    #[tokio::test]
    async fn accepts_pdf_header() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"%PDF-1.7\n").unwrap();
        let resolved = resolve(f.path().to_str().unwrap(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(resolved.path(), f.path());
    }
}
