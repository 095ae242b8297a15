//! Local file storage for finished documents.
//!
//! Each document becomes `<stem>-<id>.json` in the output directory, where
//! `<id>` is derived from the document's source so two `report.pdf` files
//! from different folders do not overwrite each other. With
//! [`OutputFormat::Markdown`] or [`OutputFormat::Text`] a rendered sibling
//! (`.md` / `.txt`) is written too. Every file is written to a temp path and
//! renamed into place, so readers never observe a half-written document.

use crate::capability::{StorageCapability, StorageHandle};
use crate::config::{OutputFormat, PageSeparator};
use crate::document::Document;
use crate::error::StorageError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct FileStorage {
    output_dir: PathBuf,
    format: OutputFormat,
    separator: PageSeparator,
}

impl FileStorage {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            format: OutputFormat::default(),
            separator: PageSeparator::default(),
        }
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Page separator for the `.md` rendering.
    pub fn with_separator(mut self, separator: PageSeparator) -> Self {
        self.separator = separator;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn base_path(&self, doc: &Document) -> PathBuf {
        let stem = Path::new(&doc.name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "document".to_string());
        let identity = doc
            .metadata
            .get("source")
            .and_then(|v| v.as_str())
            .unwrap_or(&doc.name);
        let id = blake3::hash(identity.as_bytes()).to_hex();
        self.output_dir
            .join(format!("{}-{}", sanitise(&stem), &id.as_str()[..8]))
    }
}

/// Keep file names portable.
fn sanitise(stem: &str) -> String {
    stem.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    let write_err = |source| StorageError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, contents).await.map_err(write_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(write_err)
}

#[async_trait]
impl StorageCapability for FileStorage {
    async fn save_document(&self, doc: &Document) -> Result<StorageHandle, StorageError> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|source| StorageError::Write {
                path: self.output_dir.clone(),
                source,
            })?;

        let base = self.base_path(doc);
        let json_path = base.with_extension("json");
        let json =
            serde_json::to_vec_pretty(doc).map_err(|e| StorageError::Serialization(e.to_string()))?;
        write_atomic(&json_path, &json).await?;

        let rendered = match self.format {
            OutputFormat::Json => None,
            OutputFormat::Markdown => Some(("md", doc.to_markdown(&self.separator))),
            OutputFormat::Text => Some(("txt", doc.to_text())),
        };
        if let Some((ext, body)) = rendered {
            write_atomic(&base.with_extension(ext), body.as_bytes()).await?;
        }

        debug!(path = %json_path.display(), "document stored");
        Ok(StorageHandle(json_path.to_string_lossy().into_owned()))
    }

    async fn load_document(&self, handle: &StorageHandle) -> Result<Document, StorageError> {
        let path = PathBuf::from(&handle.0);
        let bytes = tokio::fs::read(&path).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(handle.0.clone())
            } else {
                StorageError::Read { path, source }
            }
        })?;
        serde_json::from_slice(&bytes).map_err(|e| StorageError::Serialization(e.to_string()))
    }
}
