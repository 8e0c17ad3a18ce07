//! Asset storage for brand prime images.
//!
//! Uploaded files are written under the configured directory with a
//! sanitized, timestamp-prefixed filename and served back under `/uploads/`.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::info;

use crate::config::UploadConfig;
use crate::error::{ApiError, ApiResult};

/// Public URL prefix uploaded assets are served under.
pub const PUBLIC_PREFIX: &str = "/uploads";

/// Stores uploaded brand images on disk.
#[derive(Debug, Clone)]
pub struct AssetStore {
    dir: PathBuf,
}

impl AssetStore {
    /// Create an asset store rooted at the configured upload directory.
    pub fn new(config: &UploadConfig) -> Self {
        Self {
            dir: config.dir.clone(),
        }
    }

    /// Directory assets are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write an uploaded file and return its public URL.
    ///
    /// The stored name is the sanitized original filename prefixed with the
    /// current timestamp in milliseconds, so repeated uploads of the same
    /// file never collide.
    pub async fn store(&self, original_name: &str, bytes: &[u8]) -> ApiResult<String> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ApiError::Upload {
                message: format!("Failed to create upload directory: {}", e),
            })?;

        let safe = sanitize_filename(original_name);
        let stamp = Utc::now().timestamp_millis();
        let filename = format!("{}-{}", stamp, safe);

        let path = self.dir.join(&filename);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| ApiError::Upload {
                message: format!("Failed to write {}: {}", path.display(), e),
            })?;

        info!(file = %filename, size = bytes.len(), "Stored uploaded asset");

        Ok(format!("{}/{}", PUBLIC_PREFIX, filename))
    }
}

/// Sanitize an uploaded filename: drop any directory components, collapse
/// every whitespace run to a single hyphen, lowercase the rest.
pub fn sanitize_filename(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut out = String::with_capacity(base.len());
    let mut in_whitespace = false;
    for c in base.chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                out.push('-');
                in_whitespace = true;
            }
        } else {
            out.extend(c.to_lowercase());
            in_whitespace = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_lowercases() {
        assert_eq!(sanitize_filename("Logo.PNG"), "logo.png");
    }

    #[test]
    fn test_sanitize_collapses_whitespace_runs() {
        assert_eq!(sanitize_filename("my   brand logo.png"), "my-brand-logo.png");
        assert_eq!(sanitize_filename("tab\there.png"), "tab-here.png");
    }

    #[test]
    fn test_sanitize_strips_directories() {
        assert_eq!(sanitize_filename("../../etc/Pass Wd"), "pass-wd");
    }

    #[tokio::test]
    async fn test_store_writes_file_with_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        let store = AssetStore::new(&crate::config::UploadConfig {
            dir: tmp.path().to_path_buf(),
        });

        let url = store.store("My Logo.png", b"png-bytes").await.unwrap();
        assert!(url.starts_with("/uploads/"));
        assert!(url.ends_with("-my-logo.png"));

        let filename = url.strip_prefix("/uploads/").unwrap();
        let written = tokio::fs::read(tmp.path().join(filename)).await.unwrap();
        assert_eq!(written, b"png-bytes");
    }
}
