//! Model download
//!
//! Fetches a quantized GGUF model from Hugging Face into the models directory.
//! Bytes land in `model.tmp` first, so an interrupted transfer resumes with a
//! `Range` request. The finished file is checked for length and SHA-256, then
//! renamed to `model.gguf` and its digest written to `model.sha256`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::header::{ACCEPT, ACCEPT_ENCODING, CONTENT_RANGE, RANGE};
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::storage::models::{sha256_file, CHECKSUM_FILE_NAME, MODEL_FILE_NAME};
use crate::storage::StorageError;

/// Repository fetched when none is given
pub const DEFAULT_REPO: &str = "TheBloke/TinyLlama-1.1B-Chat-v1.0-GGUF";
/// Quantization picked from the repository
pub const DEFAULT_QUANT: &str = "Q4_K_M";
/// Partial download, kept between attempts
pub const PARTIAL_FILE_NAME: &str = "model.tmp";

const USER_AGENT: &str = concat!("NoHate/", env!("CARGO_PKG_VERSION"));

/// Download errors
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected HTTP status: {0}")]
    Status(StatusCode),

    #[error("No file ending with .{quant}.gguf in {repo}")]
    NoMatchingFile { repo: String, quant: String },

    #[error("Zero bytes downloaded")]
    Empty,

    #[error("Length mismatch: downloaded {downloaded} of {total} bytes")]
    LengthMismatch { downloaded: u64, total: u64 },

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("File error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Where to look for the model
#[derive(Clone, Debug)]
pub struct DownloadConfig {
    pub base_url: String,
    pub repo: String,
    pub quant: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            base_url: "https://huggingface.co".to_string(),
            repo: DEFAULT_REPO.to_string(),
            quant: DEFAULT_QUANT.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ModelListing {
    #[serde(default)]
    siblings: Vec<Sibling>,
}

#[derive(Debug, Deserialize)]
struct Sibling {
    rfilename: String,
}

/// First file name ending in `.{quant}.gguf`, ignoring case
pub fn pick_quantized<'a, I>(files: I, quant: &str) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let suffix = format!(".{}.gguf", quant.to_lowercase());
    files
        .into_iter()
        .find(|name| name.to_lowercase().ends_with(&suffix))
}

/// Complete length from a `Content-Range: bytes 100-199/200` value
fn content_range_total(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}

/// HTTP client for model files
pub struct ModelDownloader {
    config: DownloadConfig,
    client: reqwest::Client,
}

impl ModelDownloader {
    pub fn new(config: DownloadConfig) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self::with_client(config, client))
    }

    /// Uses a preconfigured HTTP client
    pub fn with_client(config: DownloadConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    /// Resolves the configured repository to the URL of its quantized model
    pub async fn resolve(&self) -> Result<String, DownloadError> {
        let DownloadConfig {
            base_url,
            repo,
            quant,
        } = &self.config;
        let api = format!("{base_url}/api/models/{repo}");
        tracing::debug!("Resolving model via {api}");

        let response = self
            .client
            .get(&api)
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(DownloadError::Status(response.status()));
        }
        let listing: ModelListing = response.json().await?;

        let file = pick_quantized(listing.siblings.iter().map(|s| s.rfilename.as_str()), quant)
            .ok_or_else(|| DownloadError::NoMatchingFile {
                repo: repo.clone(),
                quant: quant.clone(),
            })?;
        let url = format!("{base_url}/{repo}/resolve/main/{file}");
        tracing::info!("Resolved download URL: {url}");
        Ok(url)
    }

    /// Downloads `url` into `dir` as `model.gguf`
    ///
    /// Resumes from an existing `model.tmp` when the server honours the range
    /// request. `on_progress` receives the bytes written so far and the total
    /// size when known. A transfer that breaks off keeps its partial file for
    /// the next attempt; a file that fails verification is deleted.
    pub async fn download<F>(
        &self,
        url: &str,
        dir: &Path,
        expected_sha256: Option<&str>,
        mut on_progress: F,
    ) -> Result<PathBuf, DownloadError>
    where
        F: FnMut(u64, Option<u64>),
    {
        tokio::fs::create_dir_all(dir).await?;
        let partial = dir.join(PARTIAL_FILE_NAME);
        let existing = tokio::fs::metadata(&partial)
            .await
            .map(|m| m.len())
            .unwrap_or(0);

        let mut request = self
            .client
            .get(url)
            .header(ACCEPT, "application/octet-stream")
            .header(ACCEPT_ENCODING, "identity");
        if existing > 0 {
            request = request.header(RANGE, format!("bytes={existing}-"));
        }
        let mut response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status(status));
        }
        let resumed = status == StatusCode::PARTIAL_CONTENT && existing > 0;
        let offset = if resumed { existing } else { 0 };
        let total = if status == StatusCode::PARTIAL_CONTENT {
            response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(content_range_total)
                .or_else(|| response.content_length().map(|n| n + offset))
        } else {
            response.content_length()
        };
        tracing::info!("HTTP {status} total={total:?} resuming_at={offset}");

        let mut file = if resumed {
            tokio::fs::OpenOptions::new()
                .append(true)
                .open(&partial)
                .await?
        } else {
            tokio::fs::File::create(&partial).await?
        };

        let mut downloaded = offset;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            on_progress(downloaded, total);
        }
        file.flush().await?;
        drop(file);
        tracing::debug!("Downloaded {downloaded} bytes");

        let dir = dir.to_path_buf();
        let expected = expected_sha256.map(str::to_string);
        tokio::task::spawn_blocking(move || finalize_download(&dir, total, expected.as_deref()))
            .await
            .map_err(|e| DownloadError::Io(io::Error::other(e)))?
    }

    /// [`resolve`](Self::resolve) then [`download`](Self::download) without a
    /// known checksum
    pub async fn resolve_and_download<F>(
        &self,
        dir: &Path,
        on_progress: F,
    ) -> Result<PathBuf, DownloadError>
    where
        F: FnMut(u64, Option<u64>),
    {
        let url = self.resolve().await?;
        self.download(&url, dir, None, on_progress).await
    }
}

fn discard(partial: &Path, error: DownloadError) -> Result<PathBuf, DownloadError> {
    tracing::error!("Discarding {}: {}", partial.display(), error);
    let _ = fs::remove_file(partial);
    Err(error)
}

/// Verifies `dir/model.tmp` and installs it as `dir/model.gguf`
///
/// The sidecar receives `expected_sha256` when given, otherwise the computed
/// digest.
pub fn finalize_download(
    dir: &Path,
    total: Option<u64>,
    expected_sha256: Option<&str>,
) -> Result<PathBuf, DownloadError> {
    let partial = dir.join(PARTIAL_FILE_NAME);
    let downloaded = fs::metadata(&partial).map(|m| m.len()).unwrap_or(0);

    if downloaded == 0 {
        return discard(&partial, DownloadError::Empty);
    }
    if let Some(total) = total.filter(|t| *t > 0) {
        if downloaded != total {
            return discard(
                &partial,
                DownloadError::LengthMismatch { downloaded, total },
            );
        }
    }

    let actual = sha256_file(&partial)?;
    let expected = expected_sha256.map(str::trim).filter(|s| !s.is_empty());
    if let Some(expected) = expected {
        if !actual.eq_ignore_ascii_case(expected) {
            return discard(
                &partial,
                DownloadError::ChecksumMismatch {
                    expected: expected.to_string(),
                    actual,
                },
            );
        }
    }

    let model = dir.join(MODEL_FILE_NAME);
    if model.exists() {
        fs::remove_file(&model)?;
    }
    if let Err(e) = fs::rename(&partial, &model) {
        return discard(&partial, e.into());
    }
    fs::write(dir.join(CHECKSUM_FILE_NAME), expected.unwrap_or(&actual))?;

    tracing::info!("Model stored at {}", model.display());
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::locate_model;
    use tempfile::TempDir;

    fn write_partial(dir: &TempDir, bytes: &[u8]) {
        fs::write(dir.path().join(PARTIAL_FILE_NAME), bytes).unwrap();
    }

    #[test]
    fn test_pick_quantized() {
        let files = ["README.md", "tiny.Q8_0.gguf", "tiny.q4_k_m.gguf", "other.Q4_K_M.gguf"];
        assert_eq!(pick_quantized(files, "Q4_K_M"), Some("tiny.q4_k_m.gguf"));
        assert_eq!(pick_quantized(files, "Q2_K"), None);
    }

    #[test]
    fn test_content_range_total() {
        assert_eq!(content_range_total("bytes 100-199/200"), Some(200));
        assert_eq!(content_range_total("bytes 0-9/*"), None);
        assert_eq!(content_range_total("garbage"), None);
    }

    #[test]
    fn test_finalize_installs_model_and_sidecar() {
        let dir = TempDir::new().unwrap();
        write_partial(&dir, b"weights");

        let model = finalize_download(dir.path(), Some(7), None).unwrap();

        assert_eq!(model, dir.path().join(MODEL_FILE_NAME));
        assert_eq!(fs::read(&model).unwrap(), b"weights");
        assert!(!dir.path().join(PARTIAL_FILE_NAME).exists());
        let sidecar = fs::read_to_string(dir.path().join(CHECKSUM_FILE_NAME)).unwrap();
        assert_eq!(sidecar, sha256_file(&model).unwrap());
        // The installed pair passes the load-time check
        assert_eq!(locate_model(dir.path()).unwrap(), Some(model));
    }

    #[test]
    fn test_finalize_keeps_expected_digest() {
        let dir = TempDir::new().unwrap();
        write_partial(&dir, b"abc");
        let expected = "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD";

        finalize_download(dir.path(), None, Some(expected)).unwrap();

        let sidecar = fs::read_to_string(dir.path().join(CHECKSUM_FILE_NAME)).unwrap();
        assert_eq!(sidecar, expected);
    }

    #[test]
    fn test_finalize_replaces_existing_model() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(MODEL_FILE_NAME), "old").unwrap();
        write_partial(&dir, b"new weights");

        let model = finalize_download(dir.path(), None, None).unwrap();
        assert_eq!(fs::read(model).unwrap(), b"new weights");
    }

    #[test]
    fn test_finalize_rejects_short_file() {
        let dir = TempDir::new().unwrap();
        write_partial(&dir, b"weig");

        let result = finalize_download(dir.path(), Some(7), None);
        assert!(matches!(
            result,
            Err(DownloadError::LengthMismatch {
                downloaded: 4,
                total: 7
            })
        ));
        assert!(!dir.path().join(PARTIAL_FILE_NAME).exists());
        assert!(!dir.path().join(MODEL_FILE_NAME).exists());
    }

    #[test]
    fn test_finalize_rejects_wrong_checksum() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(MODEL_FILE_NAME), "old").unwrap();
        write_partial(&dir, b"tampered");

        let result = finalize_download(dir.path(), None, Some("0".repeat(64).as_str()));
        assert!(matches!(result, Err(DownloadError::ChecksumMismatch { .. })));
        assert!(!dir.path().join(PARTIAL_FILE_NAME).exists());
        // A failed download leaves the installed model alone
        assert_eq!(fs::read(dir.path().join(MODEL_FILE_NAME)).unwrap(), b"old");
        assert!(!dir.path().join(CHECKSUM_FILE_NAME).exists());
    }

    #[test]
    fn test_finalize_rejects_empty_file() {
        let dir = TempDir::new().unwrap();
        write_partial(&dir, b"");
        assert!(matches!(
            finalize_download(dir.path(), None, None),
            Err(DownloadError::Empty)
        ));
        assert!(matches!(
            finalize_download(&dir.path().join("missing"), None, None),
            Err(DownloadError::Empty)
        ));
    }
}
