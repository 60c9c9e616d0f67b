//! Persistent storage
//!
//! Settings and model files live under the platform data directory.

use std::path::PathBuf;
use thiserror::Error;

pub mod download;
pub mod models;
pub mod settings;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to access data directory: {0}")]
    DataDirError(String),
    #[error("Failed to read file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to serialize/deserialize JSON: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
}

/// Get the application data directory
///
/// - Windows: `C:\Users\{user}\AppData\Roaming\NoHate\NoHate`
/// - macOS: `/Users/{user}/Library/Application Support/com.NoHate.NoHate`
/// - Linux: `/home/{user}/.local/share/nohate`
pub fn get_data_dir() -> Result<PathBuf, StorageError> {
    directories::ProjectDirs::from("com", "NoHate", "NoHate")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| StorageError::DataDirError("Could not determine data directory".to_string()))
}

/// Directory holding the downloaded language model (`{data_dir}/llm`)
pub fn models_dir() -> Result<PathBuf, StorageError> {
    Ok(get_data_dir()?.join("llm"))
}

/// Creates `{data_dir}/llm/` if missing
pub fn init_storage() -> Result<PathBuf, StorageError> {
    let dir = models_dir()?;
    std::fs::create_dir_all(&dir)?;
    tracing::info!("Initialized storage at: {}", dir.display());
    Ok(dir)
}
