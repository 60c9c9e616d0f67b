//! Model file storage
//!
//! Finds the installed model, verifies it against its SHA-256 sidecar and lists
//! candidate GGUF files.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::inference::gguf::{self, GgufHeader};
use crate::storage::{models_dir, StorageError};

/// Name of the installed model inside the models directory
pub const MODEL_FILE_NAME: &str = "model.gguf";
/// Hex SHA-256 of [`MODEL_FILE_NAME`], written next to it on download
pub const CHECKSUM_FILE_NAME: &str = "model.sha256";

/// Information about a GGUF model file
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    /// Full path to the model file
    pub path: PathBuf,
    /// Filename of the model
    pub filename: String,
    /// File size in bytes
    pub size_bytes: u64,
    /// GGUF version, when the header is readable
    pub gguf_version: Option<u32>,
}

impl ModelInfo {
    fn from_path(path: PathBuf) -> Result<Self, io::Error> {
        let metadata = fs::metadata(&path)?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();
        let gguf_version = gguf::read_header(&path)
            .ok()
            .map(|header: GgufHeader| header.version);

        Ok(Self {
            path,
            filename,
            size_bytes: metadata.len(),
            gguf_version,
        })
    }

    /// Get a human-readable size string
    pub fn size_string(&self) -> String {
        const UNITS: [&str; 3] = ["KB", "MB", "GB"];
        let mut size = self.size_bytes as f64;
        if size < 1024.0 {
            return format!("{} B", self.size_bytes);
        }
        let mut unit = 0;
        size /= 1024.0;
        while size >= 1024.0 && unit + 1 < UNITS.len() {
            size /= 1024.0;
            unit += 1;
        }
        format!("{:.2} {}", size, UNITS[unit])
    }
}

/// Lowercase hex SHA-256 of the file at `path`
pub fn sha256_file<P: AsRef<Path>>(path: P) -> Result<String, io::Error> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Checks `model` against the hex digest stored in `sidecar`.
///
/// A missing or empty sidecar is accepted; comparison ignores case.
pub fn verify_checksum(model: &Path, sidecar: &Path) -> Result<(), StorageError> {
    if !sidecar.is_file() {
        return Ok(());
    }
    let expected = fs::read_to_string(sidecar)?.trim().to_string();
    if expected.is_empty() {
        return Ok(());
    }

    let actual = sha256_file(model)?;
    if !actual.eq_ignore_ascii_case(&expected) {
        return Err(StorageError::ChecksumMismatch {
            path: model.to_path_buf(),
            expected,
            actual,
        });
    }
    tracing::debug!("Checksum verified for {}", model.display());
    Ok(())
}

/// Returns the installed model in `directory`, if present and intact
pub fn locate_model(directory: &Path) -> Result<Option<PathBuf>, StorageError> {
    let model = directory.join(MODEL_FILE_NAME);
    if !model.is_file() {
        tracing::debug!("No model installed at {}", model.display());
        return Ok(None);
    }
    verify_checksum(&model, &directory.join(CHECKSUM_FILE_NAME))?;
    Ok(Some(model))
}

/// [`locate_model`] in the default models directory
pub fn locate_default_model() -> Result<Option<PathBuf>, StorageError> {
    locate_model(&models_dir()?)
}

/// Scan a directory for GGUF model files
///
/// Returns a list of ModelInfo for all .gguf files found in the directory, sorted by name
pub fn scan_models_directory(directory: &Path) -> Result<Vec<ModelInfo>, StorageError> {
    if !directory.is_dir() {
        tracing::warn!("Models directory does not exist: {}", directory.display());
        return Ok(vec![]);
    }

    let mut models = vec![];
    for entry in fs::read_dir(directory)? {
        let path = entry?.path();
        let is_gguf = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("gguf"));
        if !path.is_file() || !is_gguf {
            continue;
        }
        match ModelInfo::from_path(path.clone()) {
            Ok(info) => models.push(info),
            Err(e) => tracing::warn!("Failed to read model file {:?}: {}", path, e),
        }
    }

    models.sort_by(|a, b| a.filename.cmp(&b.filename));
    tracing::info!("Found {} model(s) in {}", models.len(), directory.display());
    Ok(models)
}
