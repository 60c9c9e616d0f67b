//! Settings storage
//!
//! Manages persistence of classifier preferences.

use std::fs;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::inference::config::{DEFAULT_CONTEXT_SIZE, DEFAULT_MAX_TOKENS};
use crate::inference::{ModelConfiguration, DEFAULT_PROMPT};
use crate::storage::{get_data_dir, StorageError};

/// Classifier settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    /// Model to load; `None` means the installed `llm/model.gguf`
    pub model_path: Option<PathBuf>,
    /// Context window size
    pub context_size: u32,
    /// Number of GPU layers to offload (0 = CPU only)
    pub gpu_layers: u32,
    /// Maximum number of tokens generated per classification
    pub max_tokens: u32,
    /// Classification instruction; `{{text}}` marks where the text goes
    pub prompt: String,
    /// Run one throwaway classification right after loading
    pub warmup: bool,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            model_path: None,
            context_size: DEFAULT_CONTEXT_SIZE.get(),
            gpu_layers: 0,
            max_tokens: DEFAULT_MAX_TOKENS.get(),
            prompt: DEFAULT_PROMPT.to_string(),
            warmup: true,
        }
    }
}

impl ClassifierSettings {
    /// Validate settings values
    ///
    /// Replaces zero sizes with defaults and keeps generation inside the context.
    pub fn validate(&mut self) {
        if self.context_size == 0 {
            self.context_size = DEFAULT_CONTEXT_SIZE.get();
        }
        if self.max_tokens == 0 {
            self.max_tokens = DEFAULT_MAX_TOKENS.get();
        }
        // Leave at least half of the context for the prompt
        self.max_tokens = self.max_tokens.min((self.context_size / 2).max(1));

        if self.prompt.trim().is_empty() {
            self.prompt = DEFAULT_PROMPT.to_string();
        }
        if self.model_path.as_ref().is_some_and(|p| p.as_os_str().is_empty()) {
            self.model_path = None;
        }
    }

    /// Model configuration for the model at `path`, sized from these settings
    pub fn model_configuration(&self, path: impl Into<PathBuf>) -> ModelConfiguration {
        let mut config = ModelConfiguration::new(path).with_gpu_layers(self.gpu_layers);
        if let Some(n_ctx) = NonZeroU32::new(self.context_size) {
            config = config.with_context_size(n_ctx);
        }
        if let Some(max_tokens) = NonZeroU32::new(self.max_tokens) {
            config = config.with_max_tokens(max_tokens);
        }
        config
    }
}

/// Get the settings file path
fn get_settings_path() -> Result<PathBuf, StorageError> {
    Ok(get_data_dir()?.join("settings.json"))
}

/// Load settings from disk
///
/// Returns default settings if the file doesn't exist or is corrupted
pub fn load_settings() -> ClassifierSettings {
    match get_settings_path().and_then(|path| load_settings_from(&path)) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Failed to load settings, using defaults: {}", e);
            ClassifierSettings::default()
        }
    }
}

/// Load settings from `path`, validating them
pub fn load_settings_from(path: &Path) -> Result<ClassifierSettings, StorageError> {
    if !path.exists() {
        tracing::info!("Settings file not found, using defaults");
        return Ok(ClassifierSettings::default());
    }

    let json = fs::read_to_string(path)?;
    let mut settings: ClassifierSettings = serde_json::from_str(&json)?;
    settings.validate();

    tracing::debug!("Loaded settings from {}", path.display());
    Ok(settings)
}

/// Save settings to disk
pub fn save_settings(settings: &ClassifierSettings) -> Result<(), StorageError> {
    save_settings_to(settings, &get_settings_path()?)
}

/// Save settings to `path`, creating parent directories
pub fn save_settings_to(settings: &ClassifierSettings, path: &Path) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json)?;

    tracing::debug!("Saved settings to {}", path.display());
    Ok(())
}
