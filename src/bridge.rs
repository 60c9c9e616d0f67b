//! Host boundary
//!
//! Flat functions a platform binding (JNI, FFI) can call without knowing the
//! engine's types: loading collapses to a boolean and classification to a JSON
//! string. Failures are logged with their specific kind before collapsing.

use std::path::Path;

use serde::Serialize;

use crate::inference::{
    ClassifyError, InferenceBackend, InferenceEngine, LoadOutcome, ModelConfiguration,
};
use crate::lexicon::{self, Lexicon};
use crate::storage::settings::ClassifierSettings;
use crate::types::{ClassificationRequest, ClassificationResult};

/// Error code returned by [`Bridge::classify`] when no model is loaded
pub const NOT_LOADED: &str = "not_loaded";
/// Error code returned by [`Bridge::classify`] when inference fails
pub const INFERENCE_FAILED: &str = "inference_failed";

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

fn error_json(code: &str) -> String {
    serde_json::to_string(&ErrorBody { error: code })
        .unwrap_or_else(|_| format!("{{\"error\":\"{code}\"}}"))
}

fn result_json(result: &ClassificationResult) -> String {
    serde_json::to_string(result).unwrap_or_else(|e| {
        tracing::error!("Failed to serialize classification result: {e}");
        error_json(INFERENCE_FAILED)
    })
}

/// Boolean/JSON facade over an [`InferenceEngine`]
pub struct Bridge<B: InferenceBackend> {
    engine: InferenceEngine<B>,
    settings: ClassifierSettings,
}

impl<B: InferenceBackend> Bridge<B> {
    pub fn new(backend: B) -> Self {
        Self::with_settings(backend, ClassifierSettings::default())
    }

    pub fn with_settings(backend: B, mut settings: ClassifierSettings) -> Self {
        settings.validate();
        Self {
            engine: InferenceEngine::new(backend),
            settings,
        }
    }

    /// Loads the model at `path`
    ///
    /// Returns true on success or if a model is already loaded, false on any
    /// failure. A fresh load is followed by a best-effort warm-up run when
    /// enabled in the settings.
    pub fn load_model(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();

        match self.engine.try_load(self.configuration(path)) {
            Ok(outcome) => {
                if outcome == LoadOutcome::Loaded && self.settings.warmup {
                    self.warm_up();
                }
                true
            }
            Err(e) => {
                tracing::warn!("load_model({}) failed: {}", path.display(), e);
                false
            }
        }
    }

    /// Classifies `text`, returning `{"label":..,"score":..}` or `{"error":..}`
    ///
    /// An empty `prompt` falls back to the prompt from the settings.
    pub fn classify(&self, text: &str, prompt: &str) -> String {
        let prompt = if prompt.trim().is_empty() {
            self.settings.prompt.as_str()
        } else {
            prompt
        };
        let request = ClassificationRequest::new(text).with_prompt(prompt);

        match self.engine.classify(&request) {
            Ok(result) => result_json(&result),
            Err(ClassifyError::NotLoaded) => {
                tracing::debug!("classify called before a model was loaded");
                error_json(NOT_LOADED)
            }
            Err(e @ ClassifyError::InferenceError(_)) => {
                tracing::warn!("classify failed: {}", e);
                error_json(INFERENCE_FAILED)
            }
        }
    }

    /// Releases the loaded model, if any
    pub fn unload_model(&self) {
        self.engine.unload();
    }

    pub fn is_loaded(&self) -> bool {
        self.engine.is_loaded()
    }

    /// The engine behind this bridge
    pub fn engine(&self) -> &InferenceEngine<B> {
        &self.engine
    }

    fn configuration(&self, path: &Path) -> ModelConfiguration {
        self.settings.model_configuration(path)
    }

    fn warm_up(&self) {
        let request =
            ClassificationRequest::new("warmup").with_prompt(self.settings.prompt.clone());
        match self.engine.classify(&request) {
            Ok(_) => tracing::debug!("Warm-up classification done"),
            Err(e) => tracing::debug!("Warm-up classification failed: {}", e),
        }
    }
}

/// Built-in rules score of `text` in [0.0, 1.0]
pub fn score_text(text: &str) -> f32 {
    lexicon::base_score(text)
}

/// Rules score of `text` with the user's hate and safe phrases applied
pub fn score_text_with_lexicon<H, S>(text: &str, user_hate: &[H], user_safe: &[S]) -> f32
where
    H: AsRef<str>,
    S: AsRef<str>,
{
    Lexicon::new(user_hate, user_safe).score(text)
}

#[cfg(feature = "llama")]
mod shared {
    use once_cell::sync::Lazy;

    use super::Bridge;
    use crate::inference::LlamaCppBackend;
    use crate::storage::settings::load_settings;

    static SHARED: Lazy<Bridge<LlamaCppBackend>> =
        Lazy::new(|| Bridge::with_settings(LlamaCppBackend::new(), load_settings()));

    /// Process-wide bridge for platform bindings
    ///
    /// Created on first use with the persisted settings.
    pub fn shared() -> &'static Bridge<LlamaCppBackend> {
        &SHARED
    }

    /// [`Bridge::load_model`] on the shared bridge
    pub fn load_model(path: &str) -> bool {
        shared().load_model(path)
    }

    /// [`Bridge::classify`] on the shared bridge
    pub fn classify(text: &str, prompt: &str) -> String {
        shared().classify(text, prompt)
    }

    /// [`Bridge::unload_model`] on the shared bridge
    pub fn unload_model() {
        shared().unload_model()
    }
}

#[cfg(feature = "llama")]
pub use shared::{classify, load_model, shared, unload_model};
