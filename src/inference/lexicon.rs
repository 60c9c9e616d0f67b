//! Lexicon backend
//!
//! Model-free [`InferenceBackend`]: the "model file" is a JSON user lexicon
//! (`{"hate": [...], "safe": [...]}`) and inference is the weighted keyword
//! score from [`crate::lexicon`]. Useful on devices that have not downloaded a
//! GGUF model yet.

use std::fs;

use crate::inference::backend::{BackendError, InferenceBackend};
use crate::inference::config::ModelConfiguration;
use crate::lexicon::{Lexicon, HATE_THRESHOLD};
use crate::types::{ClassificationRequest, ClassificationResult, Label};

/// Per-load scoring state
#[derive(Debug, Clone)]
pub struct LexiconSession {
    threshold: f32,
    classified: u64,
}

impl LexiconSession {
    /// Number of texts scored with this session
    pub fn classified(&self) -> u64 {
        self.classified
    }
}

/// [`InferenceBackend`] that scores text against a keyword lexicon
#[derive(Debug, Clone, Copy)]
pub struct LexiconBackend {
    threshold: f32,
}

impl LexiconBackend {
    pub fn new() -> Self {
        Self {
            threshold: HATE_THRESHOLD,
        }
    }

    /// Score at or above which text is labelled hate
    pub fn with_threshold(threshold: f32) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
        }
    }
}

impl Default for LexiconBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for LexiconBackend {
    type Model = Lexicon;
    type Context = LexiconSession;

    fn init_runtime(&self) -> Result<(), BackendError> {
        Ok(())
    }

    fn load_model(&self, config: &ModelConfiguration) -> Result<Lexicon, BackendError> {
        let json = fs::read_to_string(config.file_path())
            .map_err(|e| BackendError::Model(e.to_string()))?;
        let lexicon: Lexicon = serde_json::from_str(&json)
            .map_err(|e| BackendError::Model(format!("invalid lexicon: {e}")))?;
        let lexicon = lexicon.normalized();

        tracing::info!(
            "Lexicon loaded: {} hate / {} safe phrases",
            lexicon.hate.len(),
            lexicon.safe.len()
        );
        Ok(lexicon)
    }

    fn create_context(
        &self,
        _model: &Lexicon,
        _config: &ModelConfiguration,
    ) -> Result<LexiconSession, BackendError> {
        Ok(LexiconSession {
            threshold: self.threshold,
            classified: 0,
        })
    }

    fn infer(
        &self,
        model: &Lexicon,
        session: &mut LexiconSession,
        _config: &ModelConfiguration,
        request: &ClassificationRequest,
    ) -> Result<ClassificationResult, BackendError> {
        let score = model.score(request.text());
        let label = if score >= session.threshold {
            Label::Hate
        } else {
            Label::NotHate
        };
        session.classified += 1;

        ClassificationResult::new(label, score).ok_or_else(|| {
            BackendError::Inference("lexicon produced a non-finite score".to_string())
        })
    }
}
