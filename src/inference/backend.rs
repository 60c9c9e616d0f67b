//! Inference backend seam
//!
//! The engine is generic over the external model runtime. A backend knows how to
//! bring its process runtime up, parse a model file, bind an evaluation context
//! to a model and run one classification against that pair.

use thiserror::Error;

use crate::inference::config::ModelConfiguration;
use crate::types::{ClassificationRequest, ClassificationResult};

/// Errors reported by a backend
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BackendError {
    #[error("Failed to initialize backend runtime: {0}")]
    Runtime(String),

    #[error("Failed to load model: {0}")]
    Model(String),

    #[error("Failed to create context: {0}")]
    Context(String),

    #[error("Inference failed: {0}")]
    Inference(String),
}

/// External model runtime used by [`InferenceEngine`](crate::inference::InferenceEngine)
///
/// Implementations are shared across caller threads, but the engine never calls
/// `load_model`, `create_context` or `infer` concurrently for the same engine.
pub trait InferenceBackend: Send + Sync {
    /// Parsed model weights and metadata
    type Model: Send;
    /// Per-session evaluation state bound to one model
    type Context: Send;

    /// Brings up process-wide runtime state.
    ///
    /// Called before every fresh load; implementations must initialize at most
    /// once per process and return `Ok(())` on later calls.
    fn init_runtime(&self) -> Result<(), BackendError>;

    /// Loads the model file named by `config`
    fn load_model(&self, config: &ModelConfiguration) -> Result<Self::Model, BackendError>;

    /// Creates an evaluation context for `model`
    fn create_context(
        &self,
        model: &Self::Model,
        config: &ModelConfiguration,
    ) -> Result<Self::Context, BackendError>;

    /// Runs one classification.
    ///
    /// A failure must leave `context` usable for the next call.
    fn infer(
        &self,
        model: &Self::Model,
        context: &mut Self::Context,
        config: &ModelConfiguration,
        request: &ClassificationRequest,
    ) -> Result<ClassificationResult, BackendError>;
}
