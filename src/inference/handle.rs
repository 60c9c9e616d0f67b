//! Model handle
//!
//! Pairs a loaded model with the evaluation context created from it so the two
//! are always built and released together.

use crate::inference::backend::{BackendError, InferenceBackend};
use crate::inference::config::ModelConfiguration;
use crate::inference::engine::LoadError;
use crate::types::{ClassificationRequest, ClassificationResult};

/// Scoped ownership of one model and its evaluation context
///
/// Either both resources are live or the handle does not exist. Dropping the
/// handle releases the context first, then the model.
pub(crate) struct ModelHandle<B: InferenceBackend> {
    // Field order is drop order: the context must go before the model it borrows from.
    context: B::Context,
    model: B::Model,
    config: ModelConfiguration,
}

impl<B: InferenceBackend> ModelHandle<B> {
    /// Loads the model and binds a fresh context to it.
    ///
    /// If the context cannot be created, the already loaded model is released
    /// before the error is returned.
    pub(crate) fn open(backend: &B, config: &ModelConfiguration) -> Result<Self, LoadError> {
        let model = backend
            .load_model(config)
            .map_err(|e| LoadError::ModelLoadFailed(e.to_string()))?;

        let context = match backend.create_context(&model, config) {
            Ok(context) => context,
            Err(e) => {
                drop(model);
                tracing::debug!("Released partially loaded model after context failure");
                return Err(LoadError::ContextInitFailed(e.to_string()));
            }
        };

        Ok(Self {
            context,
            model,
            config: config.clone(),
        })
    }

    /// Runs one classification against the held model and context
    pub(crate) fn infer(
        &mut self,
        backend: &B,
        request: &ClassificationRequest,
    ) -> Result<ClassificationResult, BackendError> {
        backend.infer(&self.model, &mut self.context, &self.config, request)
    }

    /// Configuration this handle was built from
    pub(crate) fn config(&self) -> &ModelConfiguration {
        &self.config
    }
}
