//! Model configuration
//!
//! Immutable description of which model file to load and how to size its context.

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};

/// Default evaluation context size in tokens
pub const DEFAULT_CONTEXT_SIZE: NonZeroU32 = match NonZeroU32::new(1024) {
    Some(n) => n,
    None => unreachable!(),
};

/// Default upper bound on tokens generated per classification
pub const DEFAULT_MAX_TOKENS: NonZeroU32 = match NonZeroU32::new(48) {
    Some(n) => n,
    None => unreachable!(),
};

/// Configuration used to load a model and size its evaluation context
///
/// Values are fixed once constructed; the `with_*` methods consume the
/// configuration and return a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfiguration {
    file_path: PathBuf,
    context_size: NonZeroU32,
    gpu_layers: u32,
    max_tokens: NonZeroU32,
}

impl ModelConfiguration {
    /// Creates a configuration for the model at `file_path` with default sizing
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            context_size: DEFAULT_CONTEXT_SIZE,
            gpu_layers: 0,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_context_size(mut self, context_size: NonZeroU32) -> Self {
        self.context_size = context_size;
        self
    }

    /// Number of layers to offload to GPU (0 = CPU only)
    pub fn with_gpu_layers(mut self, gpu_layers: u32) -> Self {
        self.gpu_layers = gpu_layers;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: NonZeroU32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn context_size(&self) -> NonZeroU32 {
        self.context_size
    }

    pub fn gpu_layers(&self) -> u32 {
        self.gpu_layers
    }

    pub fn max_tokens(&self) -> NonZeroU32 {
        self.max_tokens
    }
}
