//! Text classification inference
//!
//! This module owns the model lifecycle and the seam to the external model runtime.

pub mod backend;
pub mod config;
pub mod engine;
pub mod gguf;
mod handle;
pub mod lexicon;
#[cfg(feature = "llama")]
pub mod llama;
pub mod prompt;
pub mod runtime;

// Re-export main types for convenience
pub use backend::{BackendError, InferenceBackend};
pub use config::ModelConfiguration;
pub use engine::{ClassifyError, InferenceEngine, LoadError, LoadOutcome};
pub use gguf::{read_header, GgufError, GgufHeader, GGUF_MAGIC};
pub use lexicon::LexiconBackend;
#[cfg(feature = "llama")]
pub use llama::LlamaCppBackend;
pub use prompt::DEFAULT_PROMPT;
