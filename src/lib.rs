//! NoHate classification core
//!
//! In-process text classification: load a language model once, classify many
//! texts against it from any thread, release it when done.

pub mod bridge;
pub mod inference;
pub mod lexicon;
pub mod storage;
pub mod types;

pub use bridge::Bridge;
pub use inference::{ClassifyError, InferenceEngine, LoadError, ModelConfiguration};
pub use types::{ClassificationRequest, ClassificationResult, EngineState, Label};

/// Safely truncate a string at a char boundary, never panics.
pub fn truncate_str(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    // Walk backwards from max_bytes to find a valid char boundary
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
