//! Shared data types

pub mod classification;

pub use classification::{ClassificationRequest, ClassificationResult, EngineState, Label};
