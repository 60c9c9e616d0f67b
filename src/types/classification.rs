//! Classification types
//!
//! Data carried across the engine boundary: requests, results and the engine state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Category assigned to a piece of text
///
/// The two well-known labels get their own variants; anything else a model
/// emits is kept verbatim in [`Label::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Label {
    /// Text classified as hate speech
    Hate,
    /// Text classified as not hate speech
    NotHate,
    /// Any other label from an open label set
    Other(String),
}

impl Label {
    /// Parses a raw label, normalizing the common spellings of the two known labels.
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "hate" => Label::Hate,
            "not_hate" | "nothate" | "non_hate" => Label::NotHate,
            _ => Label::Other(raw.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Label::Hate => "hate",
            Label::NotHate => "not_hate",
            Label::Other(s) => s,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_str().is_empty()
    }
}

impl From<String> for Label {
    fn from(raw: String) -> Self {
        Label::parse(&raw)
    }
}

impl From<Label> for String {
    fn from(label: Label) -> Self {
        label.as_str().to_string()
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A text span to classify, with an optional instruction prompt
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClassificationRequest {
    text: String,
    prompt: String,
}

impl ClassificationRequest {
    /// Creates a request that uses the default classification prompt
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            prompt: String::new(),
        }
    }

    /// Sets the classification instruction
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Instruction prompt; empty when the caller did not supply one
    pub fn prompt(&self) -> &str {
        &self.prompt
    }
}

/// Label and confidence produced by one classification
///
/// Serializes to exactly `{"label": .., "score": ..}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Classification label
    pub label: Label,
    /// Confidence score (0.0-1.0)
    pub score: f32,
}

impl ClassificationResult {
    /// Creates a result, clamping the score into [0.0, 1.0]
    ///
    /// Returns `None` when the score is not a finite number.
    pub fn new(label: Label, score: f32) -> Option<Self> {
        if !score.is_finite() {
            return None;
        }
        Some(Self {
            label,
            score: score.clamp(0.0, 1.0),
        })
    }
}

/// Lifecycle state of an inference engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No model is held; classify is rejected
    Unloaded,
    /// A model and its evaluation context are live
    Loaded,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_parse_known() {
        assert_eq!(Label::parse("hate"), Label::Hate);
        assert_eq!(Label::parse(" HATE "), Label::Hate);
        assert_eq!(Label::parse("not_hate"), Label::NotHate);
        assert_eq!(Label::parse("Not Hate"), Label::NotHate);
        assert_eq!(Label::parse("not-hate"), Label::NotHate);
    }

    #[test]
    fn test_label_parse_open_set() {
        assert_eq!(Label::parse("positive"), Label::Other("positive".to_string()));
        assert_eq!(Label::parse("positive").as_str(), "positive");
    }

    #[test]
    fn test_result_serializes_two_fields() {
        let result = ClassificationResult::new(Label::Hate, 0.85).unwrap();
        let value: serde_json::Value = serde_json::to_value(&result).unwrap();
        let obj = value.as_object().unwrap();

        assert_eq!(obj.len(), 2);
        assert_eq!(obj["label"], "hate");
        assert!((obj["score"].as_f64().unwrap() - 0.85).abs() < 1e-6);
    }

    #[test]
    fn test_result_deserializes_label_string() {
        let result: ClassificationResult =
            serde_json::from_str(r#"{"label":"not_hate","score":0.1}"#).unwrap();
        assert_eq!(result.label, Label::NotHate);
    }

    #[test]
    fn test_result_clamps_and_rejects_nan() {
        assert_eq!(ClassificationResult::new(Label::Hate, 1.7).unwrap().score, 1.0);
        assert_eq!(ClassificationResult::new(Label::Hate, -0.2).unwrap().score, 0.0);
        assert!(ClassificationResult::new(Label::Hate, f32::NAN).is_none());
        assert!(ClassificationResult::new(Label::Hate, f32::INFINITY).is_none());
    }

    #[test]
    fn test_request_defaults_to_empty_prompt() {
        let request = ClassificationRequest::new("hello world");
        assert_eq!(request.text(), "hello world");
        assert!(request.prompt().is_empty());

        let request = request.with_prompt("classify sentiment");
        assert_eq!(request.prompt(), "classify sentiment");
    }
}
