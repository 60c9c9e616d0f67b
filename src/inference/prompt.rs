//! Prompt rendering and completion parsing
//!
//! Turns a request into the text fed to the model, and the model's completion
//! back into a label and score.

use std::num::NonZeroU32;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::IgnoredAny;
use serde::Deserialize;
use thiserror::Error;

use crate::types::{ClassificationResult, Label};

/// Placeholder replaced by the request text
pub const TEXT_PLACEHOLDER: &str = "{{text}}";

/// Prompt used when a request carries no instruction of its own
pub const DEFAULT_PROMPT: &str = "You are a strict hate-speech classifier. Output compact JSON only:\n\
{\"label\":\"hate|not_hate\",\"score\":0.0-1.0}\n\
Text: {{text}}";

/// Opening of a JSON object with at least one key
static OBJECT_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\{\s*""#).expect("object start pattern is valid"));

/// Prompt and generation do not fit the evaluation context
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BudgetError {
    #[error("prompt produced no tokens")]
    EmptyPrompt,

    #[error("prompt of {prompt_tokens} tokens plus {max_tokens} to generate exceeds n_ctx {n_ctx}")]
    ExceedsContext {
        prompt_tokens: usize,
        max_tokens: u32,
        n_ctx: u32,
    },
}

/// Errors raised while reading a model completion
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompletionError {
    #[error("no JSON object in completion: {0:?}")]
    NoJson(String),

    #[error("malformed verdict: {0}")]
    Malformed(String),

    #[error("empty label")]
    EmptyLabel,

    #[error("score is not a finite number")]
    InvalidScore,
}

#[derive(Debug, Deserialize)]
struct Verdict {
    label: String,
    score: f32,
}

/// Builds the model input for `text` from `prompt`.
///
/// An empty prompt selects [`DEFAULT_PROMPT`]. The first `{{text}}` in the
/// prompt is replaced by the text; a prompt without the placeholder gets the
/// text appended on its own line.
pub fn render(prompt: &str, text: &str) -> String {
    let template = if prompt.trim().is_empty() {
        DEFAULT_PROMPT
    } else {
        prompt
    };

    if template.contains(TEXT_PLACEHOLDER) {
        template.replacen(TEXT_PLACEHOLDER, text, 1)
    } else {
        format!("{}\nText: {}", template.trim_end(), text)
    }
}

/// Checks that `prompt_tokens` plus `max_tokens` fit in a context of `n_ctx`
pub fn check_budget(
    prompt_tokens: usize,
    max_tokens: NonZeroU32,
    n_ctx: u32,
) -> Result<(), BudgetError> {
    if prompt_tokens == 0 {
        return Err(BudgetError::EmptyPrompt);
    }
    let needed = prompt_tokens as u64 + u64::from(max_tokens.get());
    if needed > u64::from(n_ctx) {
        return Err(BudgetError::ExceedsContext {
            prompt_tokens,
            max_tokens: max_tokens.get(),
            n_ctx,
        });
    }
    Ok(())
}

/// First complete JSON object in `completion`, nested values included.
///
/// Candidates are tried in order. A candidate that is still open at the end of
/// the text stops the search, so an inner object never stands in for an
/// unfinished outer one.
fn first_object(completion: &str) -> Option<&str> {
    for start in OBJECT_START.find_iter(completion) {
        let rest = &completion[start.start()..];
        let mut values = serde_json::Deserializer::from_str(rest).into_iter::<IgnoredAny>();
        match values.next() {
            Some(Ok(_)) => return Some(&rest[..values.byte_offset()]),
            Some(Err(e)) if e.is_eof() => return None,
            _ => continue,
        }
    }
    None
}

/// Returns true once `completion` holds a closed JSON object
pub fn is_complete(completion: &str) -> bool {
    first_object(completion).is_some()
}

/// Parses a completion such as `{"label":"hate","score":0.85}`.
///
/// Surrounding prose or code fences are ignored; only the first JSON object is
/// read and keys other than `label` and `score` are skipped. Scores outside
/// [0, 1] are clamped.
pub fn parse_completion(completion: &str) -> Result<ClassificationResult, CompletionError> {
    let object = first_object(completion)
        .ok_or_else(|| CompletionError::NoJson(completion.trim().to_string()))?;

    let verdict: Verdict = serde_json::from_str(object)
        .map_err(|e| CompletionError::Malformed(e.to_string()))?;

    let label = Label::parse(&verdict.label);
    if label.is_empty() {
        return Err(CompletionError::EmptyLabel);
    }

    ClassificationResult::new(label, verdict.score).ok_or(CompletionError::InvalidScore)
}
