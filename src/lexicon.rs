//! Weighted keyword scorer
//!
//! Fast rules-based hate score used where no language model is available. A
//! built-in list of phrases and words contributes fixed weights; a user lexicon
//! can push scores up (hate phrases) or down (safe phrases).

use serde::{Deserialize, Serialize};

/// Multi-word phrases and their weights
const BASE_PHRASES: [(&str, f32); 8] = [
    ("fuck you", 0.9),
    ("kill yourself", 1.0),
    ("go die", 0.95),
    ("stupid bitch", 0.95),
    ("you people", 0.6),
    ("dirty", 0.5),
    ("get out", 0.4),
    ("go back", 0.5),
];

/// Single words and their weights
const BASE_WORDS: [(&str, f32); 12] = [
    ("awful", 0.5),
    ("toxic", 0.6),
    ("abuse", 0.7),
    ("hate", 0.7),
    ("kill", 0.9),
    ("die", 0.8),
    ("bitch", 0.8),
    ("slur", 0.7),
    ("idiot", 0.5),
    ("dumb", 0.4),
    ("stupid", 0.5),
    ("trash", 0.4),
];

/// Weight added for each user hate phrase found in the text
pub const USER_HATE_WEIGHT: f32 = 0.6;
/// Weight removed for each user safe phrase found in the text
pub const USER_SAFE_WEIGHT: f32 = 0.4;
/// Scores at or above this are labelled hate
pub const HATE_THRESHOLD: f32 = 0.5;

/// Built-in score of `text`, capped at 1.0
///
/// Matching is case-insensitive substring containment.
pub fn base_score(text: &str) -> f32 {
    let normalized = text.to_lowercase();
    let score: f32 = BASE_PHRASES
        .iter()
        .chain(BASE_WORDS.iter())
        .filter(|(needle, _)| normalized.contains(needle))
        .map(|(_, weight)| weight)
        .sum();
    score.min(1.0)
}

/// Per-user additions to the built-in lists
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Lexicon {
    /// Phrases the user considers hateful
    #[serde(default)]
    pub hate: Vec<String>,
    /// Phrases the user considers safe
    #[serde(default)]
    pub safe: Vec<String>,
}

impl Lexicon {
    /// Builds a lexicon, lowercasing and dropping blank phrases
    pub fn new<H, S>(hate: H, safe: S) -> Self
    where
        H: IntoIterator,
        H::Item: AsRef<str>,
        S: IntoIterator,
        S::Item: AsRef<str>,
    {
        Self {
            hate: normalize(hate),
            safe: normalize(safe),
        }
    }

    /// Same lexicon with every phrase lowercased and blanks removed
    pub fn normalized(self) -> Self {
        Self {
            hate: normalize(self.hate),
            safe: normalize(self.safe),
        }
    }

    /// Score of `text` in [0.0, 1.0], user phrases included
    pub fn score(&self, text: &str) -> f32 {
        let normalized = text.to_lowercase();
        let hits = |phrases: &[String]| {
            phrases
                .iter()
                .filter(|phrase| normalized.contains(phrase.as_str()))
                .count() as f32
        };

        let score = base_score(text) + USER_HATE_WEIGHT * hits(&self.hate)
            - USER_SAFE_WEIGHT * hits(&self.safe);
        score.clamp(0.0, 1.0)
    }
}

fn normalize<I>(phrases: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    phrases
        .into_iter()
        .map(|p| p.as_ref().trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text_scores_zero() {
        assert_eq!(base_score("have a lovely day"), 0.0);
    }

    #[test]
    fn test_single_word_weight() {
        assert!((base_score("what an idiot") - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_case_insensitive_and_capped() {
        assert_eq!(base_score("KILL YOURSELF you stupid bitch"), 1.0);
    }

    #[test]
    fn test_phrase_and_word_overlap_both_count() {
        // "go die" also contains "die"
        assert_eq!(base_score("go die"), 1.0);
        assert!((base_score("get out") - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_user_hate_phrase_raises_score() {
        let lexicon = Lexicon::new(["Clown"], Vec::<String>::new());
        assert!((lexicon.score("you clown") - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_user_safe_phrase_lowers_score() {
        let lexicon = Lexicon::new(Vec::<String>::new(), ["killer app"]);
        // kill 0.9 - 0.4
        assert!((lexicon.score("this is a killer app") - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_score_never_negative() {
        let lexicon = Lexicon::new(Vec::<String>::new(), ["hello", "world"]);
        assert_eq!(lexicon.score("hello world"), 0.0);
    }

    #[test]
    fn test_blank_phrases_dropped() {
        let lexicon = Lexicon::new(["  ", "Troll "], [""]);
        assert_eq!(lexicon.hate, vec!["troll".to_string()]);
        assert!(lexicon.safe.is_empty());
    }

    #[test]
    fn test_deserializes_partial_lexicon() {
        let lexicon: Lexicon = serde_json::from_str(r#"{"hate":["Clown"]}"#).unwrap();
        let lexicon = lexicon.normalized();
        assert_eq!(lexicon.hate, vec!["clown".to_string()]);
        assert!(lexicon.safe.is_empty());
    }
}
