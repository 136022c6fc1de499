//! Semantic equality of clarifying questions.

use serde::{Deserialize, Serialize};

use crate::domain::action::Question;
use crate::text::{content_tokens, jaccard};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupMethod {
    /// Equal structured signatures.
    #[default]
    Signature,
    /// Equal signatures, or near-identical wording.
    Lexical,
}

impl DedupMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Signature => "signature",
            Self::Lexical => "lexical",
        }
    }
}

impl std::str::FromStr for DedupMethod {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "signature" => Ok(Self::Signature),
            "lexical" => Ok(Self::Lexical),
            other => Err(format!("unknown dedup method `{other}`")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DedupPolicy {
    pub method: DedupMethod,
    /// Minimum token-set Jaccard for two wordings to count as the same question.
    pub similarity_threshold: f64,
}

impl Default for DedupPolicy {
    fn default() -> Self {
        Self { method: DedupMethod::Signature, similarity_threshold: 0.8 }
    }
}

impl DedupPolicy {
    pub fn new(method: DedupMethod, similarity_threshold: f64) -> Self {
        Self { method, similarity_threshold }
    }

    pub fn is_same(&self, left: &Question, right: &Question) -> bool {
        if left.signature == right.signature {
            return true;
        }
        match self.method {
            DedupMethod::Signature => false,
            DedupMethod::Lexical => {
                jaccard(&content_tokens(&left.text), &content_tokens(&right.text))
                    >= self.similarity_threshold
            }
        }
    }

    pub fn contains(&self, asked: &[Question], candidate: &Question) -> bool {
        asked.iter().any(|previous| self.is_same(previous, candidate))
    }
}
