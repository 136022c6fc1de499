use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::stage::StageId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    OutOfScope,
    VagueInScope,
    TooBroad,
    WellSpecified,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OutOfScope => "OUT_OF_SCOPE",
            Self::VagueInScope => "VAGUE_IN_SCOPE",
            Self::TooBroad => "TOO_BROAD",
            Self::WellSpecified => "WELL_SPECIFIED",
        }
    }

    pub fn is_in_scope(&self) -> bool {
        !matches!(self, Self::OutOfScope)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "OUT_OF_SCOPE" => Ok(Self::OutOfScope),
            "VAGUE_IN_SCOPE" | "VAGUE" => Ok(Self::VagueInScope),
            "TOO_BROAD" => Ok(Self::TooBroad),
            "WELL_SPECIFIED" => Ok(Self::WellSpecified),
            other => Err(format!("unknown classification category `{other}`")),
        }
    }
}

/// Outcome of classifying one utterance. Never mutated after creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub category: Category,
    /// Stage ids in taxonomy order.
    pub matched_stage_ids: Vec<StageId>,
    /// Clamped to `0.0..=1.0`.
    pub confidence: f64,
    pub rationale: String,
    /// Facts extracted from this utterance only.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    /// Stages loosely related to an out-of-scope request, best first. Used for redirects.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_stage_ids: Vec<StageId>,
}

impl ClassificationResult {
    pub fn new(
        category: Category,
        matched_stage_ids: Vec<StageId>,
        confidence: f64,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            category,
            matched_stage_ids,
            confidence: confidence.clamp(0.0, 1.0),
            rationale: rationale.into(),
            parameters: BTreeMap::new(),
            related_stage_ids: Vec::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: BTreeMap<String, String>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_related_stages(mut self, related_stage_ids: Vec<StageId>) -> Self {
        self.related_stage_ids = related_stage_ids;
        self
    }

    pub fn single_stage(&self) -> Option<&StageId> {
        match self.matched_stage_ids.as_slice() {
            [stage_id] => Some(stage_id),
            _ => None,
        }
    }
}
