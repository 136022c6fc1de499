use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(pub String);

impl StageId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One discrete phase of the Open Negotiation workflow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStage {
    pub id: StageId,
    pub name: String,
    pub description: String,
    /// Stages that must be completed before this one, in order.
    #[serde(default)]
    pub prerequisite_stage_ids: Vec<StageId>,
    /// Lowercase fragments matched against normalized utterances.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Fact keys that must be known before the stage can be handed off.
    #[serde(default)]
    pub required_parameters: Vec<String>,
}

impl WorkflowStage {
    pub fn completion_fact_key(&self) -> String {
        completion_fact_key(&self.id)
    }
}

pub fn completion_fact_key(stage_id: &StageId) -> String {
    format!("completed.{}", stage_id.0)
}
