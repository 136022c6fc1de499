use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::action::DialogueAction;
use crate::domain::conversation::ConversationId;
use crate::domain::stage::StageId;

/// Payload passed downstream when a conversation finalizes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowHandoff {
    pub conversation_id: ConversationId,
    pub resolved_stage_id: StageId,
    pub resolved_parameters: BTreeMap<String, String>,
    pub missing_parameters: Vec<String>,
    pub handed_off_at: DateTime<Utc>,
}

impl WorkflowHandoff {
    /// `None` unless `action` is a finalize.
    pub fn from_action(conversation_id: &ConversationId, action: &DialogueAction) -> Option<Self> {
        match action {
            DialogueAction::Finalize { resolved_stage_id, resolved_parameters, missing_parameters } => {
                Some(Self {
                    conversation_id: conversation_id.clone(),
                    resolved_stage_id: resolved_stage_id.clone(),
                    resolved_parameters: resolved_parameters.clone(),
                    missing_parameters: missing_parameters.clone(),
                    handed_off_at: Utc::now(),
                })
            }
            _ => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.missing_parameters.is_empty()
    }
}

pub trait HandoffSink: Send + Sync {
    fn hand_off(&self, handoff: WorkflowHandoff);
}

#[derive(Clone, Default)]
pub struct InMemoryHandoffSink {
    handoffs: Arc<Mutex<Vec<WorkflowHandoff>>>,
}

impl InMemoryHandoffSink {
    pub fn handoffs(&self) -> Vec<WorkflowHandoff> {
        match self.handoffs.lock() {
            Ok(handoffs) => handoffs.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl HandoffSink for InMemoryHandoffSink {
    fn hand_off(&self, handoff: WorkflowHandoff) {
        match self.handoffs.lock() {
            Ok(mut handoffs) => handoffs.push(handoff),
            Err(poisoned) => poisoned.into_inner().push(handoff),
        }
    }
}
