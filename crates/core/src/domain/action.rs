use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::stage::StageId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Redirect,
    NarrowQuestion,
    PhaseBreakdown,
    Finalize,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Redirect => "redirect",
            Self::NarrowQuestion => "narrow_question",
            Self::PhaseBreakdown => "phase_breakdown",
            Self::Finalize => "finalize",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Angle a clarifying question takes. Consecutive questions in one
/// conversation rotate through these.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    Goal,
    Process,
    Scope,
    Timeline,
    /// Escape-valve prompt asking the user to pick exactly one stage.
    Selection,
}

impl QuestionType {
    pub const ROTATION: [QuestionType; 4] =
        [QuestionType::Goal, QuestionType::Process, QuestionType::Scope, QuestionType::Timeline];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Goal => "goal",
            Self::Process => "process",
            Self::Scope => "scope",
            Self::Timeline => "timeline",
            Self::Selection => "selection",
        }
    }

    /// Rotation order beginning at `self`.
    pub fn rotation_from(self) -> Vec<QuestionType> {
        let start = Self::ROTATION.iter().position(|kind| *kind == self).unwrap_or(0);
        Self::ROTATION.iter().cycle().skip(start).take(Self::ROTATION.len()).copied().collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum QuestionFocus {
    Stage,
    Parameter(String),
    Details,
    Confirmation,
}

/// Semantic key of a clarifying question, independent of its wording.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuestionSignature {
    pub action: ActionKind,
    pub question_type: QuestionType,
    pub focus: QuestionFocus,
    /// Sorted so the same stage set always yields the same key.
    pub stage_ids: Vec<StageId>,
}

impl QuestionSignature {
    pub fn new(
        action: ActionKind,
        question_type: QuestionType,
        focus: QuestionFocus,
        stage_ids: &[StageId],
    ) -> Self {
        let mut stage_ids = stage_ids.to_vec();
        stage_ids.sort();
        stage_ids.dedup();
        Self { action, question_type, focus, stage_ids }
    }
}

impl fmt::Display for QuestionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let focus = match &self.focus {
            QuestionFocus::Stage => "stage".to_string(),
            QuestionFocus::Parameter(name) => format!("parameter:{name}"),
            QuestionFocus::Details => "details".to_string(),
            QuestionFocus::Confirmation => "confirmation".to_string(),
        };
        let stages = self.stage_ids.iter().map(StageId::as_str).collect::<Vec<_>>().join(",");
        write!(f, "{}/{}/{}/[{}]", self.action, self.question_type.as_str(), focus, stages)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub signature: QuestionSignature,
    pub text: String,
}

impl Question {
    pub fn new(signature: QuestionSignature, text: impl Into<String>) -> Self {
        Self { signature, text: text.into() }
    }
}

/// Next dialogue move. Produced fresh every turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DialogueAction {
    Redirect {
        suggested_stage_ids: Vec<StageId>,
    },
    NarrowQuestion {
        question: Question,
        targeted_stage_ids: Vec<StageId>,
    },
    PhaseBreakdown {
        candidate_stage_ids: Vec<StageId>,
        question: Question,
        /// Set when the round limit forced the breakdown.
        forced: bool,
    },
    Finalize {
        resolved_stage_id: StageId,
        resolved_parameters: BTreeMap<String, String>,
        /// Required parameters still unknown; only non-empty after a forced breakdown.
        missing_parameters: Vec<String>,
    },
}

impl DialogueAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Redirect { .. } => ActionKind::Redirect,
            Self::NarrowQuestion { .. } => ActionKind::NarrowQuestion,
            Self::PhaseBreakdown { .. } => ActionKind::PhaseBreakdown,
            Self::Finalize { .. } => ActionKind::Finalize,
        }
    }

    pub fn question(&self) -> Option<&Question> {
        match self {
            Self::NarrowQuestion { question, .. } | Self::PhaseBreakdown { question, .. } => {
                Some(question)
            }
            Self::Redirect { .. } | Self::Finalize { .. } => None,
        }
    }

    pub fn stage_ids(&self) -> Vec<StageId> {
        match self {
            Self::Redirect { suggested_stage_ids } => suggested_stage_ids.clone(),
            Self::NarrowQuestion { targeted_stage_ids, .. } => targeted_stage_ids.clone(),
            Self::PhaseBreakdown { candidate_stage_ids, .. } => candidate_stage_ids.clone(),
            Self::Finalize { resolved_stage_id, .. } => vec![resolved_stage_id.clone()],
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finalize { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::{ActionKind, QuestionFocus, QuestionSignature, QuestionType};
    use crate::domain::stage::StageId;

    #[test]
    fn signature_ignores_stage_order() {
        let forward = QuestionSignature::new(
            ActionKind::PhaseBreakdown,
            QuestionType::Goal,
            QuestionFocus::Stage,
            &[StageId::new("email_dispatch"), StageId::new("document_creation")],
        );
        let reverse = QuestionSignature::new(
            ActionKind::PhaseBreakdown,
            QuestionType::Goal,
            QuestionFocus::Stage,
            &[StageId::new("document_creation"), StageId::new("email_dispatch")],
        );
        assert_eq!(forward, reverse);
        assert_eq!(
            forward.to_string(),
            "phase_breakdown/goal/stage/[document_creation,email_dispatch]"
        );
    }

    #[test]
    fn rotation_wraps_around() {
        assert_eq!(
            QuestionType::Scope.rotation_from(),
            vec![QuestionType::Scope, QuestionType::Timeline, QuestionType::Goal, QuestionType::Process]
        );
        assert_eq!(QuestionType::Selection.rotation_from()[0], QuestionType::Goal);
    }
}
