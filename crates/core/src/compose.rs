//! Request/response contract with the reasoning collaborator.
//!
//! Requests are built from structured state only. Replies are untrusted text
//! and pass through [`sanitize_reply`] plus a validator before use.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::classifier::SemanticHints;
use crate::domain::action::{ActionKind, DialogueAction};
use crate::domain::classification::Category;
use crate::domain::conversation::{ConversationId, ConversationState};
use crate::domain::stage::{StageId, WorkflowStage};
use crate::errors::CollaboratorError;
use crate::taxonomy::Taxonomy;
use crate::text::normalize;

const RECENT_UTTERANCES: usize = 4;
const RECENT_MESSAGES: usize = 3;

const CLASSIFY_INSTRUCTIONS: &str = "\
You classify a user's request against the Open Negotiation workflow stages listed in the payload.
Return ONLY one JSON object, no prose, with these fields:
  category: one of OUT_OF_SCOPE, VAGUE_IN_SCOPE, TOO_BROAD, WELL_SPECIFIED
  matched_stage_ids: stage ids the request is about (empty when out of scope)
  related_stage_ids: for out-of-scope requests, stage ids that are loosely related, best first
  confidence: number between 0 and 1
  rationale: one short sentence
  parameters: object with any of client_name (string) and wave_number (integer) stated by the user
Use only stage ids from the payload. Never invent parameters the user did not state.";

const COMPOSE_INSTRUCTIONS: &str = "\
You write the assistant's next chat message for an Open Negotiation routing assistant.
The payload holds the chosen action and the conversation so far. Rules:
- Express exactly the chosen action. For narrow_question and phase_breakdown, ask the given question and no other question.
- For phase_breakdown, list the candidate stages numbered 1, 2, 3... in the order given.
- For redirect, say the request is outside the workflow and mention the suggested stages, if any.
- For finalize, confirm the stage and parameters being handed off; mention missing parameters if listed.
- Do not repeat any previous assistant message. At most three sentences, plain text, no markdown headings.
- Reply with the message text only.";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollaboratorTask {
    Classify,
    Compose,
}

impl CollaboratorTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classify => "classify",
            Self::Compose => "compose",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StageExcerpt {
    pub id: StageId,
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub prerequisite_stage_ids: Vec<StageId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub required_parameters: Vec<String>,
}

impl From<&WorkflowStage> for StageExcerpt {
    fn from(stage: &WorkflowStage) -> Self {
        Self {
            id: stage.id.clone(),
            name: stage.name.clone(),
            description: stage.description.clone(),
            prerequisite_stage_ids: stage.prerequisite_stage_ids.clone(),
            required_parameters: stage.required_parameters.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DialogueContext {
    pub conversation_id: ConversationId,
    pub round_count: u32,
    pub recent_utterances: Vec<String>,
    pub known_facts: BTreeMap<String, String>,
    pub questions_asked: Vec<String>,
    pub previous_messages: Vec<String>,
}

impl DialogueContext {
    pub fn from_state(state: &ConversationState) -> Self {
        Self {
            conversation_id: state.conversation_id().clone(),
            round_count: state.round_count(),
            recent_utterances: tail(state.utterances().iter().map(|u| u.text.clone()), RECENT_UTTERANCES),
            known_facts: state.known_facts().clone(),
            questions_asked: state.questions_asked().iter().map(|q| q.text.clone()).collect(),
            previous_messages: tail(state.outbound_messages().iter().cloned(), RECENT_MESSAGES),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ActionBrief {
    pub kind: ActionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    pub stage_ids: Vec<StageId>,
    pub forced: bool,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub resolved_parameters: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_parameters: Vec<String>,
}

impl From<&DialogueAction> for ActionBrief {
    fn from(action: &DialogueAction) -> Self {
        let (forced, resolved_parameters, missing_parameters) = match action {
            DialogueAction::PhaseBreakdown { forced, .. } => (*forced, BTreeMap::new(), Vec::new()),
            DialogueAction::Finalize { resolved_parameters, missing_parameters, .. } => {
                (false, resolved_parameters.clone(), missing_parameters.clone())
            }
            DialogueAction::Redirect { .. } | DialogueAction::NarrowQuestion { .. } => {
                (false, BTreeMap::new(), Vec::new())
            }
        };
        Self {
            kind: action.kind(),
            question: action.question().map(|question| question.text.clone()),
            stage_ids: action.stage_ids(),
            forced,
            resolved_parameters,
            missing_parameters,
        }
    }
}

/// One structured request to the collaborator. Never carries free-form
/// instructions from the user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CollaboratorRequest {
    pub task: CollaboratorTask,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utterance: Option<String>,
    pub stages: Vec<StageExcerpt>,
    pub dialogue: DialogueContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionBrief>,
}

impl CollaboratorRequest {
    pub fn classify(taxonomy: &Taxonomy, state: &ConversationState, utterance: &str) -> Self {
        Self {
            task: CollaboratorTask::Classify,
            utterance: Some(utterance.to_string()),
            stages: taxonomy.stages().iter().map(StageExcerpt::from).collect(),
            dialogue: DialogueContext::from_state(state),
            action: None,
        }
    }

    /// Only the stages the action refers to are excerpted; a redirect with no
    /// suggestions gets the whole taxonomy.
    pub fn compose(taxonomy: &Taxonomy, state: &ConversationState, action: &DialogueAction) -> Self {
        let referenced = action.stage_ids();
        let stages = if referenced.is_empty() {
            taxonomy.stages().iter().map(StageExcerpt::from).collect()
        } else {
            referenced
                .iter()
                .filter_map(|id| taxonomy.stage(id).ok())
                .map(StageExcerpt::from)
                .collect()
        };
        Self {
            task: CollaboratorTask::Compose,
            utterance: None,
            stages,
            dialogue: DialogueContext::from_state(state),
            action: Some(ActionBrief::from(action)),
        }
    }

    pub fn system_prompt(&self) -> &'static str {
        match self.task {
            CollaboratorTask::Classify => CLASSIFY_INSTRUCTIONS,
            CollaboratorTask::Compose => COMPOSE_INSTRUCTIONS,
        }
    }

    pub fn user_prompt(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| String::from("{}"))
    }
}

fn tail<I>(items: I, count: usize) -> Vec<String>
where
    I: DoubleEndedIterator<Item = String>,
{
    let mut recent = items.rev().take(count).collect::<Vec<_>>();
    recent.reverse();
    recent
}

/// Strips `<think>` blocks (closed or not) and Markdown code fences.
pub fn sanitize_reply(raw: &str) -> String {
    let mut text = raw.to_string();
    loop {
        let lowered = text.to_ascii_lowercase();
        let Some(start) = lowered.find("<think>") else {
            break;
        };
        match lowered[start..].find("</think>") {
            Some(offset) => text.replace_range(start..start + offset + "</think>".len(), ""),
            None => text.truncate(start),
        }
    }
    // a stray closing tag means the opening one was cut off upstream
    if let Some(end) = text.to_ascii_lowercase().rfind("</think>") {
        text.replace_range(..end + "</think>".len(), "");
    }

    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// First balanced `{...}` object in `text`, respecting JSON strings.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, character) in text[start..].char_indices() {
        if in_string {
            match character {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match character {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[derive(Debug, Deserialize)]
struct ClassificationReply {
    category: String,
    #[serde(default)]
    matched_stage_ids: Vec<String>,
    #[serde(default)]
    related_stage_ids: Vec<String>,
    confidence: f64,
    rationale: String,
    #[serde(default)]
    parameters: BTreeMap<String, serde_json::Value>,
}

/// Validated collaborator classification, ready to be reconciled with the rules.
#[derive(Clone, Debug, PartialEq)]
pub struct CollaboratorVerdict {
    pub category: Category,
    pub confidence: f64,
    pub hints: SemanticHints,
}

pub fn parse_classification_reply(
    raw: &str,
    taxonomy: &Taxonomy,
) -> Result<CollaboratorVerdict, CollaboratorError> {
    let cleaned = sanitize_reply(raw);
    let object = extract_json_object(&cleaned)
        .ok_or_else(|| CollaboratorError::malformed("classification reply holds no JSON object"))?;
    let reply = serde_json::from_str::<ClassificationReply>(object)
        .map_err(|error| CollaboratorError::malformed(format!("classification reply: {error}")))?;

    let category = reply.category.parse::<Category>().map_err(CollaboratorError::malformed)?;
    if !reply.confidence.is_finite() || !(0.0..=1.0).contains(&reply.confidence) {
        return Err(CollaboratorError::malformed(format!(
            "confidence {} is outside 0..=1",
            reply.confidence
        )));
    }

    let known = |ids: Vec<String>| -> Result<Vec<StageId>, CollaboratorError> {
        ids.into_iter()
            .map(StageId::new)
            .map(|id| {
                if taxonomy.is_valid(&id) {
                    Ok(id)
                } else {
                    Err(CollaboratorError::malformed(format!("unknown stage id `{id}`")))
                }
            })
            .collect()
    };
    let matched = known(reply.matched_stage_ids)?;
    let related = known(reply.related_stage_ids)?;

    let mut parameters = BTreeMap::new();
    for (key, value) in reply.parameters {
        let value = match value {
            serde_json::Value::Null => continue,
            serde_json::Value::String(text) if text.trim().is_empty() => continue,
            serde_json::Value::String(text) => text.trim().to_string(),
            serde_json::Value::Number(number) => number.to_string(),
            other => {
                return Err(CollaboratorError::malformed(format!(
                    "parameter `{key}` has unsupported value {other}"
                )))
            }
        };
        parameters.insert(key, value);
    }

    let rationale = reply.rationale.trim();
    let hints = SemanticHints {
        matched_stage_ids: if category.is_in_scope() { matched } else { Vec::new() },
        related_stage_ids: related,
        parameters,
        rationale: (!rationale.is_empty()).then(|| rationale.to_string()),
    };
    Ok(CollaboratorVerdict { category, confidence: reply.confidence, hints })
}

/// Accepts a composed message unless it is empty or repeats an earlier one.
pub fn validate_composed(raw: &str, state: &ConversationState) -> Result<String, CollaboratorError> {
    let message = sanitize_reply(raw);
    if message.is_empty() {
        return Err(CollaboratorError::malformed("composed reply is empty"));
    }
    if message.starts_with('{') && serde_json::from_str::<serde_json::Value>(&message).is_ok() {
        return Err(CollaboratorError::malformed("composed reply is a JSON payload, not a message"));
    }

    let normalized = normalize(&message);
    if state.outbound_messages().iter().any(|previous| normalize(previous) == normalized) {
        return Err(CollaboratorError::degenerate("composed reply repeats an earlier message"));
    }
    Ok(message)
}
