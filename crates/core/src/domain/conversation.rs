use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::action::{ActionKind, Question, QuestionType};
use crate::domain::classification::{Category, ClassificationResult};
use crate::domain::stage::{completion_fact_key, StageId};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Zero-based position among recorded utterances.
    pub turn_index: u32,
}

impl Utterance {
    pub fn new(text: impl Into<String>, turn_index: u32) -> Self {
        Self { text: text.into(), timestamp: Utc::now(), turn_index }
    }
}

/// Everything known about one conversation.
///
/// Only [`crate::tracker::ClarificationTracker`] mutates this, and only by
/// appending; everyone else sees snapshots.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    conversation_id: ConversationId,
    utterances: Vec<Utterance>,
    classifications: Vec<ClassificationResult>,
    questions_asked: Vec<Question>,
    outbound_messages: Vec<String>,
    action_history: Vec<ActionKind>,
    known_facts: BTreeMap<String, String>,
    round_count: u32,
    forced_breakdown_presented: bool,
    finalized_stage_id: Option<StageId>,
}

impl ConversationState {
    pub fn new(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            utterances: Vec::new(),
            classifications: Vec::new(),
            questions_asked: Vec::new(),
            outbound_messages: Vec::new(),
            action_history: Vec::new(),
            known_facts: BTreeMap::new(),
            round_count: 0,
            forced_breakdown_presented: false,
            finalized_stage_id: None,
        }
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub fn utterances(&self) -> &[Utterance] {
        &self.utterances
    }

    pub fn classifications(&self) -> &[ClassificationResult] {
        &self.classifications
    }

    pub fn questions_asked(&self) -> &[Question] {
        &self.questions_asked
    }

    pub fn outbound_messages(&self) -> &[String] {
        &self.outbound_messages
    }

    pub fn action_history(&self) -> &[ActionKind] {
        &self.action_history
    }

    pub fn known_facts(&self) -> &BTreeMap<String, String> {
        &self.known_facts
    }

    pub fn round_count(&self) -> u32 {
        self.round_count
    }

    pub fn forced_breakdown_presented(&self) -> bool {
        self.forced_breakdown_presented
    }

    pub fn finalized_stage_id(&self) -> Option<&StageId> {
        self.finalized_stage_id.as_ref()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized_stage_id.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.utterances.is_empty()
    }

    pub fn next_turn_index(&self) -> u32 {
        self.utterances.len() as u32
    }

    pub fn last_classification(&self) -> Option<&ClassificationResult> {
        self.classifications.last()
    }

    pub fn last_outbound(&self) -> Option<&str> {
        self.outbound_messages.last().map(String::as_str)
    }

    /// Most recent in-scope classification that narrowed to one stage.
    pub fn focus_stage(&self) -> Option<&StageId> {
        self.classifications
            .iter()
            .rev()
            .filter(|classification| classification.category.is_in_scope())
            .find_map(ClassificationResult::single_stage)
    }

    pub fn is_stage_completed(&self, stage_id: &StageId) -> bool {
        self.known_facts.get(&completion_fact_key(stage_id)).is_some_and(|value| value == "true")
    }

    /// Whether any prior turn was in scope.
    pub fn has_in_scope_history(&self) -> bool {
        self.classifications.iter().any(|classification| classification.category.is_in_scope())
    }

    /// Turns classified in scope; off-topic turns are not clarification rounds.
    pub fn in_scope_rounds(&self) -> u32 {
        self.classifications
            .iter()
            .filter(|classification| classification.category.is_in_scope())
            .count() as u32
    }

    /// Trailing run of classifications with `category`, counting back from the latest.
    pub fn trailing_streak(&self, category: Category) -> usize {
        self.classifications
            .iter()
            .rev()
            .take_while(|classification| classification.category == category)
            .count()
    }

    pub fn last_question_type(&self) -> Option<QuestionType> {
        self.questions_asked.last().map(|question| question.signature.question_type)
    }

    pub(crate) fn append_turn(&mut self, utterance: Utterance, classification: ClassificationResult) {
        for (key, value) in &classification.parameters {
            self.known_facts.insert(key.clone(), value.clone());
        }
        self.utterances.push(utterance);
        self.classifications.push(classification);
        self.round_count += 1;
    }

    pub(crate) fn append_question(&mut self, question: Question) {
        self.questions_asked.push(question);
    }

    pub(crate) fn append_outbound(&mut self, kind: ActionKind, message: String) {
        self.action_history.push(kind);
        self.outbound_messages.push(message);
    }

    pub(crate) fn mark_forced_breakdown(&mut self) {
        self.forced_breakdown_presented = true;
    }

    pub(crate) fn mark_finalized(&mut self, stage_id: StageId) {
        self.finalized_stage_id = Some(stage_id);
    }
}
