//! Append-only store of per-conversation dialogue state.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::dedup::DedupPolicy;
use crate::domain::action::{DialogueAction, Question};
use crate::domain::classification::ClassificationResult;
use crate::domain::conversation::{ConversationId, ConversationState, Utterance};
use crate::errors::DomainError;

/// Sole writer of [`ConversationState`]. Callers get clones.
#[derive(Clone, Debug, Default)]
pub struct ClarificationTracker {
    conversations: HashMap<ConversationId, ConversationState>,
    dedup: DedupPolicy,
}

impl ClarificationTracker {
    pub fn new(dedup: DedupPolicy) -> Self {
        Self { conversations: HashMap::new(), dedup }
    }

    pub fn dedup_policy(&self) -> &DedupPolicy {
        &self.dedup
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn state(&self, conversation_id: &ConversationId) -> Option<&ConversationState> {
        self.conversations.get(conversation_id)
    }

    /// Current state, or a fresh empty one for an unknown conversation.
    pub fn snapshot(&self, conversation_id: &ConversationId) -> ConversationState {
        self.conversations
            .get(conversation_id)
            .cloned()
            .unwrap_or_else(|| ConversationState::new(conversation_id.clone()))
    }

    /// Appends the utterance and its classification and advances the round.
    pub fn record_turn(
        &mut self,
        conversation_id: &ConversationId,
        utterance: Utterance,
        classification: ClassificationResult,
    ) -> Result<ConversationState, DomainError> {
        if utterance.text.trim().is_empty() {
            return Err(DomainError::EmptyUtterance);
        }

        let state = self
            .conversations
            .entry(conversation_id.clone())
            .or_insert_with(|| ConversationState::new(conversation_id.clone()));
        if state.is_finalized() {
            return Err(DomainError::ConversationFinalized {
                conversation_id: conversation_id.clone(),
            });
        }
        if utterance.turn_index != state.next_turn_index() {
            return Err(DomainError::InvariantViolation(format!(
                "utterance turn index {} does not follow {} recorded turns",
                utterance.turn_index,
                state.next_turn_index()
            )));
        }

        state.append_turn(utterance, classification);
        debug!(
            event_name = "tracker.turn_recorded",
            conversation_id = %conversation_id,
            round = state.round_count(),
            "recorded utterance"
        );
        Ok(state.clone())
    }

    /// Appends the outbound message for `action`. A question is stored only
    /// if no semantically equal one was asked before.
    pub fn record_action(
        &mut self,
        conversation_id: &ConversationId,
        action: &DialogueAction,
        message: impl Into<String>,
    ) -> Result<ConversationState, DomainError> {
        let dedup = self.dedup;
        let state = self.conversations.get_mut(conversation_id).ok_or_else(|| {
            DomainError::InvariantViolation(format!(
                "action recorded for conversation `{conversation_id}` before any utterance"
            ))
        })?;
        if state.is_finalized() {
            return Err(DomainError::ConversationFinalized {
                conversation_id: conversation_id.clone(),
            });
        }

        if let Some(question) = action.question() {
            if !dedup.contains(state.questions_asked(), question) {
                state.append_question(question.clone());
            }
        }

        match action {
            DialogueAction::PhaseBreakdown { forced: true, .. } => state.mark_forced_breakdown(),
            DialogueAction::Finalize { resolved_stage_id, .. } => {
                state.mark_finalized(resolved_stage_id.clone())
            }
            _ => {}
        }

        state.append_outbound(action.kind(), message.into());
        Ok(state.clone())
    }

    pub fn known_facts(&self, conversation_id: &ConversationId) -> BTreeMap<String, String> {
        self.conversations
            .get(conversation_id)
            .map(|state| state.known_facts().clone())
            .unwrap_or_default()
    }

    pub fn has_asked(&self, conversation_id: &ConversationId, question: &Question) -> bool {
        self.conversations
            .get(conversation_id)
            .is_some_and(|state| self.dedup.contains(state.questions_asked(), question))
    }

    /// Drops the conversation; the next utterance under the same id starts fresh.
    pub fn abandon(&mut self, conversation_id: &ConversationId) -> Option<ConversationState> {
        self.conversations.remove(conversation_id)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::ClarificationTracker;
    use crate::domain::action::{
        ActionKind, DialogueAction, Question, QuestionFocus, QuestionSignature, QuestionType,
    };
    use crate::domain::classification::{Category, ClassificationResult};
    use crate::domain::conversation::{ConversationId, Utterance};
    use crate::domain::stage::StageId;
    use crate::errors::DomainError;

    fn vague(parameters: &[(&str, &str)]) -> ClassificationResult {
        ClassificationResult::new(
            Category::VagueInScope,
            vec![StageId::new("email_dispatch")],
            0.6,
            "needs facts",
        )
        .with_parameters(
            parameters.iter().map(|(key, value)| (key.to_string(), value.to_string())).collect(),
        )
    }

    fn narrow(question_type: QuestionType) -> DialogueAction {
        DialogueAction::NarrowQuestion {
            question: Question::new(
                QuestionSignature::new(
                    ActionKind::NarrowQuestion,
                    question_type,
                    QuestionFocus::Stage,
                    &[StageId::new("email_dispatch")],
                ),
                "What should the emails achieve?",
            ),
            targeted_stage_ids: vec![StageId::new("email_dispatch")],
        }
    }

    #[test]
    fn known_facts_merge_in_order_with_later_values_winning() {
        let mut tracker = ClarificationTracker::default();
        let id = ConversationId::new("conv-facts");
        tracker
            .record_turn(&id, Utterance::new("client Acme", 0), vague(&[("client_name", "Acme")]))
            .expect("first turn");
        tracker
            .record_turn(
                &id,
                Utterance::new("sorry, client Globex wave 2", 1),
                vague(&[("client_name", "Globex"), ("wave_number", "2")]),
            )
            .expect("second turn");

        let facts = tracker.known_facts(&id);
        assert_eq!(facts.get("client_name").map(String::as_str), Some("Globex"));
        assert_eq!(facts.get("wave_number").map(String::as_str), Some("2"));
        assert_eq!(tracker.snapshot(&id).round_count(), 2);
    }

    #[test]
    fn repeated_question_is_not_appended_twice() {
        let mut tracker = ClarificationTracker::default();
        let id = ConversationId::new("conv-dedup");
        tracker.record_turn(&id, Utterance::new("emails", 0), vague(&[])).expect("turn");

        let action = narrow(QuestionType::Goal);
        tracker.record_action(&id, &action, "first").expect("action");
        tracker.record_action(&id, &action, "second").expect("action");

        let state = tracker.snapshot(&id);
        assert_eq!(state.questions_asked().len(), 1);
        assert_eq!(state.outbound_messages().len(), 2);
        assert!(tracker.has_asked(&id, action.question().expect("question")));
    }

    #[test]
    fn finalized_conversation_rejects_further_turns() {
        let mut tracker = ClarificationTracker::default();
        let id = ConversationId::new("conv-final");
        tracker.record_turn(&id, Utterance::new("emails", 0), vague(&[])).expect("turn");
        let finalize = DialogueAction::Finalize {
            resolved_stage_id: StageId::new("email_dispatch"),
            resolved_parameters: BTreeMap::new(),
            missing_parameters: Vec::new(),
        };
        tracker.record_action(&id, &finalize, "done").expect("finalize");

        let error = tracker
            .record_turn(&id, Utterance::new("one more thing", 1), vague(&[]))
            .expect_err("finalized");
        assert!(matches!(error, DomainError::ConversationFinalized { .. }));
        assert!(matches!(
            tracker.record_action(&id, &finalize, "again"),
            Err(DomainError::ConversationFinalized { .. })
        ));
    }

    #[test]
    fn rejects_blank_and_out_of_order_utterances() {
        let mut tracker = ClarificationTracker::default();
        let id = ConversationId::new("conv-order");
        assert!(matches!(
            tracker.record_turn(&id, Utterance::new("   ", 0), vague(&[])),
            Err(DomainError::EmptyUtterance)
        ));
        assert!(matches!(
            tracker.record_turn(&id, Utterance::new("emails", 3), vague(&[])),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn abandon_resets_the_conversation() {
        let mut tracker = ClarificationTracker::default();
        let id = ConversationId::new("conv-reset");
        tracker.record_turn(&id, Utterance::new("emails", 0), vague(&[])).expect("turn");
        assert!(tracker.abandon(&id).is_some());
        assert!(tracker.snapshot(&id).is_empty());
        assert!(tracker.is_empty());
    }
}
