use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use negotiator_core::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink, NoopAuditSink};
use negotiator_core::classifier::Classifier;
use negotiator_core::dedup::DedupPolicy;
use negotiator_core::domain::action::DialogueAction;
use negotiator_core::domain::classification::ClassificationResult;
use negotiator_core::domain::conversation::{ConversationId, ConversationState, Utterance};
use negotiator_core::errors::{ApplicationError, DomainError};
use negotiator_core::handoff::{HandoffSink, InMemoryHandoffSink, WorkflowHandoff};
use negotiator_core::inquiry::{describe_capabilities, is_capability_inquiry};
use negotiator_core::strategy::{StrategySelector, StrategySettings};
use negotiator_core::taxonomy::Taxonomy;
use negotiator_core::tracker::ClarificationTracker;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::composer::{MessageSource, ResponseComposer};

const ACTOR: &str = "negotiator";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnKind {
    /// A dialogue action was selected and recorded.
    Action,
    /// Answered from the taxonomy; nothing recorded.
    CapabilityInquiry,
    /// Classification was unavailable; nothing recorded.
    RetryLater,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TurnOutcome {
    pub conversation_id: ConversationId,
    pub correlation_id: String,
    pub kind: TurnKind,
    pub message: String,
    /// True once the conversation has been finalized.
    pub terminal: bool,
    pub round_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<ClassificationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<DialogueAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_source: Option<MessageSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handoff: Option<WorkflowHandoff>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RuntimeSettings {
    pub strategy: StrategySettings,
    pub dedup: DedupPolicy,
    pub capability_inquiry: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            strategy: StrategySettings::default(),
            dedup: DedupPolicy::default(),
            capability_inquiry: true,
        }
    }
}

/// Drives conversations turn by turn: classify, record, select, compose.
///
/// Turns of one conversation run strictly one after another; different
/// conversations proceed independently. The tracker lock is never held
/// across a collaborator call.
pub struct ConversationRuntime {
    taxonomy: Arc<Taxonomy>,
    classifier: Arc<dyn Classifier>,
    selector: StrategySelector,
    composer: ResponseComposer,
    tracker: Mutex<ClarificationTracker>,
    turn_locks: Mutex<HashMap<ConversationId, Arc<tokio::sync::Mutex<()>>>>,
    audit: Arc<dyn AuditSink>,
    handoff: Arc<dyn HandoffSink>,
    capability_inquiry: bool,
}

impl ConversationRuntime {
    pub fn new(
        taxonomy: Arc<Taxonomy>,
        classifier: Arc<dyn Classifier>,
        composer: ResponseComposer,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            selector: StrategySelector::new(taxonomy.clone(), settings.strategy, settings.dedup),
            taxonomy,
            classifier,
            composer,
            tracker: Mutex::new(ClarificationTracker::new(settings.dedup)),
            turn_locks: Mutex::new(HashMap::new()),
            audit: Arc::new(NoopAuditSink),
            handoff: Arc::new(InMemoryHandoffSink::default()),
            capability_inquiry: settings.capability_inquiry,
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_handoff_sink(mut self, handoff: Arc<dyn HandoffSink>) -> Self {
        self.handoff = handoff;
        self
    }

    pub fn taxonomy(&self) -> &Arc<Taxonomy> {
        &self.taxonomy
    }

    pub fn snapshot(&self, conversation_id: &ConversationId) -> ConversationState {
        self.tracker().snapshot(conversation_id)
    }

    /// Discards the conversation. A later utterance with the same id starts over.
    pub async fn abandon(&self, conversation_id: &ConversationId) -> bool {
        let turn_lock = self.turn_lock(conversation_id);
        let _turn = turn_lock.lock().await;
        let discarded = self.tracker().abandon(conversation_id).is_some();
        self.release_turn_lock(conversation_id, &turn_lock);
        if discarded {
            info!(
                event_name = "conversation.abandoned",
                conversation_id = %conversation_id,
                "conversation state discarded"
            );
        }
        discarded
    }

    pub async fn handle_utterance(
        &self,
        conversation_id: &ConversationId,
        text: &str,
    ) -> Result<TurnOutcome, ApplicationError> {
        let correlation_id = Uuid::new_v4().to_string();
        let audit = AuditContext::new(conversation_id.clone(), correlation_id.clone(), ACTOR);

        if text.trim().is_empty() {
            self.audit.emit(
                audit.event("conversation.turn.rejected", AuditCategory::Ingress, AuditOutcome::Rejected),
            );
            return Err(DomainError::EmptyUtterance.into());
        }

        let turn_lock = self.turn_lock(conversation_id);
        let _turn = turn_lock.lock().await;

        let state = self.snapshot(conversation_id);
        info!(
            event_name = "conversation.turn.received",
            conversation_id = %conversation_id,
            correlation_id = %correlation_id,
            round = state.round_count(),
            "received utterance"
        );
        if state.is_finalized() {
            self.audit.emit(
                audit.event("conversation.turn.rejected", AuditCategory::Ingress, AuditOutcome::Rejected),
            );
            return Err(DomainError::ConversationFinalized {
                conversation_id: conversation_id.clone(),
            }
            .into());
        }

        if self.capability_inquiry && is_capability_inquiry(text) {
            self.audit.emit(
                audit.event("conversation.capability_inquiry", AuditCategory::Ingress, AuditOutcome::Success),
            );
            return Ok(TurnOutcome {
                conversation_id: conversation_id.clone(),
                correlation_id,
                kind: TurnKind::CapabilityInquiry,
                message: describe_capabilities(&self.taxonomy),
                terminal: false,
                round_count: state.round_count(),
                classification: None,
                action: None,
                message_source: None,
                handoff: None,
            });
        }

        let utterance = Utterance::new(text.trim(), state.next_turn_index());
        let classification = match self.classifier.classify(&utterance, &state).await {
            Ok(classification) => classification,
            Err(error) => {
                warn!(
                    event_name = "conversation.classification_unavailable",
                    conversation_id = %conversation_id,
                    correlation_id = %correlation_id,
                    error_class = error.error_class(),
                    error = %error,
                    "classification failed, asking the user to retry"
                );
                self.audit.emit(
                    audit
                        .event("conversation.classified", AuditCategory::Classification, AuditOutcome::Failed)
                        .with_metadata("error_class", error.error_class()),
                );
                let message =
                    ApplicationError::from(error).into_interface(correlation_id.clone()).user_message();
                return Ok(TurnOutcome {
                    conversation_id: conversation_id.clone(),
                    correlation_id,
                    kind: TurnKind::RetryLater,
                    message: message.to_string(),
                    terminal: false,
                    round_count: state.round_count(),
                    classification: None,
                    action: None,
                    message_source: None,
                    handoff: None,
                });
            }
        };

        let state = self.tracker().record_turn(conversation_id, utterance, classification.clone())?;
        info!(
            event_name = "conversation.classified",
            conversation_id = %conversation_id,
            correlation_id = %correlation_id,
            round = state.round_count(),
            category = classification.category.as_str(),
            confidence = classification.confidence,
            matched = classification.matched_stage_ids.len(),
            "classified utterance"
        );
        self.audit.emit(
            audit
                .event("conversation.classified", AuditCategory::Classification, AuditOutcome::Success)
                .with_metadata("category", classification.category.as_str())
                .with_metadata("round", state.round_count().to_string()),
        );

        let action = self.selector.select_action(&classification, &state);
        info!(
            event_name = "conversation.action_selected",
            conversation_id = %conversation_id,
            correlation_id = %correlation_id,
            round = state.round_count(),
            action = action.kind().as_str(),
            "selected dialogue action"
        );
        self.audit.emit(
            audit
                .event("conversation.action_selected", AuditCategory::Strategy, AuditOutcome::Success)
                .with_metadata("action", action.kind().as_str()),
        );

        let composed = self.composer.compose(&action, &state).await?;
        let composition_outcome = match composed.source {
            MessageSource::Collaborator => AuditOutcome::Success,
            MessageSource::Template if self.composer.uses_collaborator() => AuditOutcome::Degraded,
            MessageSource::Template => AuditOutcome::Success,
        };
        self.audit.emit(
            audit.event("conversation.composed", AuditCategory::Composition, composition_outcome),
        );

        let state = self.tracker().record_action(conversation_id, &action, composed.text.clone())?;

        let handoff = WorkflowHandoff::from_action(conversation_id, &action);
        if let Some(handoff) = &handoff {
            info!(
                event_name = "conversation.finalized",
                conversation_id = %conversation_id,
                correlation_id = %correlation_id,
                round = state.round_count(),
                stage_id = %handoff.resolved_stage_id,
                missing = handoff.missing_parameters.len(),
                "conversation handed off"
            );
            self.audit.emit(
                audit
                    .event("conversation.handed_off", AuditCategory::Handoff, AuditOutcome::Success)
                    .with_metadata("stage_id", handoff.resolved_stage_id.as_str()),
            );
            self.handoff.hand_off(handoff.clone());
        }

        Ok(TurnOutcome {
            conversation_id: conversation_id.clone(),
            correlation_id,
            kind: TurnKind::Action,
            message: composed.text,
            terminal: state.is_finalized(),
            round_count: state.round_count(),
            classification: Some(classification),
            action: Some(action),
            message_source: Some(composed.source),
            handoff,
        })
    }

    fn tracker(&self) -> MutexGuard<'_, ClarificationTracker> {
        match self.tracker.lock() {
            Ok(tracker) => tracker,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn turn_locks(&self) -> MutexGuard<'_, HashMap<ConversationId, Arc<tokio::sync::Mutex<()>>>> {
        match self.turn_locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn turn_lock(&self, conversation_id: &ConversationId) -> Arc<tokio::sync::Mutex<()>> {
        self.turn_locks().entry(conversation_id.clone()).or_default().clone()
    }

    /// Drops the map entry unless another turn is already waiting on it.
    fn release_turn_lock(
        &self,
        conversation_id: &ConversationId,
        turn_lock: &Arc<tokio::sync::Mutex<()>>,
    ) {
        let mut locks = self.turn_locks();
        // one reference in the map, one held by the caller
        if Arc::strong_count(turn_lock) <= 2 {
            locks.remove(conversation_id);
        }
    }
}
