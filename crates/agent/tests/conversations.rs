use std::collections::HashSet;
use std::sync::Arc;

use negotiator_agent::llm::{LlmError, ScriptedLlmClient};
use negotiator_agent::{build_runtime, ConversationRuntime, MessageSource, TurnKind};
use negotiator_core::audit::{AuditCategory, AuditOutcome, InMemoryAuditSink};
use negotiator_core::config::AppConfig;
use negotiator_core::domain::action::{ActionKind, DialogueAction};
use negotiator_core::domain::classification::Category;
use negotiator_core::domain::conversation::ConversationId;
use negotiator_core::errors::{ApplicationError, DomainError, InterfaceError};
use negotiator_core::handoff::InMemoryHandoffSink;
use negotiator_core::taxonomy::Taxonomy;

fn deterministic_runtime() -> ConversationRuntime {
    let config = AppConfig::default();
    build_runtime(&config, Arc::new(Taxonomy::open_negotiation()), None).expect("runtime")
}

fn collaborator_runtime(client: ScriptedLlmClient) -> ConversationRuntime {
    let mut config = AppConfig::default();
    config.llm.enabled = true;
    config.llm.max_retries = 1;
    config.llm.retry_backoff_ms = 1;
    build_runtime(&config, Arc::new(Taxonomy::open_negotiation()), Some(Arc::new(client)))
        .expect("runtime")
}

fn unavailable() -> LlmError {
    LlmError::Status { status: 503, message: "overloaded".to_string() }
}

#[tokio::test]
async fn deterministic_conversation_finalizes_and_hands_off() {
    let handoffs = InMemoryHandoffSink::default();
    let runtime = deterministic_runtime().with_handoff_sink(Arc::new(handoffs.clone()));
    let id = ConversationId::new("conv-finalize");

    let first = runtime
        .handle_utterance(&id, "I need to send emails for client Acme")
        .await
        .expect("first turn");
    assert_eq!(first.kind, TurnKind::Action);
    assert!(!first.terminal);
    assert_eq!(first.round_count, 1);
    assert_eq!(first.message_source, Some(MessageSource::Template));

    let second = runtime.handle_utterance(&id, "wave 7").await.expect("second turn");
    assert!(second.terminal);
    assert_eq!(second.action.as_ref().map(DialogueAction::kind), Some(ActionKind::Finalize));
    assert!(second.message.contains("Email Dispatch"), "{}", second.message);

    let recorded = handoffs.handoffs();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].resolved_stage_id.as_str(), "email_dispatch");
    assert_eq!(recorded[0].resolved_parameters.get("client_name").map(String::as_str), Some("Acme"));
    assert_eq!(recorded[0].resolved_parameters.get("wave_number").map(String::as_str), Some("7"));
    assert!(recorded[0].is_complete());
}

#[tokio::test]
async fn completed_stage_report_narrows_the_broad_request() {
    let runtime = deterministic_runtime();
    let id = ConversationId::new("conv-progress");

    let first = runtime.handle_utterance(&id, "do the open negotiation").await.expect("first turn");
    assert_eq!(first.classification.as_ref().map(|c| c.category), Some(Category::TooBroad));
    let first_action = first.action.expect("breakdown");
    assert_eq!(first_action.kind(), ActionKind::PhaseBreakdown);
    let first_signature = first_action.question().expect("question").signature.clone();

    let second = runtime
        .handle_utterance(&id, "I already validated documents")
        .await
        .expect("second turn");
    let classification = second.classification.expect("classification");
    assert_eq!(classification.category, Category::VagueInScope);
    assert_eq!(
        classification.matched_stage_ids.iter().map(|id| id.as_str()).collect::<Vec<_>>(),
        vec!["document_creation"]
    );
    let second_action = second.action.expect("question");
    assert_eq!(second_action.kind(), ActionKind::NarrowQuestion);
    assert_ne!(second_action.question().expect("question").signature, first_signature);

    let state = runtime.snapshot(&id);
    assert_eq!(
        state.known_facts().get("completed.document_validation").map(String::as_str),
        Some("true")
    );
    assert_eq!(state.round_count(), 2);
}

#[tokio::test]
async fn declining_a_question_keeps_the_conversation_in_scope() {
    let runtime = deterministic_runtime();
    let id = ConversationId::new("conv-decline");

    runtime.handle_utterance(&id, "I need to send some emails").await.expect("first turn");
    runtime.handle_utterance(&id, "the emails").await.expect("second turn");
    let third = runtime.handle_utterance(&id, "not sure").await.expect("third turn");

    assert_eq!(third.classification.as_ref().map(|c| c.category), Some(Category::VagueInScope));
    assert_eq!(third.action.as_ref().map(DialogueAction::kind), Some(ActionKind::NarrowQuestion));
    assert!(!third.message.contains("outside what I can do"), "{}", third.message);
}

#[tokio::test]
async fn finalized_conversation_rejects_further_utterances() {
    let runtime = deterministic_runtime();
    let id = ConversationId::new("conv-closed");

    let outcome = runtime
        .handle_utterance(&id, "send the emails for client Acme Corp, wave 3")
        .await
        .expect("single turn finalize");
    assert!(outcome.terminal);

    let error = runtime.handle_utterance(&id, "thanks!").await.expect_err("finalized");
    assert!(matches!(error, ApplicationError::Domain(DomainError::ConversationFinalized { .. })));
    let interface = error.into_interface("req-closed");
    assert!(matches!(interface, InterfaceError::BadRequest { .. }));
}

#[tokio::test]
async fn escape_valve_forces_a_choice_then_resolves_with_missing_parameters() {
    let handoffs = InMemoryHandoffSink::default();
    let runtime = deterministic_runtime().with_handoff_sink(Arc::new(handoffs.clone()));
    let id = ConversationId::new("conv-escape");

    for round in 1..=4 {
        let text = if round == 1 { "I need to send some emails" } else { "the emails" };
        let outcome = runtime.handle_utterance(&id, text).await.expect("vague turn");
        assert_eq!(outcome.action.as_ref().map(DialogueAction::kind), Some(ActionKind::NarrowQuestion));
        assert_eq!(outcome.round_count, round);
    }

    let forced = runtime.handle_utterance(&id, "the emails").await.expect("fifth turn");
    match forced.action {
        Some(DialogueAction::PhaseBreakdown { forced: true, .. }) => {}
        other => panic!("expected forced breakdown, got {other:?}"),
    }

    let resolved = runtime.handle_utterance(&id, "email dispatch").await.expect("choice");
    assert!(resolved.terminal);
    let handoff = resolved.handoff.expect("handoff on finalize");
    assert_eq!(handoff.resolved_stage_id.as_str(), "email_dispatch");
    assert_eq!(handoff.missing_parameters, vec!["client_name".to_string(), "wave_number".to_string()]);
    assert_eq!(handoffs.handoffs().len(), 1);

    let state = runtime.snapshot(&id);
    let signatures = state.questions_asked().iter().map(|q| q.signature.clone()).collect::<HashSet<_>>();
    assert_eq!(signatures.len(), state.questions_asked().len());
}

#[tokio::test]
async fn classification_outage_asks_to_retry_without_advancing() {
    let classify_reply = r#"{"category": "WELL_SPECIFIED", "matched_stage_ids": ["email_dispatch"],
        "related_stage_ids": [], "confidence": 0.9, "rationale": "send emails",
        "parameters": {"client_name": "Acme Corp", "wave_number": 3}}"#;
    let client = ScriptedLlmClient::new()
        .fail(unavailable())
        .fail(unavailable())
        .reply(classify_reply)
        .reply("Handing this to Email Dispatch for Acme Corp, wave 3.");
    let runtime = collaborator_runtime(client.clone());
    let id = ConversationId::new("conv-outage");

    let retry = runtime
        .handle_utterance(&id, "send the emails for client Acme Corp, wave 3")
        .await
        .expect("outage is not an error for the caller");
    assert_eq!(retry.kind, TurnKind::RetryLater);
    assert_eq!(retry.message, "I couldn't process that just now. Please try again in a moment.");
    assert_eq!(retry.round_count, 0);
    assert!(runtime.snapshot(&id).is_empty());

    let outcome = runtime
        .handle_utterance(&id, "send the emails for client Acme Corp, wave 3")
        .await
        .expect("second attempt");
    assert_eq!(outcome.round_count, 1);
    assert!(outcome.terminal);
    assert_eq!(outcome.message_source, Some(MessageSource::Collaborator));
    assert_eq!(outcome.message, "Handing this to Email Dispatch for Acme Corp, wave 3.");
    assert_eq!(client.remaining(), 0);
}

#[tokio::test]
async fn unusable_compositions_fall_back_to_the_template() {
    let classify_reply = r#"```json
        {"category": "TOO_BROAD",
         "matched_stage_ids": ["document_validation", "document_creation", "email_dispatch", "file_organization"],
         "related_stage_ids": [], "confidence": 0.7, "rationale": "whole workflow"}
        ```"#;
    let client = ScriptedLlmClient::new()
        .reply(classify_reply)
        .reply("")
        .reply(r#"{"message": "pick one"}"#);
    let audit = InMemoryAuditSink::default();
    let runtime = collaborator_runtime(client).with_audit_sink(Arc::new(audit.clone()));
    let id = ConversationId::new("conv-fallback");

    let outcome = runtime.handle_utterance(&id, "do the open negotiation").await.expect("turn");

    assert_eq!(outcome.classification.as_ref().map(|c| c.category), Some(Category::TooBroad));
    assert_eq!(outcome.message_source, Some(MessageSource::Template));
    assert!(outcome.message.contains("Document Validation"), "{}", outcome.message);
    assert!(outcome.message.contains("File Organization"), "{}", outcome.message);

    let composition = audit
        .events_for(&id)
        .into_iter()
        .find(|event| event.category == AuditCategory::Composition)
        .expect("composition audited");
    assert_eq!(composition.outcome, AuditOutcome::Degraded);
}

#[tokio::test]
async fn abandoned_conversation_starts_over() {
    let runtime = deterministic_runtime();
    let id = ConversationId::new("conv-reset");

    runtime.handle_utterance(&id, "I need to send some emails").await.expect("turn");
    assert_eq!(runtime.snapshot(&id).round_count(), 1);

    assert!(runtime.abandon(&id).await);
    assert!(runtime.snapshot(&id).is_empty());
    assert!(!runtime.abandon(&id).await);

    let outcome = runtime.handle_utterance(&id, "do the open negotiation").await.expect("fresh turn");
    assert_eq!(outcome.round_count, 1);
}

#[tokio::test]
async fn conversations_are_independent() {
    let runtime = Arc::new(deterministic_runtime());
    let first = ConversationId::new("conv-a");
    let second = ConversationId::new("conv-b");

    let (left, right) = tokio::join!(
        runtime.handle_utterance(&first, "send the emails for client Acme Corp, wave 3"),
        runtime.handle_utterance(&second, "who's the president of USA?"),
    );
    let left = left.expect("first conversation");
    let right = right.expect("second conversation");

    assert!(left.terminal);
    assert!(!right.terminal);
    assert_eq!(right.action.as_ref().map(DialogueAction::kind), Some(ActionKind::Redirect));
    assert_eq!(runtime.snapshot(&first).round_count(), 1);
    assert_eq!(runtime.snapshot(&second).round_count(), 1);
}
