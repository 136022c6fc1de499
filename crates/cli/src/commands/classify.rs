use std::sync::Arc;

use negotiator_core::classifier::RuleClassifier;
use negotiator_core::config::{AppConfig, LoadOptions};
use negotiator_core::domain::action::DialogueAction;
use negotiator_core::domain::classification::ClassificationResult;
use negotiator_core::domain::conversation::{ConversationId, Utterance};
use negotiator_core::strategy::StrategySelector;
use negotiator_core::templates::FallbackTemplates;
use negotiator_core::tracker::ClarificationTracker;
use serde::Serialize;

use crate::commands::CommandResult;

const COMMAND: &str = "classify";

#[derive(Debug, Serialize)]
struct ClassifyOutcome {
    command: &'static str,
    status: &'static str,
    classification: ClassificationResult,
    action: DialogueAction,
    message: String,
}

/// First-turn classification with the rules only; the collaborator is never
/// consulted here.
pub fn run(options: LoadOptions, text: &str) -> CommandResult {
    if text.trim().is_empty() {
        return CommandResult::failure(COMMAND, "bad_request", "request text must not be empty", 1);
    }

    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(COMMAND, "config_validation", error.to_string(), 2)
        }
    };
    let taxonomy = match config.taxonomy.load() {
        Ok(taxonomy) => Arc::new(taxonomy),
        Err(error) => return CommandResult::failure(COMMAND, "taxonomy_invalid", error.to_string(), 2),
    };
    let templates = match FallbackTemplates::new() {
        Ok(templates) => templates,
        Err(error) => return CommandResult::failure(COMMAND, "templates", error.to_string(), 1),
    };

    let clarification = &config.clarification;
    let classifier = RuleClassifier::new(taxonomy.clone(), clarification.vague_streak_limit);
    let selector = StrategySelector::new(
        taxonomy.clone(),
        clarification.strategy_settings(),
        clarification.dedup_policy(),
    );
    let mut tracker = ClarificationTracker::new(clarification.dedup_policy());
    let conversation_id = ConversationId::generate();

    let before = tracker.snapshot(&conversation_id);
    let classification = classifier.classify_text(text, &before);
    let state = match tracker.record_turn(
        &conversation_id,
        Utterance::new(text.trim(), before.next_turn_index()),
        classification.clone(),
    ) {
        Ok(state) => state,
        Err(error) => return CommandResult::failure(COMMAND, "domain", error.to_string(), 1),
    };
    let action = selector.select_action(&classification, &state);
    let message = match templates.render(&action, &taxonomy) {
        Ok(message) => message,
        Err(error) => return CommandResult::failure(COMMAND, "templates", error.to_string(), 1),
    };

    CommandResult::payload(&ClassifyOutcome {
        command: COMMAND,
        status: "ok",
        classification,
        action,
        message,
    })
}
