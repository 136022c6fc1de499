//! Picks the next dialogue move from a classification and the conversation so far.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::dedup::DedupPolicy;
use crate::domain::action::{
    ActionKind, DialogueAction, Question, QuestionFocus, QuestionSignature, QuestionType,
};
use crate::domain::classification::{Category, ClassificationResult};
use crate::domain::conversation::ConversationState;
use crate::domain::stage::{StageId, WorkflowStage};
use crate::taxonomy::{Taxonomy, CLIENT_NAME, WAVE_NUMBER};
use crate::text::{humanize_key, join_with_and, join_with_or};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StrategySettings {
    /// Rounds allowed before the escape valve forces a stage choice.
    pub max_rounds: u32,
    /// Upper bound on stages suggested by a redirect.
    pub redirect_limit: usize,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self { max_rounds: 4, redirect_limit: 3 }
    }
}

#[derive(Clone, Debug)]
pub struct StrategySelector {
    taxonomy: Arc<Taxonomy>,
    settings: StrategySettings,
    dedup: DedupPolicy,
}

impl StrategySelector {
    pub fn new(taxonomy: Arc<Taxonomy>, settings: StrategySettings, dedup: DedupPolicy) -> Self {
        Self { taxonomy, settings, dedup }
    }

    pub fn settings(&self) -> &StrategySettings {
        &self.settings
    }

    /// `state` must already contain the turn that produced `classification`.
    pub fn select_action(
        &self,
        classification: &ClassificationResult,
        state: &ConversationState,
    ) -> DialogueAction {
        let action = self.choose(classification, state);
        debug!(
            event_name = "strategy.action_selected",
            conversation_id = %state.conversation_id(),
            round = state.round_count(),
            category = classification.category.as_str(),
            action = action.kind().as_str(),
            "selected dialogue action"
        );
        action
    }

    fn choose(&self, classification: &ClassificationResult, state: &ConversationState) -> DialogueAction {
        if let Some(stage_id) = classification.single_stage() {
            if classification.category == Category::WellSpecified {
                return self.finalize(stage_id, classification, state);
            }
            // the user answered the forced stage choice
            if state.forced_breakdown_presented() && classification.category.is_in_scope() {
                return self.finalize(stage_id, classification, state);
            }
        }

        // off-topic turns always redirect and never count toward the valve
        if classification.category.is_in_scope()
            && state.in_scope_rounds() > self.settings.max_rounds
        {
            return self.forced_breakdown(state);
        }

        match classification.category {
            Category::OutOfScope => self.redirect(classification),
            Category::TooBroad | Category::WellSpecified => self
                .breakdown(&classification.matched_stage_ids, state)
                .unwrap_or_else(|| self.forced_breakdown(state)),
            Category::VagueInScope => self
                .narrow(classification, state)
                .or_else(|| self.breakdown(&self.plausible_stages(state), state))
                .unwrap_or_else(|| self.forced_breakdown(state)),
        }
    }

    fn redirect(&self, classification: &ClassificationResult) -> DialogueAction {
        let mut suggested = Vec::new();
        for stage_id in &classification.related_stage_ids {
            if self.taxonomy.is_valid(stage_id) && !suggested.contains(stage_id) {
                suggested.push(stage_id.clone());
            }
        }
        suggested.truncate(self.settings.redirect_limit);
        DialogueAction::Redirect { suggested_stage_ids: suggested }
    }

    fn finalize(
        &self,
        stage_id: &StageId,
        classification: &ClassificationResult,
        state: &ConversationState,
    ) -> DialogueAction {
        let mut resolved_parameters = state.known_facts().clone();
        resolved_parameters
            .extend(classification.parameters.iter().map(|(key, value)| (key.clone(), value.clone())));

        let missing_parameters = self
            .taxonomy
            .stage(stage_id)
            .map(|stage| missing(stage, &resolved_parameters))
            .unwrap_or_default();

        DialogueAction::Finalize {
            resolved_stage_id: stage_id.clone(),
            resolved_parameters,
            missing_parameters,
        }
    }

    /// Unforced breakdown over `candidates` with a question type not used last
    /// and a signature not asked before.
    fn breakdown(&self, candidates: &[StageId], state: &ConversationState) -> Option<DialogueAction> {
        let mut candidates = self.taxonomy.in_order(candidates).unwrap_or_default();
        if candidates.len() < 2 {
            candidates = self.remaining(state);
        }
        if candidates.is_empty() {
            return None;
        }

        let stages = self.stages(&candidates);
        let last_type = state.last_question_type();
        for question_type in rotation_after(last_type) {
            let signature = QuestionSignature::new(
                ActionKind::PhaseBreakdown,
                question_type,
                QuestionFocus::Stage,
                &candidates,
            );
            let question = Question::new(signature, breakdown_text(question_type, &stages));
            if !self.dedup.contains(state.questions_asked(), &question) {
                return Some(DialogueAction::PhaseBreakdown {
                    candidate_stage_ids: candidates,
                    question,
                    forced: false,
                });
            }
        }
        None
    }

    /// Escape valve: asks the user to pick exactly one stage. Unasked
    /// wordings are preferred; the selection prompt is re-presented last.
    fn forced_breakdown(&self, state: &ConversationState) -> DialogueAction {
        let candidates = self.plausible_stages(state);
        let stages = self.stages(&candidates);

        let mut question_types = vec![QuestionType::Selection];
        question_types.extend(rotation_after(state.last_question_type()));
        let question_for = |question_type: QuestionType| {
            let signature = QuestionSignature::new(
                ActionKind::PhaseBreakdown,
                question_type,
                QuestionFocus::Stage,
                &candidates,
            );
            Question::new(signature, selection_text(question_type, &stages))
        };

        let question = question_types
            .iter()
            .map(|question_type| question_for(*question_type))
            .find(|question| !self.dedup.contains(state.questions_asked(), question))
            .unwrap_or_else(|| question_for(QuestionType::Selection));

        DialogueAction::PhaseBreakdown { candidate_stage_ids: candidates, question, forced: true }
    }

    fn narrow(&self, classification: &ClassificationResult, state: &ConversationState) -> Option<DialogueAction> {
        let round = state.round_count();
        let facts = state.known_facts();

        let (stage, focuses) = match classification.single_stage() {
            Some(stage_id) => {
                let stage = self.taxonomy.stage(stage_id).ok()?;
                let missing = missing(stage, facts);
                let parameters = self.unasked_first(
                    missing.iter().map(|key| QuestionFocus::Parameter(key.clone())).collect(),
                    &stage.id,
                    state,
                );
                let any_known = stage.required_parameters.iter().any(|key| facts.contains_key(key));

                let mut focuses = Vec::new();
                match round {
                    0 | 1 => {
                        focuses.push(QuestionFocus::Stage);
                        focuses.extend(parameters);
                        focuses.push(QuestionFocus::Details);
                    }
                    2 => {
                        focuses.extend(parameters);
                        focuses.push(QuestionFocus::Details);
                        focuses.push(QuestionFocus::Stage);
                    }
                    _ => {
                        if any_known && !missing.is_empty() {
                            focuses.push(QuestionFocus::Confirmation);
                        }
                        focuses.extend(parameters);
                        focuses.push(QuestionFocus::Details);
                    }
                }
                (Some(stage), self.unasked_first(focuses, &stage.id, state))
            }
            None => (None, vec![QuestionFocus::Stage]),
        };

        let targeted = stage.map(|stage| vec![stage.id.clone()]).unwrap_or_default();
        let last_type = state.last_question_type();
        for focus in focuses {
            let preferred = preferred_type(&focus, stage.is_some(), round);
            for question_type in preferred.rotation_from() {
                if Some(question_type) == last_type {
                    continue;
                }
                let text = match stage {
                    Some(stage) => stage_question_text(&focus, question_type, stage, facts),
                    None => open_question_text(question_type, &self.stages(&self.taxonomy.stage_ids())),
                };
                let signature = QuestionSignature::new(
                    ActionKind::NarrowQuestion,
                    question_type,
                    focus.clone(),
                    &targeted,
                );
                let question = Question::new(signature, text);
                if !self.dedup.contains(state.questions_asked(), &question) {
                    return Some(DialogueAction::NarrowQuestion {
                        question,
                        targeted_stage_ids: targeted,
                    });
                }
            }
        }
        None
    }

    /// Stable reorder: focuses never asked about for `stage_id` come first.
    fn unasked_first(
        &self,
        focuses: Vec<QuestionFocus>,
        stage_id: &StageId,
        state: &ConversationState,
    ) -> Vec<QuestionFocus> {
        let asked = |focus: &QuestionFocus| {
            state.questions_asked().iter().any(|question| {
                question.signature.action == ActionKind::NarrowQuestion
                    && &question.signature.focus == focus
                    && question.signature.stage_ids.contains(stage_id)
            })
        };
        let (mut fresh, seen): (Vec<_>, Vec<_>) = focuses.into_iter().partition(|focus| !asked(focus));
        fresh.dedup();
        fresh.extend(seen);
        fresh
    }

    /// Stages discussed so far that are still open; widened to every open
    /// stage when fewer than two remain so the choice is real.
    fn plausible_stages(&self, state: &ConversationState) -> Vec<StageId> {
        let discussed = state
            .classifications()
            .iter()
            .filter(|classification| classification.category.is_in_scope())
            .flat_map(|classification| classification.matched_stage_ids.iter().cloned())
            .filter(|stage_id| self.taxonomy.is_valid(stage_id) && !state.is_stage_completed(stage_id))
            .collect::<Vec<_>>();
        let discussed = self.taxonomy.in_order(&discussed).unwrap_or_default();
        if discussed.len() >= 2 {
            return discussed;
        }

        let remaining = self.remaining(state);
        if remaining.is_empty() {
            self.taxonomy.stage_ids()
        } else {
            remaining
        }
    }

    fn remaining(&self, state: &ConversationState) -> Vec<StageId> {
        self.taxonomy.remaining(|stage_id| state.is_stage_completed(stage_id))
    }

    fn stages(&self, ids: &[StageId]) -> Vec<&WorkflowStage> {
        ids.iter().filter_map(|id| self.taxonomy.stage(id).ok()).collect()
    }
}

fn missing(stage: &WorkflowStage, facts: &BTreeMap<String, String>) -> Vec<String> {
    stage.required_parameters.iter().filter(|key| !facts.contains_key(*key)).cloned().collect()
}

/// Rotation that starts after `last` and leaves `last` out.
fn rotation_after(last: Option<QuestionType>) -> Vec<QuestionType> {
    match last.filter(|kind| QuestionType::ROTATION.contains(kind)) {
        Some(last) => last.rotation_from().into_iter().skip(1).collect(),
        None => QuestionType::ROTATION.to_vec(),
    }
}

fn preferred_type(focus: &QuestionFocus, has_stage: bool, round: u32) -> QuestionType {
    match focus {
        QuestionFocus::Stage if !has_stage => match round {
            0 | 1 => QuestionType::Goal,
            2 => QuestionType::Scope,
            _ => QuestionType::Process,
        },
        QuestionFocus::Stage => QuestionType::Goal,
        QuestionFocus::Parameter(_) => QuestionType::Scope,
        QuestionFocus::Details | QuestionFocus::Confirmation => QuestionType::Process,
    }
}

fn names(stages: &[&WorkflowStage]) -> Vec<String> {
    stages.iter().map(|stage| stage.name.clone()).collect()
}

fn numbered(stages: &[&WorkflowStage]) -> String {
    stages
        .iter()
        .enumerate()
        .map(|(index, stage)| format!("{}) {}", index + 1, stage.name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn breakdown_text(question_type: QuestionType, stages: &[&WorkflowStage]) -> String {
    let list = join_with_and(&names(stages));
    let options = join_with_or(&names(stages));
    match question_type {
        QuestionType::Goal => {
            format!("That covers several stages: {list}. Which one do you want to start with?")
        }
        QuestionType::Process => format!(
            "These stages run in order: {list}. Should we take them one at a time, starting with {}?",
            stages.first().map(|stage| stage.name.as_str()).unwrap_or("the first")
        ),
        QuestionType::Scope => format!(
            "Do you need all of {list}, or only some of them? Tell me which ones to focus on."
        ),
        QuestionType::Timeline => format!("Which is most urgent right now: {options}?"),
        QuestionType::Selection => selection_text(question_type, stages),
    }
}

fn selection_text(question_type: QuestionType, stages: &[&WorkflowStage]) -> String {
    let options = numbered(stages);
    match question_type {
        QuestionType::Goal => {
            format!("Let's settle on a single goal. Which of these should I hand off: {options}?")
        }
        QuestionType::Process => {
            format!("To move forward I need one stage to run first. Pick one: {options}.")
        }
        QuestionType::Scope => {
            format!("Let's narrow this to exactly one stage for now: {options}. Which should it be?")
        }
        QuestionType::Timeline => {
            format!("Which single stage should happen next: {options}?")
        }
        QuestionType::Selection => format!(
            "We've gone back and forth a few times, so let's pick one stage to start: {options}. \
             Reply with the name or number."
        ),
    }
}

fn open_question_text(question_type: QuestionType, stages: &[&WorkflowStage]) -> String {
    let options = join_with_or(&names(stages).iter().map(|name| name.to_lowercase()).collect::<Vec<_>>());
    match question_type {
        QuestionType::Goal => format!("What would you like to get done: {options}?"),
        QuestionType::Process => {
            "Where are you in the negotiation right now, and what is the next step you need?"
                .to_string()
        }
        QuestionType::Scope => {
            format!("Is this about one part of the workflow ({options}) or the whole negotiation?")
        }
        QuestionType::Timeline | QuestionType::Selection => {
            "What needs to happen first for this negotiation?".to_string()
        }
    }
}

fn stage_question_text(
    focus: &QuestionFocus,
    question_type: QuestionType,
    stage: &WorkflowStage,
    facts: &BTreeMap<String, String>,
) -> String {
    let name = stage.name.as_str();
    match focus {
        QuestionFocus::Stage => match question_type {
            QuestionType::Goal | QuestionType::Selection => {
                format!("What outcome do you need from {name}?")
            }
            QuestionType::Process => {
                format!("Should {name} run as usual, or is anything different this time?")
            }
            QuestionType::Scope => {
                format!("Is {name} the only stage you need right now, or part of a larger run?")
            }
            QuestionType::Timeline => format!("When does {name} need to be finished?"),
        },
        QuestionFocus::Parameter(key) => parameter_question_text(key, question_type, name),
        QuestionFocus::Details => match question_type {
            QuestionType::Process | QuestionType::Selection => format!(
                "Is there anything specific {name} should account for, like particular documents or recipients?"
            ),
            QuestionType::Goal => format!("Anything else I should know before starting {name}?"),
            QuestionType::Scope => {
                format!("Does {name} cover every document in the wave, or only some of them?")
            }
            QuestionType::Timeline => {
                format!("Is there a deadline or ordering constraint for {name}?")
            }
        },
        QuestionFocus::Confirmation => {
            let known = stage
                .required_parameters
                .iter()
                .filter_map(|key| facts.get(key).map(|value| format!("{} {value}", humanize_key(key))))
                .collect::<Vec<_>>();
            let needed = stage
                .required_parameters
                .iter()
                .filter(|key| !facts.contains_key(*key))
                .map(|key| humanize_key(key))
                .collect::<Vec<_>>();
            let known = join_with_and(&known);
            let needed = join_with_and(&needed);
            match question_type {
                QuestionType::Goal | QuestionType::Selection => format!(
                    "I have {known} for {name}. What's the {needed} so I can hand it off?"
                ),
                QuestionType::Process => format!(
                    "So far I have {known} for {name}. To finish setting it up I still need the {needed}."
                ),
                QuestionType::Scope => {
                    format!("{name} with {known} is nearly ready. Which {needed} does it cover?")
                }
                QuestionType::Timeline => {
                    format!("Before {name} can start with {known}, I need the {needed}. What is it?")
                }
            }
        }
    }
}

fn parameter_question_text(key: &str, question_type: QuestionType, name: &str) -> String {
    match (key, question_type) {
        (CLIENT_NAME, QuestionType::Scope) => format!("Which client is {name} for?"),
        (CLIENT_NAME, QuestionType::Goal) => {
            format!("Whose negotiation is this? I need the client name for {name}.")
        }
        (CLIENT_NAME, QuestionType::Process) => {
            format!("{name} runs per client. Which client should I use?")
        }
        (CLIENT_NAME, _) => format!("Which client's {name} is due first?"),
        (WAVE_NUMBER, QuestionType::Scope) => format!("Which wave number should {name} cover?"),
        (WAVE_NUMBER, QuestionType::Goal) => "Which negotiation wave are you working on?".to_string(),
        (WAVE_NUMBER, QuestionType::Process) => {
            format!("{name} runs one wave at a time. Which wave number is this?")
        }
        (WAVE_NUMBER, _) => format!("Which wave is due next for {name}?"),
        (other, QuestionType::Scope) => format!("What {} should {name} use?", humanize_key(other)),
        (other, QuestionType::Goal) => {
            format!("I still need the {} for {name}. What is it?", humanize_key(other))
        }
        (other, QuestionType::Process) => format!(
            "Before {name} can start I need the {}. What should it be?",
            humanize_key(other)
        ),
        (other, _) => format!("What {} applies to this run of {name}?", humanize_key(other)),
    }
}
