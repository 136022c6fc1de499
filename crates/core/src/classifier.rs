//! Deterministic utterance classification against the workflow taxonomy.
//!
//! [`RuleClassifier`] owns every category decision. A reasoning collaborator
//! may contribute [`SemanticHints`] (paraphrase matches, extracted facts),
//! but the same utterance, state and hints always produce the same result.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::action::{ActionKind, QuestionFocus};
use crate::domain::classification::{Category, ClassificationResult};
use crate::domain::conversation::{ConversationState, Utterance};
use crate::domain::stage::{completion_fact_key, StageId, WorkflowStage};
use crate::errors::CollaboratorError;
use crate::taxonomy::{Taxonomy, CLIENT_NAME, WAVE_NUMBER};
use crate::text::{contains_phrase, content_tokens, is_stopword, normalize, tokenize};

const WORKFLOW_PHRASES: &[&str] = &[
    "open negotiation",
    "whole workflow",
    "entire workflow",
    "full workflow",
    "the workflow",
    "whole process",
    "entire process",
    "full process",
    "end to end",
    "everything",
    "all stages",
    "all the stages",
    "all steps",
    "all the steps",
    "all of it",
    "whole thing",
    "the negotiation",
];

const DOMAIN_STEMS: &[&str] = &["negotiat", "document"];

const DOMAIN_TOKENS: &[&str] = &[
    "client", "clients", "wave", "waves", "doc", "docs", "file", "files", "workflow", "process",
    "stage", "stages", "step", "steps", "phase", "phases", "letter", "letters",
];

const COMPLETION_MARKERS: &[&str] = &[
    "already",
    "finished",
    "completed",
    "done with",
    "is done",
    "are done",
    "was done",
    "were done",
    "have done",
    "ive done",
    "weve done",
    "wrapped up",
];

const DECLINES: &[&str] = &["dont", "not", "no", "unsure", "idk", "know", "nevermind"];

const CLAUSE_CONNECTORS: &[&str] = &[" now ", " then ", " but ", " next ", " so "];

const CLIENT_FILLERS: &[&str] = &["name", "is", "called", "named", "=", ":", "-"];

const CLIENT_STOPS: &[&str] = &[
    "wave", "and", "for", "in", "on", "with", "please", "to", "who", "which", "that", "now", "then",
];

/// Classifies one utterance in the context of its conversation.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        utterance: &Utterance,
        state: &ConversationState,
    ) -> Result<ClassificationResult, CollaboratorError>;
}

/// Collaborator-supplied semantic signals, already validated against the taxonomy.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SemanticHints {
    /// Stages the utterance is about, when the wording is a paraphrase.
    pub matched_stage_ids: Vec<StageId>,
    /// Closest stages for an out-of-scope request.
    pub related_stage_ids: Vec<StageId>,
    pub parameters: BTreeMap<String, String>,
    pub rationale: Option<String>,
}

/// What the rules read out of one utterance, before the category decision.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UtteranceSignals {
    /// Stages mentioned as work to do, taxonomy order.
    pub active_stage_ids: Vec<StageId>,
    /// Stages the user reports as already done, taxonomy order.
    pub completed_stage_ids: Vec<StageId>,
    pub workflow_reference: bool,
    pub domain_reference: bool,
    pub parameters: BTreeMap<String, String>,
    /// The user declined to answer a question about the current stage.
    pub declined_question: bool,
    pub gibberish: bool,
}

#[derive(Clone, Debug)]
pub struct RuleClassifier {
    taxonomy: Arc<Taxonomy>,
    vague_streak_limit: usize,
}

impl RuleClassifier {
    pub fn new(taxonomy: Arc<Taxonomy>, vague_streak_limit: usize) -> Self {
        Self { taxonomy, vague_streak_limit: vague_streak_limit.max(1) }
    }

    pub fn taxonomy(&self) -> &Arc<Taxonomy> {
        &self.taxonomy
    }

    pub fn classify_text(&self, text: &str, state: &ConversationState) -> ClassificationResult {
        self.classify_with_hints(text, state, &SemanticHints::default())
    }

    pub fn classify_with_hints(
        &self,
        text: &str,
        state: &ConversationState,
        hints: &SemanticHints,
    ) -> ClassificationResult {
        let signals = self.signals(text, state);
        if signals.gibberish && hints.matched_stage_ids.is_empty() {
            return ClassificationResult::new(
                Category::OutOfScope,
                Vec::new(),
                0.15,
                "input looks like random characters rather than a request",
            );
        }

        let mut parameters = signals.parameters.clone();
        for (key, value) in &hints.parameters {
            parameters.entry(key.clone()).or_insert_with(|| value.clone());
        }

        let completed_now =
            signals.completed_stage_ids.iter().cloned().collect::<BTreeSet<StageId>>();
        let is_completed =
            |stage_id: &StageId| completed_now.contains(stage_id) || state.is_stage_completed(stage_id);

        let mut mentioned = signals.active_stage_ids.clone();
        if mentioned.is_empty() {
            mentioned = self.known_stages(&hints.matched_stage_ids);
        }
        let used_hints = signals.active_stage_ids.is_empty() && !mentioned.is_empty();

        let domain_reference = signals.domain_reference
            || signals.declined_question
            || !parameters.is_empty()
            || !completed_now.is_empty()
            || used_hints;

        let (matched, basis) = if !mentioned.is_empty() {
            (mentioned, "named stages")
        } else if !completed_now.is_empty() {
            match self.taxonomy.next_open_stage(is_completed) {
                Some(stage) => (vec![stage.id.clone()], "next stage after completed work"),
                None => (Vec::new(), "every stage reported complete"),
            }
        } else if signals.workflow_reference {
            (self.taxonomy.remaining(is_completed), "whole workflow")
        } else if domain_reference {
            match state.focus_stage().filter(|stage_id| !is_completed(*stage_id)) {
                Some(stage_id) => (vec![stage_id.clone()], "continuing the current stage"),
                None => (Vec::new(), "workflow terms without a stage"),
            }
        } else {
            (Vec::new(), "")
        };

        for stage_id in &completed_now {
            parameters.insert(completion_fact_key(stage_id), "true".to_string());
        }

        let result = match matched.as_slice() {
            [] if signals.workflow_reference || domain_reference => {
                self.unmatched_in_scope(state, is_completed, basis)
            }
            [] => {
                let related = self.related_stages(text, hints);
                let confidence = if state.has_in_scope_history() { 0.75 } else { 0.9 };
                let rationale = hints.rationale.clone().unwrap_or_else(|| {
                    "nothing in the request relates to the negotiation workflow".to_string()
                });
                ClassificationResult::new(Category::OutOfScope, Vec::new(), confidence, rationale)
                    .with_related_stages(related)
            }
            [stage_id] => self.single_stage(stage_id, state, &parameters, basis),
            many => {
                let streak = state.trailing_streak(Category::TooBroad) as f64;
                ClassificationResult::new(
                    Category::TooBroad,
                    many.to_vec(),
                    0.6 + 0.1 * streak.min(3.0),
                    format!("request spans {} stages ({basis})", many.len()),
                )
            }
        };

        result.with_parameters(parameters)
    }

    /// Reads stage mentions, completion reports, parameters and scope markers.
    pub fn signals(&self, text: &str, state: &ConversationState) -> UtteranceSignals {
        let normalized = normalize(text);
        let mut active = BTreeSet::new();
        let mut completed = BTreeSet::new();

        for clause in clauses(text) {
            let reports_completion =
                COMPLETION_MARKERS.iter().any(|marker| contains_phrase(&clause, marker));
            for (position, stage) in self.taxonomy.stages().iter().enumerate() {
                if mentions_stage(&clause, stage) {
                    if reports_completion {
                        completed.insert(position);
                    } else {
                        active.insert(position);
                    }
                }
            }
        }

        let mut parameters = extract_parameters(text);
        let names_stage = !active.is_empty() || !completed.is_empty();
        let answer = self.pending_answer(text, state, &parameters, names_stage);
        if let Some(position) = answer.selection {
            active.insert(position);
        }
        let declined_question = answer.declined;
        parameters.extend(answer.parameters);

        // a stage reported done in one clause and requested in another is done
        let active = active.difference(&completed).copied().collect::<Vec<_>>();
        let to_ids = |positions: Vec<usize>| -> Vec<StageId> {
            positions
                .into_iter()
                .filter_map(|position| self.taxonomy.stages().get(position))
                .map(|stage| stage.id.clone())
                .collect()
        };

        let workflow_reference =
            WORKFLOW_PHRASES.iter().any(|phrase| contains_phrase(&normalized, phrase));
        let tokens = tokenize(text);
        let domain_reference = tokens.iter().any(|token| {
            DOMAIN_TOKENS.contains(&token.as_str())
                || DOMAIN_STEMS.iter().any(|stem| token.starts_with(stem))
        });

        let nothing_found = active.is_empty()
            && completed.is_empty()
            && parameters.is_empty()
            && !workflow_reference
            && !domain_reference
            && !declined_question;

        UtteranceSignals {
            active_stage_ids: to_ids(active),
            completed_stage_ids: to_ids(completed.into_iter().collect()),
            workflow_reference,
            domain_reference,
            parameters,
            declined_question,
            gibberish: nothing_found && looks_like_gibberish(text),
        }
    }

    fn single_stage(
        &self,
        stage_id: &StageId,
        state: &ConversationState,
        parameters: &BTreeMap<String, String>,
        basis: &str,
    ) -> ClassificationResult {
        let stage = match self.taxonomy.stage(stage_id) {
            Ok(stage) => stage,
            Err(_) => {
                return ClassificationResult::new(
                    Category::VagueInScope,
                    Vec::new(),
                    0.4,
                    format!("stage `{stage_id}` is not part of the workflow"),
                );
            }
        };

        let missing = missing_parameters(stage, state.known_facts(), parameters);
        let same_topic = state
            .classifications()
            .iter()
            .rev()
            .take_while(|previous| previous.single_stage() == Some(stage_id))
            .count() as f64;

        if missing.is_empty() {
            return ClassificationResult::new(
                Category::WellSpecified,
                vec![stage_id.clone()],
                0.85 + 0.05 * same_topic.min(3.0),
                format!("{} with every required parameter known ({basis})", stage.name),
            );
        }

        let required = stage.required_parameters.len().max(1) as f64;
        let known_ratio = (required - missing.len() as f64) / required;
        ClassificationResult::new(
            Category::VagueInScope,
            vec![stage_id.clone()],
            0.55 + 0.15 * known_ratio + 0.05 * same_topic.min(3.0),
            format!("{} still needs {} ({basis})", stage.name, missing.join(", ")),
        )
    }

    fn unmatched_in_scope<F>(
        &self,
        state: &ConversationState,
        is_completed: F,
        basis: &str,
    ) -> ClassificationResult
    where
        F: Fn(&StageId) -> bool,
    {
        let remaining = self.taxonomy.remaining(&is_completed);
        if remaining.is_empty() {
            return ClassificationResult::new(
                Category::VagueInScope,
                Vec::new(),
                0.5,
                "every workflow stage is already complete",
            );
        }

        let streak = state
            .classifications()
            .iter()
            .rev()
            .take_while(|previous| {
                previous.category == Category::VagueInScope && previous.matched_stage_ids.is_empty()
            })
            .count();

        if streak >= self.vague_streak_limit {
            return ClassificationResult::new(
                Category::TooBroad,
                remaining,
                0.7,
                format!("still no stage after {} vague turns", streak + 1),
            );
        }

        ClassificationResult::new(
            Category::VagueInScope,
            Vec::new(),
            0.45 + 0.1 * streak as f64,
            format!("in scope but no stage identified ({basis})"),
        )
    }

    /// Taxonomy-ordered, deduplicated subset of `ids` that the taxonomy knows.
    fn known_stages(&self, ids: &[StageId]) -> Vec<StageId> {
        let known = ids.iter().filter(|id| self.taxonomy.is_valid(id)).cloned().collect::<Vec<_>>();
        self.taxonomy.in_order(&known).unwrap_or_default()
    }

    /// Stages loosely related to `text`, collaborator suggestions first.
    pub fn related_stages(&self, text: &str, hints: &SemanticHints) -> Vec<StageId> {
        let mut related = Vec::new();
        for stage_id in &hints.related_stage_ids {
            if self.taxonomy.is_valid(stage_id) && !related.contains(stage_id) {
                related.push(stage_id.clone());
            }
        }

        let tokens = content_tokens(text);
        let mut scored = self
            .taxonomy
            .stages()
            .iter()
            .enumerate()
            .map(|(position, stage)| (lexical_overlap(&tokens, stage), position, &stage.id))
            .filter(|(score, _, _)| *score > 0)
            .collect::<Vec<_>>();
        scored.sort_by(|left, right| right.0.cmp(&left.0).then(left.1.cmp(&right.1)));

        for (_, _, stage_id) in scored {
            if !related.contains(stage_id) {
                related.push(stage_id.clone());
            }
        }
        related
    }

    /// Short replies to the question just asked: "3" to a wave question,
    /// "Acme" to a client question, "2" to a numbered stage list.
    fn pending_answer(
        &self,
        text: &str,
        state: &ConversationState,
        extracted: &BTreeMap<String, String>,
        names_stage: bool,
    ) -> PendingAnswer {
        let mut answer = PendingAnswer::default();
        let Some(question) = state.questions_asked().last() else {
            return answer;
        };
        if state.action_history().last() != Some(&question.signature.action) {
            return answer;
        }

        let tokens = tokenize(text);
        match (&question.signature.action, &question.signature.focus) {
            (ActionKind::PhaseBreakdown, _) => {
                let ordered =
                    self.taxonomy.in_order(&question.signature.stage_ids).unwrap_or_default();
                let chosen = match tokens.as_slice() {
                    [only] => parse_number(only)
                        .and_then(|number| number.parse::<usize>().ok())
                        .and_then(|number| number.checked_sub(1))
                        .and_then(|index| ordered.get(index)),
                    _ => None,
                };
                if let Some(stage_id) = chosen {
                    answer.selection =
                        self.taxonomy.stages().iter().position(|stage| &stage.id == stage_id);
                }
            }
            (ActionKind::NarrowQuestion, focus) => {
                if names_stage || !extracted.is_empty() || tokens.is_empty() {
                    return answer;
                }
                // "not sure" keeps the conversation on the stage that was asked about
                if tokens.iter().any(|token| DECLINES.contains(&token.as_str())) {
                    answer.declined = !question.signature.stage_ids.is_empty();
                    return answer;
                }
                if let QuestionFocus::Parameter(key) = focus {
                    if let Some(value) = bare_answer(key, text, &tokens) {
                        answer.parameters.insert(key.clone(), value);
                    }
                }
            }
            _ => {}
        }
        answer
    }
}

#[async_trait]
impl Classifier for RuleClassifier {
    async fn classify(
        &self,
        utterance: &Utterance,
        state: &ConversationState,
    ) -> Result<ClassificationResult, CollaboratorError> {
        Ok(self.classify_text(&utterance.text, state))
    }
}

#[derive(Default)]
struct PendingAnswer {
    selection: Option<usize>,
    parameters: BTreeMap<String, String>,
    declined: bool,
}

fn bare_answer(key: &str, text: &str, tokens: &[String]) -> Option<String> {
    if key == WAVE_NUMBER {
        return tokens.iter().find_map(|token| parse_number(token));
    }
    if tokens.len() > 4 {
        return None;
    }
    let words = text
        .split_whitespace()
        .map(|word| word.trim_matches(|c: char| !c.is_alphanumeric() && c != '&' && c != '-'))
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>();
    let lead = ["its", "it's", "it", "is", "the", "client", "for", "name", "called", "we're", "were"];
    let value = words
        .iter()
        .skip_while(|word| lead.contains(&word.to_lowercase().as_str()))
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn mentions_stage(clause: &str, stage: &WorkflowStage) -> bool {
    contains_phrase(clause, &stage.name)
        || stage.keywords.iter().any(|keyword| contains_phrase(clause, keyword))
}

fn missing_parameters(
    stage: &WorkflowStage,
    known: &BTreeMap<String, String>,
    fresh: &BTreeMap<String, String>,
) -> Vec<String> {
    stage
        .required_parameters
        .iter()
        .filter(|key| !known.contains_key(*key) && !fresh.contains_key(*key))
        .cloned()
        .collect()
}

/// Normalized clauses, split on punctuation and sequencing words.
fn clauses(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut pieces = lowered
        .split([',', '.', ';', '!', '?', '\n'])
        .map(|piece| format!(" {piece} "))
        .collect::<Vec<_>>();
    for connector in CLAUSE_CONNECTORS {
        pieces = pieces
            .iter()
            .flat_map(|piece| piece.split(connector).map(|part| format!(" {part} ")))
            .collect();
    }
    pieces.iter().map(|piece| normalize(piece)).filter(|piece| !piece.is_empty()).collect()
}

/// Facts stated explicitly: `client_name` and `wave_number`.
pub fn extract_parameters(text: &str) -> BTreeMap<String, String> {
    let mut parameters = BTreeMap::new();

    let tokens = tokenize(text);
    for (index, token) in tokens.iter().enumerate() {
        if token == "wave" || token == "waves" {
            let value = tokens[index + 1..]
                .iter()
                .take(2)
                .filter(|candidate| !matches!(candidate.as_str(), "number" | "no" | "nr" | "#"))
                .find_map(|candidate| parse_number(candidate));
            if let Some(value) = value {
                parameters.insert(WAVE_NUMBER.to_string(), value);
                break;
            }
        } else if let Some(value) = token.strip_prefix("wave").and_then(parse_number) {
            parameters.insert(WAVE_NUMBER.to_string(), value);
            break;
        }
    }

    if let Some(client) = extract_client(text) {
        parameters.insert(CLIENT_NAME.to_string(), client);
    }
    parameters
}

fn extract_client(text: &str) -> Option<String> {
    let words = text.split_whitespace().collect::<Vec<_>>();
    let index = words.iter().position(|word| {
        let lowered = word.to_lowercase();
        let bare = lowered.trim_end_matches(|c: char| !c.is_alphanumeric());
        bare == "client" || bare == "customer"
    })?;

    // "for client acme" and "client: acme" introduce a name; "the client wants" does not
    let introduced = words[index].ends_with([':', '='])
        || index
            .checked_sub(1)
            .and_then(|previous| words.get(previous))
            .is_some_and(|previous| matches!(previous.to_lowercase().as_str(), "for" | "of"));

    let mut filler_seen = introduced;
    let mut name = Vec::new();
    for word in &words[index + 1..] {
        let trimmed = word.trim_matches(|c: char| !c.is_alphanumeric() && c != '&' && c != '-');
        let lowered = trimmed.to_lowercase();
        if name.is_empty() && (trimmed.is_empty() || CLIENT_FILLERS.contains(&lowered.as_str())) {
            filler_seen = true;
            continue;
        }
        let starts_upper = trimmed.chars().next().is_some_and(char::is_uppercase);
        if trimmed.is_empty()
            || CLIENT_STOPS.contains(&lowered.as_str())
            || (name.is_empty() && (is_stopword(&lowered) || !(filler_seen || starts_upper)))
        {
            break;
        }
        name.push(trimmed.to_string());
        let ends_clause = word.ends_with([',', '.', ';', '!', '?']);
        if ends_clause || name.len() == 3 {
            break;
        }
    }

    if name.is_empty() {
        None
    } else {
        Some(name.join(" "))
    }
}

fn parse_number(token: &str) -> Option<String> {
    let digits = token.trim_start_matches('#');
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        digits.parse::<u32>().ok().map(|number| number.to_string())
    } else {
        None
    }
}

/// Very short input, or letters without a single vowel.
pub fn looks_like_gibberish(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.chars().count() < 3 {
        return true;
    }
    let letters = trimmed.chars().filter(|c| c.is_alphabetic()).collect::<Vec<_>>();
    !letters.is_empty()
        && !letters.iter().any(|c| matches!(c.to_ascii_lowercase(), 'a' | 'e' | 'i' | 'o' | 'u' | 'y'))
}

fn lexical_overlap(tokens: &BTreeSet<String>, stage: &WorkflowStage) -> usize {
    let vocabulary = content_tokens(&format!("{} {}", stage.name, stage.description));
    let mut score = tokens.intersection(&vocabulary).count();
    score += stage
        .keywords
        .iter()
        .filter(|keyword| tokens.iter().any(|token| token.starts_with(keyword.as_str())))
        .count();
    score
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use super::{extract_parameters, looks_like_gibberish, Classifier, RuleClassifier, SemanticHints};
    use crate::domain::classification::{Category, ClassificationResult};
    use crate::domain::conversation::{ConversationId, ConversationState, Utterance};
    use crate::domain::stage::StageId;
    use crate::taxonomy::Taxonomy;
    use crate::tracker::ClarificationTracker;

    fn classifier() -> RuleClassifier {
        RuleClassifier::new(Arc::new(Taxonomy::open_negotiation()), 2)
    }

    fn empty_state() -> ConversationState {
        ConversationState::new(ConversationId::new("conv-test"))
    }

    fn ids(result: &ClassificationResult) -> Vec<&str> {
        result.matched_stage_ids.iter().map(StageId::as_str).collect()
    }

    #[test]
    fn general_knowledge_question_is_out_of_scope() {
        let result = classifier().classify_text("who's the president of USA?", &empty_state());
        assert_eq!(result.category, Category::OutOfScope);
        assert!(result.matched_stage_ids.is_empty());
        assert!(result.confidence >= 0.5);
    }

    #[tokio::test]
    async fn rule_classifier_serves_as_async_classifier() {
        let classifier: Box<dyn Classifier> = Box::new(classifier());
        let result = classifier
            .classify(&Utterance::new("validate the documents", 0), &empty_state())
            .await
            .expect("rules never fail");
        assert_eq!(result.category, Category::VagueInScope);
        assert_eq!(ids(&result), vec!["document_validation"]);
    }

    #[test]
    fn whole_workflow_is_too_broad_over_every_stage() {
        let result = classifier().classify_text("do the open negotiation", &empty_state());
        assert_eq!(result.category, Category::TooBroad);
        assert_eq!(
            ids(&result),
            vec!["document_validation", "document_creation", "email_dispatch", "file_organization"]
        );
    }

    #[test]
    fn completed_validation_moves_focus_to_creation() {
        let result = classifier().classify_text("I already validated documents", &empty_state());
        assert_eq!(result.category, Category::VagueInScope);
        assert_eq!(ids(&result), vec!["document_creation"]);
        assert_eq!(
            result.parameters.get("completed.document_validation").map(String::as_str),
            Some("true")
        );
    }

    #[test]
    fn two_named_stages_break_the_tie_as_too_broad() {
        let result =
            classifier().classify_text("generate the offer letters and email them", &empty_state());
        assert_eq!(result.category, Category::TooBroad);
        assert_eq!(ids(&result), vec!["document_creation", "email_dispatch"]);
    }

    #[test]
    fn stage_with_all_parameters_is_well_specified() {
        let result = classifier()
            .classify_text("send the emails for client Acme Corp, wave 3", &empty_state());
        assert_eq!(result.category, Category::WellSpecified);
        assert_eq!(ids(&result), vec!["email_dispatch"]);
        assert_eq!(result.parameters.get("client_name").map(String::as_str), Some("Acme Corp"));
        assert_eq!(result.parameters.get("wave_number").map(String::as_str), Some("3"));
    }

    #[test]
    fn wave_zero_and_padded_waves_are_kept() {
        let parameters = extract_parameters("send the emails for client Acme, wave 0");
        assert_eq!(parameters.get("wave_number").map(String::as_str), Some("0"));
        assert_eq!(parameters.get("client_name").map(String::as_str), Some("Acme"));

        let padded = extract_parameters("wave 007");
        assert_eq!(padded.get("wave_number").map(String::as_str), Some("7"));
    }

    #[test]
    fn parameters_alone_keep_the_previous_focus() {
        let classifier = classifier();
        let mut tracker = ClarificationTracker::default();
        let id = ConversationId::new("conv-focus");

        let first = classifier.classify_text("I need to send emails", &tracker.snapshot(&id));
        assert_eq!(first.category, Category::VagueInScope);
        tracker.record_turn(&id, Utterance::new("I need to send emails", 0), first).expect("turn");

        let second =
            classifier.classify_text("client is Globex, wave number 2", &tracker.snapshot(&id));
        assert_eq!(second.category, Category::WellSpecified);
        assert_eq!(ids(&second), vec!["email_dispatch"]);
    }

    #[test]
    fn repeated_generic_turns_escalate_to_too_broad() {
        let classifier = classifier();
        let mut tracker = ClarificationTracker::default();
        let id = ConversationId::new("conv-streak");
        let text = "help me with the client files";

        for turn in 0..2 {
            let result = classifier.classify_text(text, &tracker.snapshot(&id));
            assert_eq!(result.category, Category::VagueInScope, "turn {turn}");
            assert!(result.matched_stage_ids.is_empty());
            tracker.record_turn(&id, Utterance::new(text, turn), result).expect("turn");
        }

        let third = classifier.classify_text(text, &tracker.snapshot(&id));
        assert_eq!(third.category, Category::TooBroad);
        assert_eq!(third.matched_stage_ids.len(), 4);
    }

    #[test]
    fn gibberish_is_out_of_scope_with_low_confidence() {
        for text in ["x", "qwrtpsdfg", "zz"] {
            let result = classifier().classify_text(text, &empty_state());
            assert_eq!(result.category, Category::OutOfScope, "{text}");
            assert!(result.confidence <= 0.2);
        }
        assert!(!looks_like_gibberish("hello there"));
    }

    #[test]
    fn hints_supply_paraphrased_stage_and_parameters() {
        let hints = SemanticHints {
            matched_stage_ids: vec![StageId::new("document_creation")],
            parameters: BTreeMap::from([("client_name".to_string(), "Initech".to_string())]),
            ..SemanticHints::default()
        };
        let result =
            classifier().classify_with_hints("put together the slides", &empty_state(), &hints);
        assert_eq!(result.category, Category::VagueInScope);
        assert_eq!(ids(&result), vec!["document_creation"]);
        assert_eq!(result.parameters.get("client_name").map(String::as_str), Some("Initech"));
    }

    #[test]
    fn unknown_hint_stages_are_ignored() {
        let hints = SemanticHints {
            matched_stage_ids: vec![StageId::new("payroll")],
            ..SemanticHints::default()
        };
        let result = classifier().classify_with_hints("what's for lunch", &empty_state(), &hints);
        assert_eq!(result.category, Category::OutOfScope);
    }

    #[test]
    fn out_of_scope_lists_lexically_related_stages() {
        let result = classifier().classify_text("update my phone contacts", &empty_state());
        assert_eq!(result.category, Category::OutOfScope);
        assert_eq!(
            result.related_stage_ids.iter().map(StageId::as_str).collect::<Vec<_>>(),
            vec!["email_dispatch"]
        );
    }

    #[test]
    fn extracts_client_and_wave_variants() {
        let cases = [
            ("for client Acme", Some("Acme"), None),
            ("client name is Umbrella Corp.", Some("Umbrella Corp"), None),
            ("client: Initech, wave #4", Some("Initech"), Some("4")),
            ("wave number 12 please", None, Some("12")),
            ("this is wave3", None, Some("3")),
            ("the client wants it", None, None),
        ];
        for (text, client, wave) in cases {
            let parameters = extract_parameters(text);
            assert_eq!(parameters.get("client_name").map(String::as_str), client, "{text}");
            assert_eq!(parameters.get("wave_number").map(String::as_str), wave, "{text}");
        }
    }
}
