//! Deterministic message rendering, used when the collaborator is disabled
//! or keeps failing.

use serde::Serialize;
use tera::{Context, Tera};
use thiserror::Error;

use crate::domain::action::{ActionKind, DialogueAction};
use crate::domain::stage::StageId;
use crate::taxonomy::Taxonomy;
use crate::text::humanize_key;

const REDIRECT: &str = "I can only help with the Open Negotiation workflow, so that request is outside what I can do here.\
{% if stages %} The closest fit{% if stages | length > 1 %}s are{% else %} is{% endif %} \
{% for stage in stages %}{{ stage.name }}{% if not loop.last %}, {% endif %}{% endfor %}.\
{% else %} I can help with {{ all_stages | join(sep=\", \") }}.{% endif %} \
What would you like to do in the negotiation?";

const NARROW_QUESTION: &str = "{% if stage_name %}About {{ stage_name }}: {% endif %}{{ question }}";

const PHASE_BREAKDOWN: &str = "{{ question }}\
{% if not forced %}{% for stage in stages %}
{{ loop.index }}. {{ stage.name }}: {{ stage.description }}{% endfor %}{% endif %}";

const FINALIZE: &str = "Got it. I'm handing this off to {{ stage_name }}\
{% if parameters %} with {% for parameter in parameters %}{{ parameter.key }} {{ parameter.value }}\
{% if not loop.last %}, {% endif %}{% endfor %}{% endif %}.\
{% if missing %} It still needs the {{ missing | join(sep=\" and \") }}, which will be requested next.{% endif %}";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to register fallback templates: {0}")]
    Register(#[source] tera::Error),
    #[error("failed to render `{template}` template: {source}")]
    Render { template: &'static str, source: tera::Error },
}

#[derive(Debug, Serialize)]
struct StageView {
    id: String,
    name: String,
    description: String,
}

#[derive(Debug, Serialize)]
struct ParameterView {
    key: String,
    value: String,
}

#[derive(Clone, Debug)]
pub struct FallbackTemplates {
    tera: Tera,
}

impl FallbackTemplates {
    pub fn new() -> Result<Self, TemplateError> {
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![
            (template_name(ActionKind::Redirect), REDIRECT),
            (template_name(ActionKind::NarrowQuestion), NARROW_QUESTION),
            (template_name(ActionKind::PhaseBreakdown), PHASE_BREAKDOWN),
            (template_name(ActionKind::Finalize), FINALIZE),
        ])
        .map_err(TemplateError::Register)?;
        Ok(Self { tera })
    }

    pub fn render(&self, action: &DialogueAction, taxonomy: &Taxonomy) -> Result<String, TemplateError> {
        let template = template_name(action.kind());
        let mut context = Context::new();
        context.insert("stages", &stage_views(&action.stage_ids(), taxonomy));
        context.insert(
            "all_stages",
            &taxonomy.stages().iter().map(|stage| stage.name.clone()).collect::<Vec<_>>(),
        );
        context.insert("question", &action.question().map(|q| q.text.clone()).unwrap_or_default());

        let mut stage_name = String::new();
        let mut forced = false;
        let mut parameters = Vec::new();
        let mut missing = Vec::new();
        match action {
            DialogueAction::NarrowQuestion { targeted_stage_ids, .. } => {
                if let [only] = targeted_stage_ids.as_slice() {
                    stage_name = display_name(only, taxonomy);
                }
            }
            DialogueAction::PhaseBreakdown { forced: was_forced, .. } => forced = *was_forced,
            DialogueAction::Finalize { resolved_stage_id, resolved_parameters, missing_parameters } => {
                stage_name = display_name(resolved_stage_id, taxonomy);
                parameters = resolved_parameters
                    .iter()
                    .filter(|(key, _)| !key.starts_with("completed."))
                    .map(|(key, value)| ParameterView { key: humanize_key(key), value: value.clone() })
                    .collect();
                missing = missing_parameters.iter().map(|key| humanize_key(key)).collect();
            }
            DialogueAction::Redirect { .. } => {}
        }
        context.insert("stage_name", &stage_name);
        context.insert("forced", &forced);
        context.insert("parameters", &parameters);
        context.insert("missing", &missing);

        self.tera
            .render(template, &context)
            .map(|rendered| rendered.trim().to_string())
            .map_err(|source| TemplateError::Render { template, source })
    }
}

fn template_name(kind: ActionKind) -> &'static str {
    match kind {
        ActionKind::Redirect => "redirect.txt",
        ActionKind::NarrowQuestion => "narrow_question.txt",
        ActionKind::PhaseBreakdown => "phase_breakdown.txt",
        ActionKind::Finalize => "finalize.txt",
    }
}

fn stage_views(ids: &[StageId], taxonomy: &Taxonomy) -> Vec<StageView> {
    ids.iter()
        .filter_map(|id| taxonomy.stage(id).ok())
        .map(|stage| StageView {
            id: stage.id.to_string(),
            name: stage.name.clone(),
            description: stage.description.clone(),
        })
        .collect()
}

fn display_name(id: &StageId, taxonomy: &Taxonomy) -> String {
    taxonomy.stage(id).map(|stage| stage.name.clone()).unwrap_or_else(|_| id.to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::FallbackTemplates;
    use crate::domain::action::{
        ActionKind, DialogueAction, Question, QuestionFocus, QuestionSignature, QuestionType,
    };
    use crate::domain::stage::StageId;
    use crate::taxonomy::Taxonomy;

    fn render(action: &DialogueAction) -> String {
        let templates = FallbackTemplates::new().expect("templates register");
        templates.render(action, &Taxonomy::open_negotiation()).expect("render")
    }

    #[test]
    fn redirect_without_suggestions_lists_every_stage() {
        let message = render(&DialogueAction::Redirect { suggested_stage_ids: Vec::new() });
        assert!(message.contains("outside what I can do"));
        assert!(message.contains("Document Validation, Document Creation, Email Dispatch, File Organization"));
    }

    #[test]
    fn redirect_names_suggested_stages() {
        let message = render(&DialogueAction::Redirect {
            suggested_stage_ids: vec![StageId::new("email_dispatch")],
        });
        assert!(message.contains("The closest fit is Email Dispatch."), "{message}");
    }

    #[test]
    fn breakdown_lists_candidates_with_descriptions() {
        let candidates = vec![StageId::new("document_creation"), StageId::new("email_dispatch")];
        let question = Question::new(
            QuestionSignature::new(
                ActionKind::PhaseBreakdown,
                QuestionType::Goal,
                QuestionFocus::Stage,
                &candidates,
            ),
            "Which one first?",
        );
        let message = render(&DialogueAction::PhaseBreakdown {
            candidate_stage_ids: candidates,
            question,
            forced: false,
        });
        assert!(message.starts_with("Which one first?"));
        assert!(message.contains("\n1. Document Creation: "));
        assert!(message.contains("\n2. Email Dispatch: "));
    }

    #[test]
    fn finalize_mentions_parameters_and_missing_ones() {
        let message = render(&DialogueAction::Finalize {
            resolved_stage_id: StageId::new("email_dispatch"),
            resolved_parameters: BTreeMap::from([
                ("client_name".to_string(), "Acme".to_string()),
                ("completed.document_creation".to_string(), "true".to_string()),
            ]),
            missing_parameters: vec!["wave_number".to_string()],
        });
        assert_eq!(
            message,
            "Got it. I'm handing this off to Email Dispatch with client name Acme. \
             It still needs the wave number, which will be requested next."
        );
    }
}
