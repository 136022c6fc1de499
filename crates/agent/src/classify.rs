use async_trait::async_trait;
use negotiator_core::classifier::{looks_like_gibberish, Classifier, RuleClassifier};
use negotiator_core::compose::{
    parse_classification_reply, CollaboratorRequest, CollaboratorTask, CollaboratorVerdict,
};
use negotiator_core::domain::classification::ClassificationResult;
use negotiator_core::domain::conversation::{ConversationState, Utterance};
use negotiator_core::errors::CollaboratorError;
use tracing::debug;

use crate::collaborator::Collaborator;

/// Asks the collaborator for semantic hints and lets the rules decide.
///
/// The reply only contributes stage relatedness and extracted parameters;
/// the category always comes from [`RuleClassifier::classify_with_hints`].
pub struct CollaboratorClassifier {
    rules: RuleClassifier,
    collaborator: Collaborator,
    temperature: f32,
}

impl CollaboratorClassifier {
    pub fn new(rules: RuleClassifier, collaborator: Collaborator, temperature: f32) -> Self {
        Self { rules, collaborator, temperature }
    }

    pub fn rules(&self) -> &RuleClassifier {
        &self.rules
    }

    async fn consult(
        &self,
        text: &str,
        state: &ConversationState,
    ) -> Result<CollaboratorVerdict, CollaboratorError> {
        let taxonomy = self.rules.taxonomy();
        let request = CollaboratorRequest::classify(taxonomy, state, text);
        let request = &request;
        let collaborator = &self.collaborator;
        let temperature = self.temperature;

        collaborator
            .with_retry(CollaboratorTask::Classify, move |_| async move {
                let reply = collaborator.request(request, temperature).await?;
                parse_classification_reply(&reply, taxonomy)
            })
            .await
    }
}

#[async_trait]
impl Classifier for CollaboratorClassifier {
    async fn classify(
        &self,
        utterance: &Utterance,
        state: &ConversationState,
    ) -> Result<ClassificationResult, CollaboratorError> {
        if looks_like_gibberish(&utterance.text) {
            return Ok(self.rules.classify_text(&utterance.text, state));
        }

        let verdict = self.consult(&utterance.text, state).await?;
        let result = self.rules.classify_with_hints(&utterance.text, state, &verdict.hints);
        if result.category != verdict.category {
            debug!(
                event_name = "classifier.disagreement",
                conversation_id = %state.conversation_id(),
                collaborator_category = verdict.category.as_str(),
                collaborator_confidence = verdict.confidence,
                rule_category = result.category.as_str(),
                "rule classifier overrode collaborator category"
            );
        }
        Ok(result)
    }
}
