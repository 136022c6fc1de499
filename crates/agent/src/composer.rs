use std::sync::Arc;

use negotiator_core::compose::{validate_composed, CollaboratorRequest, CollaboratorTask};
use negotiator_core::domain::action::DialogueAction;
use negotiator_core::domain::conversation::ConversationState;
use negotiator_core::errors::ApplicationError;
use negotiator_core::taxonomy::Taxonomy;
use negotiator_core::templates::{FallbackTemplates, TemplateError};
use serde::Serialize;
use tracing::warn;

use crate::collaborator::Collaborator;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSource {
    Collaborator,
    Template,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComposedMessage {
    pub text: String,
    pub source: MessageSource,
}

/// Turns a dialogue action into the outbound message.
///
/// With a collaborator the message is generated and validated against the
/// conversation's earlier messages; after the retry budget is spent the
/// deterministic template is used instead. Without one, templates only.
pub struct ResponseComposer {
    taxonomy: Arc<Taxonomy>,
    templates: FallbackTemplates,
    collaborator: Option<Collaborator>,
    temperature: f32,
}

impl ResponseComposer {
    pub fn deterministic(taxonomy: Arc<Taxonomy>) -> Result<Self, TemplateError> {
        Ok(Self { taxonomy, templates: FallbackTemplates::new()?, collaborator: None, temperature: 0.0 })
    }

    pub fn with_collaborator(
        taxonomy: Arc<Taxonomy>,
        collaborator: Collaborator,
        temperature: f32,
    ) -> Result<Self, TemplateError> {
        Ok(Self {
            taxonomy,
            templates: FallbackTemplates::new()?,
            collaborator: Some(collaborator),
            temperature,
        })
    }

    pub fn uses_collaborator(&self) -> bool {
        self.collaborator.is_some()
    }

    pub async fn compose(
        &self,
        action: &DialogueAction,
        state: &ConversationState,
    ) -> Result<ComposedMessage, ApplicationError> {
        let Some(collaborator) = &self.collaborator else {
            return self.from_template(action);
        };

        let request = CollaboratorRequest::compose(&self.taxonomy, state, action);
        let request = &request;
        let temperature = self.temperature;
        let generated = collaborator
            .with_retry(CollaboratorTask::Compose, move |_| async move {
                let reply = collaborator.request(request, temperature).await?;
                validate_composed(&reply, state)
            })
            .await;

        match generated {
            Ok(text) => Ok(ComposedMessage { text, source: MessageSource::Collaborator }),
            Err(error) => {
                warn!(
                    event_name = "collaborator.fallback_template",
                    conversation_id = %state.conversation_id(),
                    action = action.kind().as_str(),
                    error_class = error.error_class(),
                    error = %error,
                    "composition failed, using fallback template"
                );
                self.from_template(action)
            }
        }
    }

    fn from_template(&self, action: &DialogueAction) -> Result<ComposedMessage, ApplicationError> {
        let text = self
            .templates
            .render(action, &self.taxonomy)
            .map_err(|error| ApplicationError::Configuration(error.to_string()))?;
        Ok(ComposedMessage { text, source: MessageSource::Template })
    }
}
