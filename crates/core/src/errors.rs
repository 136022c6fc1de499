use thiserror::Error;

use crate::domain::conversation::ConversationId;
use crate::domain::stage::StageId;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("unknown workflow stage `{stage_id}`")]
    UnknownStage { stage_id: StageId },
    #[error("conversation `{conversation_id}` is already finalized")]
    ConversationFinalized { conversation_id: ConversationId },
    #[error("utterance text must not be empty")]
    EmptyUtterance,
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Failures at the boundary with the external reasoning collaborator.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("classification unavailable: {reason}")]
    ClassificationUnavailable { reason: String },
    #[error("degenerate collaborator response: {reason}")]
    DegenerateResponse { reason: String },
    #[error("malformed collaborator response: {reason}")]
    MalformedResponse { reason: String },
}

impl CollaboratorError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::ClassificationUnavailable { reason: reason.into() }
    }

    pub fn degenerate(reason: impl Into<String>) -> Self {
        Self::DegenerateResponse { reason: reason.into() }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedResponse { reason: reason.into() }
    }

    /// All collaborator failures are transient from the conversation's point of view.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ClassificationUnavailable { .. }
            | Self::DegenerateResponse { .. }
            | Self::MalformedResponse { .. } => true,
        }
    }

    pub fn error_class(&self) -> &'static str {
        match self {
            Self::ClassificationUnavailable { .. } => "classification_unavailable",
            Self::DegenerateResponse { .. } => "degenerate_response",
            Self::MalformedResponse { .. } => "malformed_collaborator_response",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "That conversation can't take more messages. Start a new one to continue."
            }
            Self::ServiceUnavailable { .. } => {
                "I couldn't process that just now. Please try again in a moment."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        match value {
            ApplicationError::Domain(error @ DomainError::ConversationFinalized { .. })
            | ApplicationError::Domain(error @ DomainError::EmptyUtterance) => Self::BadRequest {
                message: error.to_string(),
                correlation_id: "unassigned".to_owned(),
            },
            ApplicationError::Domain(DomainError::UnknownStage { .. })
            | ApplicationError::Domain(DomainError::InvariantViolation(_)) => Self::Internal {
                message: "domain validation failed".to_owned(),
                correlation_id: "unassigned".to_owned(),
            },
            ApplicationError::Collaborator(error) => Self::ServiceUnavailable {
                message: error.to_string(),
                correlation_id: "unassigned".to_owned(),
            },
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: "unassigned".to_owned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::conversation::ConversationId;
    use crate::errors::{ApplicationError, CollaboratorError, DomainError, InterfaceError};

    #[test]
    fn finalized_conversation_maps_to_bad_request() {
        let interface = ApplicationError::from(DomainError::ConversationFinalized {
            conversation_id: ConversationId::new("conv-1"),
        })
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest { ref correlation_id, .. } if correlation_id == "req-1"
        ));
    }

    #[test]
    fn collaborator_failure_maps_to_try_again_message() {
        let interface =
            ApplicationError::from(CollaboratorError::unavailable("connection refused"))
                .into_interface("req-2");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "I couldn't process that just now. Please try again in a moment."
        );
    }

    #[test]
    fn every_collaborator_error_is_retryable() {
        for error in [
            CollaboratorError::unavailable("timeout"),
            CollaboratorError::degenerate("duplicate"),
            CollaboratorError::malformed("missing category"),
        ] {
            assert!(error.is_retryable(), "{error} should be retryable");
        }
        assert_eq!(
            CollaboratorError::malformed("x").error_class(),
            "malformed_collaborator_response"
        );
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface =
            ApplicationError::Configuration("bad taxonomy".to_owned()).into_interface("req-4");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }
}
