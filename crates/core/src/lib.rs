//! Deterministic core of the Open Negotiation clarification engine.
//!
//! Classifies utterances against a fixed workflow taxonomy, tracks what each
//! conversation has established, and picks the next dialogue move. Nothing in
//! this crate performs network I/O; the reasoning collaborator plugs in from
//! `negotiator-agent` through [`classifier::Classifier`] and the request
//! contract in [`compose`].

pub mod audit;
pub mod classifier;
pub mod compose;
pub mod config;
pub mod dedup;
pub mod domain;
pub mod errors;
pub mod handoff;
pub mod inquiry;
pub mod strategy;
pub mod taxonomy;
pub mod templates;
pub mod text;
pub mod tracker;

pub use classifier::{Classifier, RuleClassifier, SemanticHints};
pub use dedup::{DedupMethod, DedupPolicy};
pub use domain::action::{
    ActionKind, DialogueAction, Question, QuestionFocus, QuestionSignature, QuestionType,
};
pub use domain::classification::{Category, ClassificationResult};
pub use domain::conversation::{ConversationId, ConversationState, Utterance};
pub use domain::stage::{StageId, WorkflowStage};
pub use errors::{ApplicationError, CollaboratorError, DomainError, InterfaceError};
pub use handoff::{HandoffSink, InMemoryHandoffSink, WorkflowHandoff};
pub use strategy::{StrategySelector, StrategySettings};
pub use taxonomy::{Taxonomy, TaxonomyError};
pub use tracker::ClarificationTracker;
