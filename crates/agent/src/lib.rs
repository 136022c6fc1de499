//! Reasoning-collaborator plumbing and the conversation runtime.
//!
//! This crate connects the deterministic engine in `negotiator-core` to an
//! external language model:
//! - `llm` speaks the provider wire formats (OpenAI-compatible, Anthropic)
//! - `collaborator` adds timeouts and the retry budget
//! - `classify` turns collaborator replies into semantic hints for the rules
//! - `composer` writes outbound messages, falling back to templates
//! - `runtime` implements `handle_utterance` end to end
//!
//! # Safety Principle
//!
//! The model is strictly a translator. It never decides the category, the
//! dialogue move, or the resolved stage; those come from the core crate.

pub mod bootstrap;
pub mod classify;
pub mod collaborator;
pub mod composer;
pub mod llm;
pub mod runtime;

pub use bootstrap::{bootstrap, bootstrap_with_config, build_runtime, Application, BootstrapError};
pub use composer::{ComposedMessage, MessageSource, ResponseComposer};
pub use runtime::{ConversationRuntime, RuntimeSettings, TurnKind, TurnOutcome};
