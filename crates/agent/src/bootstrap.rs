use std::sync::Arc;

use negotiator_core::classifier::{Classifier, RuleClassifier};
use negotiator_core::config::{AppConfig, ConfigError, LoadOptions};
use negotiator_core::taxonomy::{Taxonomy, TaxonomyError};
use negotiator_core::templates::TemplateError;
use thiserror::Error;
use tracing::info;

use crate::classify::CollaboratorClassifier;
use crate::collaborator::Collaborator;
use crate::composer::ResponseComposer;
use crate::llm::{build_client, LlmClient, LlmError};
use crate::runtime::{ConversationRuntime, RuntimeSettings};

pub struct Application {
    pub config: AppConfig,
    pub taxonomy: Arc<Taxonomy>,
    pub runtime: ConversationRuntime,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("taxonomy failed to load: {0}")]
    Taxonomy(#[from] TaxonomyError),
    #[error("fallback templates failed to load: {0}")]
    Templates(#[from] TemplateError),
    #[error("collaborator client could not be built: {0}")]
    Collaborator(#[from] LlmError),
}

pub fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config)
}

pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        llm_enabled = config.llm.enabled,
        provider = config.llm.provider.as_str(),
        "starting negotiator bootstrap"
    );

    let taxonomy = Arc::new(config.taxonomy.load()?);
    info!(
        event_name = "system.bootstrap.taxonomy_loaded",
        correlation_id = "bootstrap",
        stages = taxonomy.len(),
        "workflow taxonomy loaded"
    );

    let client = if config.llm.enabled { Some(build_client(&config.llm)?) } else { None };
    let runtime = build_runtime(&config, taxonomy.clone(), client)?;

    Ok(Application { config, taxonomy, runtime })
}

/// Wires the runtime. `client` is ignored when the collaborator is disabled.
pub fn build_runtime(
    config: &AppConfig,
    taxonomy: Arc<Taxonomy>,
    client: Option<Arc<dyn LlmClient>>,
) -> Result<ConversationRuntime, BootstrapError> {
    let clarification = &config.clarification;
    let rules = RuleClassifier::new(taxonomy.clone(), clarification.vague_streak_limit);
    let settings = RuntimeSettings {
        strategy: clarification.strategy_settings(),
        dedup: clarification.dedup_policy(),
        capability_inquiry: clarification.capability_inquiry,
    };

    let (classifier, composer): (Arc<dyn Classifier>, ResponseComposer) =
        match client.filter(|_| config.llm.enabled) {
            Some(client) => {
                let collaborator = Collaborator::from_config(client, &config.llm);
                (
                    Arc::new(CollaboratorClassifier::new(
                        rules,
                        collaborator.clone(),
                        config.llm.temperature,
                    )),
                    ResponseComposer::with_collaborator(
                        taxonomy.clone(),
                        collaborator,
                        config.llm.compose_temperature,
                    )?,
                )
            }
            None => (Arc::new(rules), ResponseComposer::deterministic(taxonomy.clone())?),
        };

    info!(
        event_name = "system.bootstrap.runtime_ready",
        correlation_id = "bootstrap",
        collaborator = composer.uses_collaborator(),
        max_rounds = settings.strategy.max_rounds,
        dedup_method = ?settings.dedup.method,
        "conversation runtime ready"
    );
    Ok(ConversationRuntime::new(taxonomy, classifier, composer, settings))
}
