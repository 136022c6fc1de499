use negotiator_core::config::{AppConfig, LoadOptions};
use negotiator_core::domain::stage::WorkflowStage;
use serde::Serialize;

use crate::commands::CommandResult;

const COMMAND: &str = "taxonomy";

#[derive(Debug, Serialize)]
struct TaxonomyListing<'a> {
    command: &'static str,
    status: &'static str,
    source: String,
    stages: &'a [WorkflowStage],
}

pub fn run(options: LoadOptions) -> CommandResult {
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(COMMAND, "config_validation", error.to_string(), 2)
        }
    };
    let taxonomy = match config.taxonomy.load() {
        Ok(taxonomy) => taxonomy,
        Err(error) => return CommandResult::failure(COMMAND, "taxonomy_invalid", error.to_string(), 2),
    };

    let source = config
        .taxonomy
        .path
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "built-in".to_string());
    CommandResult::payload(&TaxonomyListing {
        command: COMMAND,
        status: "ok",
        source,
        stages: taxonomy.stages(),
    })
}
