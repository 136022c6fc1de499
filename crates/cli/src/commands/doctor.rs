use negotiator_agent::llm::build_client;
use negotiator_core::config::{AppConfig, LoadOptions};
use negotiator_core::domain::action::DialogueAction;
use negotiator_core::taxonomy::Taxonomy;
use negotiator_core::templates::FallbackTemplates;
use serde::Serialize;

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(options: LoadOptions, json_output: bool) -> CommandResult {
    let report = build_report(options);
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 2 };

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return CommandResult { exit_code, output };
    }

    CommandResult { exit_code, output: render_human(&report) }
}

fn build_report(options: LoadOptions) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(options) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            match config.taxonomy.load() {
                Ok(taxonomy) => {
                    checks.push(DoctorCheck {
                        name: "taxonomy",
                        status: CheckStatus::Pass,
                        details: format!(
                            "{} stages: {}",
                            taxonomy.len(),
                            taxonomy.stages().iter().map(|stage| stage.id.as_str()).collect::<Vec<_>>().join(" -> ")
                        ),
                    });
                    checks.push(check_templates(&taxonomy));
                }
                Err(error) => {
                    checks.push(DoctorCheck {
                        name: "taxonomy",
                        status: CheckStatus::Fail,
                        details: error.to_string(),
                    });
                    checks.push(skipped("fallback_templates", "taxonomy did not load"));
                }
            }
            checks.push(check_collaborator(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.push(skipped("taxonomy", "configuration did not load"));
            checks.push(skipped("fallback_templates", "configuration did not load"));
            checks.push(skipped("collaborator_readiness", "configuration did not load"));
        }
    }

    let all_pass = checks.iter().all(|check| check.status != CheckStatus::Fail);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn skipped(name: &'static str, reason: &str) -> DoctorCheck {
    DoctorCheck { name, status: CheckStatus::Skipped, details: format!("skipped because {reason}") }
}

/// Renders a breakdown and a finalize for every stage.
fn check_templates(taxonomy: &Taxonomy) -> DoctorCheck {
    let templates = match FallbackTemplates::new() {
        Ok(templates) => templates,
        Err(error) => {
            return DoctorCheck {
                name: "fallback_templates",
                status: CheckStatus::Fail,
                details: error.to_string(),
            }
        }
    };

    let mut samples = vec![DialogueAction::Redirect { suggested_stage_ids: taxonomy.stage_ids() }];
    samples.extend(taxonomy.stages().iter().map(|stage| DialogueAction::Finalize {
        resolved_stage_id: stage.id.clone(),
        resolved_parameters: Default::default(),
        missing_parameters: stage.required_parameters.clone(),
    }));

    for action in &samples {
        if let Err(error) = templates.render(action, taxonomy) {
            return DoctorCheck {
                name: "fallback_templates",
                status: CheckStatus::Fail,
                details: error.to_string(),
            };
        }
    }
    DoctorCheck {
        name: "fallback_templates",
        status: CheckStatus::Pass,
        details: format!("rendered {} sample messages", samples.len()),
    }
}

fn check_collaborator(config: &AppConfig) -> DoctorCheck {
    if !config.llm.enabled {
        return DoctorCheck {
            name: "collaborator_readiness",
            status: CheckStatus::Skipped,
            details: "collaborator disabled; classification and messages are deterministic"
                .to_string(),
        };
    }

    match build_client(&config.llm) {
        Ok(_) => DoctorCheck {
            name: "collaborator_readiness",
            status: CheckStatus::Pass,
            details: format!(
                "{} client for model `{}` at {} (not contacted)",
                config.llm.provider.as_str(),
                config.llm.model,
                config.llm.effective_base_url()
            ),
        },
        Err(error) => DoctorCheck {
            name: "collaborator_readiness",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
