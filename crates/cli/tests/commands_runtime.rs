use std::env;
use std::fs;
use std::io::Cursor;
use std::sync::{Arc, Mutex, OnceLock};

use negotiator_agent::build_runtime;
use negotiator_cli::commands::chat::converse;
use negotiator_cli::commands::{classify, config, doctor, taxonomy};
use negotiator_core::config::{AppConfig, LoadOptions};
use negotiator_core::domain::conversation::ConversationId;
use negotiator_core::taxonomy::Taxonomy;
use serde_json::Value;
use tempfile::TempDir;

#[test]
fn classify_well_specified_request_finalizes() {
    with_env(&[], || {
        let result =
            classify::run(LoadOptions::default(), "send the emails for client Acme Corp, wave 3");
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "classify");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["classification"]["category"], "WELL_SPECIFIED");
        assert_eq!(payload["action"]["action"], "finalize");
        assert_eq!(payload["action"]["resolved_stage_id"], "email_dispatch");
        assert_eq!(payload["action"]["resolved_parameters"]["wave_number"], "3");
    });
}

#[test]
fn classify_out_of_scope_request_redirects() {
    with_env(&[], || {
        let result = classify::run(LoadOptions::default(), "who's the president of USA?");
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["classification"]["category"], "OUT_OF_SCOPE");
        assert_eq!(payload["action"]["action"], "redirect");
        assert!(payload["message"].as_str().unwrap_or_default().contains("Open Negotiation"));
    });
}

#[test]
fn classify_rejects_blank_text() {
    with_env(&[], || {
        let result = classify::run(LoadOptions::default(), "   ");
        assert_eq!(result.exit_code, 1);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "bad_request");
    });
}

#[test]
fn classify_reports_config_failure() {
    with_env(&[("NEGOTIATOR_CLARIFICATION_MAX_ROUNDS", "0")], || {
        let result = classify::run(LoadOptions::default(), "do the open negotiation");
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn taxonomy_lists_builtin_stages_in_order() {
    with_env(&[], || {
        let result = taxonomy::run(LoadOptions::default());
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["source"], "built-in");
        let ids = payload["stages"]
            .as_array()
            .expect("stages array")
            .iter()
            .map(|stage| stage["id"].as_str().unwrap_or_default().to_string())
            .collect::<Vec<_>>();
        assert_eq!(
            ids,
            vec!["document_validation", "document_creation", "email_dispatch", "file_organization"]
        );
    });
}

#[test]
fn taxonomy_reads_file_from_env() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("stages.toml");
    fs::write(
        &path,
        r#"
[[stage]]
id = "intake"
name = "Intake"
description = "Collect the request"

[[stage]]
id = "review"
name = "Review"
description = "Review the request"
prerequisite_stage_ids = ["intake"]
"#,
    )
    .expect("write taxonomy");
    let path_value = path.display().to_string();

    with_env(&[("NEGOTIATOR_TAXONOMY_PATH", path_value.as_str())], || {
        let result = taxonomy::run(LoadOptions::default());
        assert_eq!(result.exit_code, 0, "{}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["source"], path_value.as_str());
        assert_eq!(payload["stages"].as_array().map(Vec::len), Some(2));
        assert_eq!(payload["stages"][1]["prerequisite_stage_ids"][0], "intake");
    });
}

#[test]
fn config_redacts_api_key_and_attributes_sources() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("negotiator.toml");
    fs::write(&path, "[clarification]\nmax_rounds = 6\n").expect("write config");

    with_env(&[("NEGOTIATOR_LLM_API_KEY", "super-secret-value")], || {
        let output = config::run(LoadOptions {
            config_path: Some(path.clone()),
            require_file: true,
            ..LoadOptions::default()
        });

        assert!(!output.contains("super-secret-value"), "{output}");
        assert!(output.contains("- llm.api_key = <redacted> (source: env (NEGOTIATOR_LLM_API_KEY))"));
        assert!(output.contains(&format!(
            "- clarification.max_rounds = 6 (source: file ({}))",
            path.display()
        )));
        assert!(output.contains("- clarification.dedup_method = signature (source: default)"));
    });
}

#[test]
fn doctor_passes_offline_with_defaults() {
    with_env(&[], || {
        let result = doctor::run(LoadOptions::default(), true);
        assert_eq!(result.exit_code, 0, "{}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "pass");
        let checks = payload["checks"].as_array().expect("checks");
        let collaborator = checks
            .iter()
            .find(|check| check["name"] == "collaborator_readiness")
            .expect("collaborator check");
        assert_eq!(collaborator["status"], "skipped");
    });
}

#[test]
fn doctor_fails_when_enabled_collaborator_has_no_key() {
    with_env(&[("NEGOTIATOR_LLM_ENABLED", "true"), ("NEGOTIATOR_LLM_PROVIDER", "groq")], || {
        let result = doctor::run(LoadOptions::default(), false);
        assert_eq!(result.exit_code, 2);
        assert!(result.output.starts_with("doctor: one or more readiness checks failed"));
        assert!(result.output.contains("- [fail] config_validation:"));
        assert!(result.output.contains("- [skip] taxonomy:"));
    });
}

#[tokio::test]
async fn chat_runs_until_handoff() {
    let runtime = build_runtime(&AppConfig::default(), Arc::new(Taxonomy::open_negotiation()), None)
        .expect("runtime");
    let input = Cursor::new("I need to send emails for client Acme\n\nwave 7\nnever read\n");
    let mut output = Vec::new();

    let summary = converse(&runtime, ConversationId::new("conv-chat"), input, &mut output)
        .await
        .expect("chat");

    assert_eq!(summary.turns, 2);
    let handoff = summary.handoff.expect("handoff");
    assert_eq!(handoff.resolved_stage_id.as_str(), "email_dispatch");

    let transcript = String::from_utf8(output).expect("utf8");
    assert!(transcript.contains("\"resolved_stage_id\": \"email_dispatch\""), "{transcript}");
    assert!(!transcript.contains("never read"));
}

#[tokio::test]
async fn chat_reset_and_quit() {
    let runtime = build_runtime(&AppConfig::default(), Arc::new(Taxonomy::open_negotiation()), None)
        .expect("runtime");
    let id = ConversationId::new("conv-reset");
    let input = Cursor::new("I need to send some emails\n/reset\n/quit\nwave 3\n");
    let mut output = Vec::new();

    let summary = converse(&runtime, id.clone(), input, &mut output).await.expect("chat");

    assert_eq!(summary.turns, 1);
    assert!(summary.handoff.is_none());
    assert!(runtime.snapshot(&id).is_empty());
    assert!(String::from_utf8(output).expect("utf8").contains("Starting over"));
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).unwrap_or_else(|error| {
        panic!("output should be valid JSON ({error}): {output}");
    })
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "NEGOTIATOR_LLM_ENABLED",
        "NEGOTIATOR_LLM_PROVIDER",
        "NEGOTIATOR_LLM_API_KEY",
        "NEGOTIATOR_LLM_BASE_URL",
        "NEGOTIATOR_LLM_MODEL",
        "NEGOTIATOR_LLM_TIMEOUT_SECS",
        "NEGOTIATOR_LLM_MAX_RETRIES",
        "NEGOTIATOR_LLM_RETRY_BACKOFF_MS",
        "NEGOTIATOR_LLM_TEMPERATURE",
        "NEGOTIATOR_LLM_COMPOSE_TEMPERATURE",
        "NEGOTIATOR_CLARIFICATION_MAX_ROUNDS",
        "NEGOTIATOR_CLARIFICATION_DEDUP_METHOD",
        "NEGOTIATOR_CLARIFICATION_SIMILARITY_THRESHOLD",
        "NEGOTIATOR_CLARIFICATION_VAGUE_STREAK_LIMIT",
        "NEGOTIATOR_CLARIFICATION_REDIRECT_LIMIT",
        "NEGOTIATOR_CLARIFICATION_CAPABILITY_INQUIRY",
        "NEGOTIATOR_TAXONOMY_PATH",
        "NEGOTIATOR_LOGGING_LEVEL",
        "NEGOTIATOR_LOGGING_FORMAT",
        "NEGOTIATOR_LOG_LEVEL",
        "NEGOTIATOR_LOG_FORMAT",
        "GROQ_API_KEY",
        "OPENAI_API_KEY",
        "ANTHROPIC_API_KEY",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
