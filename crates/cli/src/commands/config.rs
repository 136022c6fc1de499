use std::env;
use std::fs;
use std::path::Path;

use negotiator_core::config::{resolve_config_path, AppConfig, LoadOptions};
use toml::Value;

pub fn run(options: LoadOptions) -> String {
    let config_file_path = resolve_config_path(options.config_path.as_deref());
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let llm = &config.llm;
    let clarification = &config.clarification;
    let api_key = if llm.api_key.is_some() { "<redacted>" } else { "<unset>" };
    let mut api_key_envs = vec!["NEGOTIATOR_LLM_API_KEY"];
    api_key_envs.extend(llm.provider.api_key_env());
    let taxonomy_path = config
        .taxonomy
        .path
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "<built-in>".to_string());

    let fields: Vec<(&str, String, Vec<&str>)> = vec![
        ("llm.enabled", llm.enabled.to_string(), vec!["NEGOTIATOR_LLM_ENABLED"]),
        ("llm.provider", llm.provider.as_str().to_string(), vec!["NEGOTIATOR_LLM_PROVIDER"]),
        ("llm.model", llm.model.clone(), vec!["NEGOTIATOR_LLM_MODEL"]),
        ("llm.base_url", llm.effective_base_url().to_string(), vec!["NEGOTIATOR_LLM_BASE_URL"]),
        ("llm.api_key", api_key.to_string(), api_key_envs),
        ("llm.timeout_secs", llm.timeout_secs.to_string(), vec!["NEGOTIATOR_LLM_TIMEOUT_SECS"]),
        ("llm.max_retries", llm.max_retries.to_string(), vec!["NEGOTIATOR_LLM_MAX_RETRIES"]),
        (
            "llm.retry_backoff_ms",
            llm.retry_backoff_ms.to_string(),
            vec!["NEGOTIATOR_LLM_RETRY_BACKOFF_MS"],
        ),
        (
            "clarification.max_rounds",
            clarification.max_rounds.to_string(),
            vec!["NEGOTIATOR_CLARIFICATION_MAX_ROUNDS"],
        ),
        (
            "clarification.dedup_method",
            clarification.dedup_method.as_str().to_string(),
            vec!["NEGOTIATOR_CLARIFICATION_DEDUP_METHOD"],
        ),
        (
            "clarification.similarity_threshold",
            clarification.similarity_threshold.to_string(),
            vec!["NEGOTIATOR_CLARIFICATION_SIMILARITY_THRESHOLD"],
        ),
        (
            "clarification.vague_streak_limit",
            clarification.vague_streak_limit.to_string(),
            vec!["NEGOTIATOR_CLARIFICATION_VAGUE_STREAK_LIMIT"],
        ),
        (
            "clarification.redirect_limit",
            clarification.redirect_limit.to_string(),
            vec!["NEGOTIATOR_CLARIFICATION_REDIRECT_LIMIT"],
        ),
        (
            "clarification.capability_inquiry",
            clarification.capability_inquiry.to_string(),
            vec!["NEGOTIATOR_CLARIFICATION_CAPABILITY_INQUIRY"],
        ),
        ("taxonomy.path", taxonomy_path, vec!["NEGOTIATOR_TAXONOMY_PATH"]),
        (
            "logging.level",
            config.logging.level.clone(),
            vec!["NEGOTIATOR_LOGGING_LEVEL", "NEGOTIATOR_LOG_LEVEL"],
        ),
        (
            "logging.format",
            format!("{:?}", config.logging.format).to_lowercase(),
            vec!["NEGOTIATOR_LOGGING_FORMAT", "NEGOTIATOR_LOG_FORMAT"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_keys) in fields {
        let source = field_source(
            key,
            env_keys.as_slice(),
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(key, &value, source));
    }
    lines.join("\n")
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
