use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dedup::{DedupMethod, DedupPolicy};
use crate::strategy::StrategySettings;
use crate::taxonomy::{Taxonomy, TaxonomyError};

/// Files probed, in order, when no explicit config path is given.
pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["negotiator.toml", "config/negotiator.toml"];

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub clarification: ClarificationConfig,
    pub taxonomy: TaxonomyConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    /// Off means classification and composition are fully deterministic.
    pub enabled: bool,
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub temperature: f32,
    pub compose_temperature: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClarificationConfig {
    pub max_rounds: u32,
    pub dedup_method: DedupMethod,
    pub similarity_threshold: f64,
    pub vague_streak_limit: usize,
    pub redirect_limit: usize,
    pub capability_inquiry: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaxonomyConfig {
    /// Built-in Open Negotiation taxonomy when unset.
    pub path: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(rename = "openai")]
    OpenAi,
    Groq,
    Ollama,
    Anthropic,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Groq => "groq",
            Self::Ollama => "ollama",
            Self::Anthropic => "anthropic",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::Ollama => "http://localhost:11434/v1",
            Self::Anthropic => "https://api.anthropic.com/v1",
        }
    }

    pub fn requires_api_key(&self) -> bool {
        !matches!(self, Self::Ollama)
    }

    /// Provider-specific fallback for `llm.api_key`.
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::Groq => Some("GROQ_API_KEY"),
            Self::Anthropic => Some("ANTHROPIC_API_KEY"),
            Self::Ollama => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub llm_enabled: Option<bool>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub max_rounds: Option<u32>,
    pub taxonomy_path: Option<PathBuf>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                enabled: false,
                provider: LlmProvider::Groq,
                api_key: None,
                base_url: None,
                model: "llama-3.3-70b-versatile".to_string(),
                timeout_secs: 30,
                max_retries: 1,
                retry_backoff_ms: 250,
                temperature: 0.0,
                compose_temperature: 0.3,
            },
            clarification: ClarificationConfig::default(),
            taxonomy: TaxonomyConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl Default for ClarificationConfig {
    fn default() -> Self {
        Self {
            max_rounds: 4,
            dedup_method: DedupMethod::Signature,
            similarity_threshold: 0.8,
            vague_streak_limit: 2,
            redirect_limit: 3,
            capability_inquiry: true,
        }
    }
}

impl ClarificationConfig {
    pub fn strategy_settings(&self) -> StrategySettings {
        StrategySettings { max_rounds: self.max_rounds, redirect_limit: self.redirect_limit }
    }

    pub fn dedup_policy(&self) -> DedupPolicy {
        DedupPolicy::new(self.dedup_method, self.similarity_threshold)
    }
}

impl TaxonomyConfig {
    pub fn load(&self) -> Result<Taxonomy, TaxonomyError> {
        match &self.path {
            Some(path) => Taxonomy::load(path),
            None => Ok(Taxonomy::open_negotiation()),
        }
    }
}

impl LlmConfig {
    pub fn effective_base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or_else(|| self.provider.default_base_url())
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "groq" => Ok(Self::Groq),
            "ollama" => Ok(Self::Ollama),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|groq|ollama|anthropic)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATHS[0]));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(llm) = patch.llm {
            if let Some(enabled) = llm.enabled {
                self.llm.enabled = enabled;
            }
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
            if let Some(retry_backoff_ms) = llm.retry_backoff_ms {
                self.llm.retry_backoff_ms = retry_backoff_ms;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(compose_temperature) = llm.compose_temperature {
                self.llm.compose_temperature = compose_temperature;
            }
        }

        if let Some(clarification) = patch.clarification {
            if let Some(max_rounds) = clarification.max_rounds {
                self.clarification.max_rounds = max_rounds;
            }
            if let Some(dedup_method) = clarification.dedup_method {
                self.clarification.dedup_method = dedup_method;
            }
            if let Some(similarity_threshold) = clarification.similarity_threshold {
                self.clarification.similarity_threshold = similarity_threshold;
            }
            if let Some(vague_streak_limit) = clarification.vague_streak_limit {
                self.clarification.vague_streak_limit = vague_streak_limit;
            }
            if let Some(redirect_limit) = clarification.redirect_limit {
                self.clarification.redirect_limit = redirect_limit;
            }
            if let Some(capability_inquiry) = clarification.capability_inquiry {
                self.clarification.capability_inquiry = capability_inquiry;
            }
        }

        if let Some(taxonomy) = patch.taxonomy {
            if let Some(path) = taxonomy.path {
                self.taxonomy.path = Some(path);
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("NEGOTIATOR_LLM_ENABLED") {
            self.llm.enabled = parse_env("NEGOTIATOR_LLM_ENABLED", &value)?;
        }
        if let Some(value) = read_env("NEGOTIATOR_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("NEGOTIATOR_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("NEGOTIATOR_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("NEGOTIATOR_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("NEGOTIATOR_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_env("NEGOTIATOR_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("NEGOTIATOR_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_env("NEGOTIATOR_LLM_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("NEGOTIATOR_LLM_RETRY_BACKOFF_MS") {
            self.llm.retry_backoff_ms = parse_env("NEGOTIATOR_LLM_RETRY_BACKOFF_MS", &value)?;
        }
        if let Some(value) = read_env("NEGOTIATOR_LLM_TEMPERATURE") {
            self.llm.temperature = parse_env("NEGOTIATOR_LLM_TEMPERATURE", &value)?;
        }
        if let Some(value) = read_env("NEGOTIATOR_LLM_COMPOSE_TEMPERATURE") {
            self.llm.compose_temperature =
                parse_env("NEGOTIATOR_LLM_COMPOSE_TEMPERATURE", &value)?;
        }
        if self.llm.api_key.is_none() {
            // provider-conventional variable, e.g. GROQ_API_KEY
            if let Some(value) = self.llm.provider.api_key_env().and_then(read_env) {
                self.llm.api_key = Some(secret_value(value));
            }
        }

        if let Some(value) = read_env("NEGOTIATOR_CLARIFICATION_MAX_ROUNDS") {
            self.clarification.max_rounds =
                parse_env("NEGOTIATOR_CLARIFICATION_MAX_ROUNDS", &value)?;
        }
        if let Some(value) = read_env("NEGOTIATOR_CLARIFICATION_DEDUP_METHOD") {
            self.clarification.dedup_method =
                parse_env("NEGOTIATOR_CLARIFICATION_DEDUP_METHOD", &value)?;
        }
        if let Some(value) = read_env("NEGOTIATOR_CLARIFICATION_SIMILARITY_THRESHOLD") {
            self.clarification.similarity_threshold =
                parse_env("NEGOTIATOR_CLARIFICATION_SIMILARITY_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("NEGOTIATOR_CLARIFICATION_VAGUE_STREAK_LIMIT") {
            self.clarification.vague_streak_limit =
                parse_env("NEGOTIATOR_CLARIFICATION_VAGUE_STREAK_LIMIT", &value)?;
        }
        if let Some(value) = read_env("NEGOTIATOR_CLARIFICATION_REDIRECT_LIMIT") {
            self.clarification.redirect_limit =
                parse_env("NEGOTIATOR_CLARIFICATION_REDIRECT_LIMIT", &value)?;
        }
        if let Some(value) = read_env("NEGOTIATOR_CLARIFICATION_CAPABILITY_INQUIRY") {
            self.clarification.capability_inquiry =
                parse_env("NEGOTIATOR_CLARIFICATION_CAPABILITY_INQUIRY", &value)?;
        }

        if let Some(value) = read_env("NEGOTIATOR_TAXONOMY_PATH") {
            self.taxonomy.path = Some(PathBuf::from(value));
        }

        let log_level =
            read_env("NEGOTIATOR_LOGGING_LEVEL").or_else(|| read_env("NEGOTIATOR_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("NEGOTIATOR_LOGGING_FORMAT").or_else(|| read_env("NEGOTIATOR_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(enabled) = overrides.llm_enabled {
            self.llm.enabled = enabled;
        }
        if let Some(provider) = overrides.llm_provider {
            self.llm.provider = provider;
        }
        if let Some(model) = overrides.llm_model {
            self.llm.model = model;
        }
        if let Some(max_rounds) = overrides.max_rounds {
            self.clarification.max_rounds = max_rounds;
        }
        if let Some(path) = overrides.taxonomy_path {
            self.taxonomy.path = Some(path);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_llm(&self.llm)?;
        validate_clarification(&self.clarification)?;
        validate_taxonomy(&self.taxonomy)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

/// Explicit path if it exists, otherwise the first default candidate that does.
pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    DEFAULT_CONFIG_PATHS.iter().map(PathBuf::from).find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.max_retries > 5 {
        return Err(ConfigError::Validation("llm.max_retries must be at most 5".to_string()));
    }

    for (key, value) in [("llm.temperature", llm.temperature), ("llm.compose_temperature", llm.compose_temperature)] {
        if !(0.0..=2.0).contains(&value) {
            return Err(ConfigError::Validation(format!("{key} must be in range 0.0..=2.0")));
        }
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    if let Some(base_url) = &llm.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "llm.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    if llm.enabled && llm.provider.requires_api_key() {
        let missing = llm
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing {
            return Err(ConfigError::Validation(format!(
                "llm.api_key is required when llm.enabled is true and provider is {}",
                llm.provider.as_str()
            )));
        }
    }

    Ok(())
}

fn validate_clarification(clarification: &ClarificationConfig) -> Result<(), ConfigError> {
    if clarification.max_rounds == 0 {
        return Err(ConfigError::Validation(
            "clarification.max_rounds must be greater than zero".to_string(),
        ));
    }

    let threshold = clarification.similarity_threshold;
    if !(threshold > 0.0 && threshold <= 1.0) {
        return Err(ConfigError::Validation(
            "clarification.similarity_threshold must be in range (0.0, 1.0]".to_string(),
        ));
    }

    if clarification.vague_streak_limit == 0 {
        return Err(ConfigError::Validation(
            "clarification.vague_streak_limit must be greater than zero".to_string(),
        ));
    }

    if clarification.redirect_limit > 10 {
        return Err(ConfigError::Validation(
            "clarification.redirect_limit must be in range 0..=10".to_string(),
        ));
    }

    Ok(())
}

fn validate_taxonomy(taxonomy: &TaxonomyConfig) -> Result<(), ConfigError> {
    if let Some(path) = &taxonomy.path {
        if !path.exists() {
            return Err(ConfigError::Validation(format!(
                "taxonomy.path `{}` does not exist",
                path.display()
            )));
        }
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    llm: Option<LlmPatch>,
    clarification: Option<ClarificationPatch>,
    taxonomy: Option<TaxonomyPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    enabled: Option<bool>,
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    retry_backoff_ms: Option<u64>,
    temperature: Option<f32>,
    compose_temperature: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct ClarificationPatch {
    max_rounds: Option<u32>,
    dedup_method: Option<DedupMethod>,
    similarity_threshold: Option<f64>,
    vague_streak_limit: Option<usize>,
    redirect_limit: Option<usize>,
    capability_inquiry: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct TaxonomyPatch {
    path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
