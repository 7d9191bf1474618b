use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::agent::DEFAULT_AGENT_ID;

pub const DEFAULT_CONFIG_FILE: &str = "negotiator.toml";
pub const NESTED_CONFIG_FILE: &str = "config/negotiator.toml";

pub const DEFAULT_HANDOFF_KEYWORDS: [&str; 6] =
    ["humano", "pessoa", "atendente", "operador", "supervisor", "gerente"];

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub negotiation: NegotiationConfig,
    pub guardrails: GuardrailConfig,
    pub agents: Vec<AgentProfileConfig>,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NegotiationConfig {
    pub default_agent: String,
    /// Currency per thousand views when no market evidence beats it.
    pub default_target_rate: Decimal,
    pub benchmark_samples: usize,
    /// Messages replayed into state when a thread has no checkpoint.
    pub history_limit: u32,
    pub reprice_after_turns: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailConfig {
    pub handoff_keywords: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AgentProfileConfig {
    pub agent_id: String,
    pub name: String,
    #[serde(default)]
    pub persona: String,
    pub target_rate: Option<Decimal>,
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
    Ollama,
    Offline,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
            Self::Offline => "offline",
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
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub default_agent: Option<String>,
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
            database: DatabaseConfig {
                url: "sqlite://negotiator.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 30,
                max_retries: 2,
            },
            negotiation: NegotiationConfig {
                default_agent: DEFAULT_AGENT_ID.to_string(),
                default_target_rate: Decimal::from(40),
                benchmark_samples: 5,
                history_limit: 20,
                reprice_after_turns: None,
            },
            guardrails: GuardrailConfig {
                handoff_keywords: DEFAULT_HANDOFF_KEYWORDS
                    .iter()
                    .map(|keyword| keyword.to_string())
                    .collect(),
            },
            agents: Vec::new(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
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
            "ollama" => Ok(Self::Ollama),
            "offline" => Ok(Self::Offline),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama|offline)"
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
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
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
        }

        if let Some(negotiation) = patch.negotiation {
            if let Some(default_agent) = negotiation.default_agent {
                self.negotiation.default_agent = default_agent;
            }
            if let Some(rate) = negotiation.default_target_rate {
                self.negotiation.default_target_rate = rate;
            }
            if let Some(samples) = negotiation.benchmark_samples {
                self.negotiation.benchmark_samples = samples;
            }
            if let Some(history_limit) = negotiation.history_limit {
                self.negotiation.history_limit = history_limit;
            }
            if let Some(turns) = negotiation.reprice_after_turns {
                self.negotiation.reprice_after_turns = Some(turns);
            }
        }

        if let Some(guardrails) = patch.guardrails {
            if let Some(keywords) = guardrails.handoff_keywords {
                self.guardrails.handoff_keywords = keywords;
            }
        }

        if let Some(agents) = patch.agents {
            self.agents = agents;
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
        if let Some(value) = read_env("NEGOTIATOR_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("NEGOTIATOR_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("NEGOTIATOR_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("NEGOTIATOR_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("NEGOTIATOR_DATABASE_TIMEOUT_SECS", &value)?;
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
            self.llm.timeout_secs = parse_u64("NEGOTIATOR_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("NEGOTIATOR_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("NEGOTIATOR_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("NEGOTIATOR_DEFAULT_AGENT") {
            self.negotiation.default_agent = value;
        }
        if let Some(value) = read_env("NEGOTIATOR_TARGET_RATE") {
            self.negotiation.default_target_rate = parse_decimal("NEGOTIATOR_TARGET_RATE", &value)?;
        }
        if let Some(value) = read_env("NEGOTIATOR_BENCHMARK_SAMPLES") {
            self.negotiation.benchmark_samples =
                parse_u32("NEGOTIATOR_BENCHMARK_SAMPLES", &value)? as usize;
        }
        if let Some(value) = read_env("NEGOTIATOR_HISTORY_LIMIT") {
            self.negotiation.history_limit = parse_u32("NEGOTIATOR_HISTORY_LIMIT", &value)?;
        }
        if let Some(value) = read_env("NEGOTIATOR_REPRICE_AFTER_TURNS") {
            self.negotiation.reprice_after_turns =
                Some(parse_u32("NEGOTIATOR_REPRICE_AFTER_TURNS", &value)?);
        }

        if let Some(value) = read_env("NEGOTIATOR_HANDOFF_KEYWORDS") {
            self.guardrails.handoff_keywords = value
                .split(',')
                .map(|keyword| keyword.trim().to_string())
                .filter(|keyword| !keyword.is_empty())
                .collect();
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
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(default_agent) = overrides.default_agent {
            self.negotiation.default_agent = default_agent;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_negotiation(&self.negotiation)?;
        validate_guardrails(&self.guardrails)?;
        validate_agents(&self.agents, &self.negotiation.default_agent)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

/// First config file found on the standard search path, if any.
pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from(NESTED_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
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

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the openai provider (set NEGOTIATOR_LLM_API_KEY)"
                        .to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
        LlmProvider::Offline => {}
    }

    if let Some(base_url) = &llm.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "llm.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_negotiation(negotiation: &NegotiationConfig) -> Result<(), ConfigError> {
    if negotiation.default_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "negotiation.default_agent must not be empty".to_string(),
        ));
    }

    if negotiation.default_target_rate <= Decimal::ZERO {
        return Err(ConfigError::Validation(
            "negotiation.default_target_rate must be greater than zero".to_string(),
        ));
    }

    if negotiation.benchmark_samples == 0 {
        return Err(ConfigError::Validation(
            "negotiation.benchmark_samples must be greater than zero".to_string(),
        ));
    }

    if negotiation.history_limit == 0 {
        return Err(ConfigError::Validation(
            "negotiation.history_limit must be greater than zero".to_string(),
        ));
    }

    if negotiation.reprice_after_turns == Some(0) {
        return Err(ConfigError::Validation(
            "negotiation.reprice_after_turns must be greater than zero when set".to_string(),
        ));
    }

    Ok(())
}

fn validate_guardrails(guardrails: &GuardrailConfig) -> Result<(), ConfigError> {
    if guardrails.handoff_keywords.iter().any(|keyword| keyword.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "guardrails.handoff_keywords must not contain blank entries".to_string(),
        ));
    }
    Ok(())
}

fn validate_agents(agents: &[AgentProfileConfig], default_agent: &str) -> Result<(), ConfigError> {
    let mut seen = BTreeSet::new();
    for agent in agents {
        if agent.agent_id.trim().is_empty() {
            return Err(ConfigError::Validation("agents.agent_id must not be empty".to_string()));
        }
        if !seen.insert(agent.agent_id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "agents.agent_id `{}` is declared more than once",
                agent.agent_id
            )));
        }
        if agent.target_rate.is_some_and(|rate| rate <= Decimal::ZERO) {
            return Err(ConfigError::Validation(format!(
                "agents.target_rate for `{}` must be greater than zero",
                agent.agent_id
            )));
        }
    }

    if default_agent != DEFAULT_AGENT_ID && !seen.contains(default_agent) {
        return Err(ConfigError::Validation(format!(
            "negotiation.default_agent `{default_agent}` is not a configured agent"
        )));
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

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_decimal(key: &str, value: &str) -> Result<Decimal, ConfigError> {
    value.trim().parse::<Decimal>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    negotiation: Option<NegotiationPatch>,
    guardrails: Option<GuardrailPatch>,
    agents: Option<Vec<AgentProfileConfig>>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct NegotiationPatch {
    default_agent: Option<String>,
    default_target_rate: Option<Decimal>,
    benchmark_samples: Option<usize>,
    history_limit: Option<u32>,
    reprice_after_turns: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct GuardrailPatch {
    handoff_keywords: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
