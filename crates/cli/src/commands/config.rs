use std::env;
use std::fs;
use std::path::Path;

use negotiator_core::config::{resolve_config_path, AppConfig, LoadOptions};
use toml::Value;

/// Effective configuration, one line per key, with where each value came from.
pub fn run(options: LoadOptions) -> String {
    let config_file_path = resolve_config_path(options.config_path.as_deref());
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_key: &str| {
        field_source(key_path, Some(env_key), config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let mut lines =
        vec!["effective config (source precedence: flag > env > file > default):".to_string()];

    lines.push(render_line(
        "database.url",
        &config.database.url,
        source("database.url", "NEGOTIATOR_DATABASE_URL"),
    ));
    lines.push(render_line(
        "database.max_connections",
        &config.database.max_connections.to_string(),
        source("database.max_connections", "NEGOTIATOR_DATABASE_MAX_CONNECTIONS"),
    ));
    lines.push(render_line(
        "database.timeout_secs",
        &config.database.timeout_secs.to_string(),
        source("database.timeout_secs", "NEGOTIATOR_DATABASE_TIMEOUT_SECS"),
    ));

    lines.push(render_line(
        "llm.provider",
        config.llm.provider.as_str(),
        source("llm.provider", "NEGOTIATOR_LLM_PROVIDER"),
    ));
    lines.push(render_line(
        "llm.model",
        &config.llm.model,
        source("llm.model", "NEGOTIATOR_LLM_MODEL"),
    ));
    lines.push(render_line(
        "llm.base_url",
        config.llm.base_url.as_deref().unwrap_or("<unset>"),
        source("llm.base_url", "NEGOTIATOR_LLM_BASE_URL"),
    ));
    let llm_api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };
    lines.push(render_line(
        "llm.api_key",
        llm_api_key,
        source("llm.api_key", "NEGOTIATOR_LLM_API_KEY"),
    ));
    lines.push(render_line(
        "llm.timeout_secs",
        &config.llm.timeout_secs.to_string(),
        source("llm.timeout_secs", "NEGOTIATOR_LLM_TIMEOUT_SECS"),
    ));
    lines.push(render_line(
        "llm.max_retries",
        &config.llm.max_retries.to_string(),
        source("llm.max_retries", "NEGOTIATOR_LLM_MAX_RETRIES"),
    ));

    lines.push(render_line(
        "negotiation.default_agent",
        &config.negotiation.default_agent,
        source("negotiation.default_agent", "NEGOTIATOR_DEFAULT_AGENT"),
    ));
    lines.push(render_line(
        "negotiation.default_target_rate",
        &config.negotiation.default_target_rate.to_string(),
        source("negotiation.default_target_rate", "NEGOTIATOR_TARGET_RATE"),
    ));
    lines.push(render_line(
        "negotiation.benchmark_samples",
        &config.negotiation.benchmark_samples.to_string(),
        source("negotiation.benchmark_samples", "NEGOTIATOR_BENCHMARK_SAMPLES"),
    ));
    lines.push(render_line(
        "negotiation.history_limit",
        &config.negotiation.history_limit.to_string(),
        source("negotiation.history_limit", "NEGOTIATOR_HISTORY_LIMIT"),
    ));
    lines.push(render_line(
        "negotiation.reprice_after_turns",
        &config
            .negotiation
            .reprice_after_turns
            .map(|turns| turns.to_string())
            .unwrap_or_else(|| "<unset>".to_string()),
        source("negotiation.reprice_after_turns", "NEGOTIATOR_REPRICE_AFTER_TURNS"),
    ));

    lines.push(render_line(
        "guardrails.handoff_keywords",
        &config.guardrails.handoff_keywords.join(","),
        source("guardrails.handoff_keywords", "NEGOTIATOR_HANDOFF_KEYWORDS"),
    ));
    let agents: Vec<&str> = config.agents.iter().map(|agent| agent.agent_id.as_str()).collect();
    let agents = if agents.is_empty() { "<none>".to_string() } else { agents.join(",") };
    lines.push(render_line(
        "agents",
        &agents,
        field_source("agents", None, config_file_doc.as_ref(), config_file_path.as_deref()),
    ));

    lines.push(render_line(
        "logging.level",
        &config.logging.level,
        source("logging.level", "NEGOTIATOR_LOGGING_LEVEL"),
    ));
    lines.push(render_line(
        "logging.format",
        &format!("{:?}", config.logging.format).to_lowercase(),
        source("logging.format", "NEGOTIATOR_LOGGING_FORMAT"),
    ));

    lines.join("\n")
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
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
