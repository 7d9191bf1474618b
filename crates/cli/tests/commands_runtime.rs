use std::env;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use negotiator_cli::commands::{approve, doctor, list_conversations, migrate, seed};
use negotiator_core::config::LoadOptions;
use negotiator_core::domain::approval::ApprovalDecision;
use serde_json::Value;
use tempfile::TempDir;

#[test]
fn migrate_returns_success_with_valid_env() {
    let dir = TempDir::new().expect("tempdir");
    let url = database_url(dir.path());
    with_env(&[("NEGOTIATOR_DATABASE_URL", url.as_str())], || {
        let result = migrate::run(LoadOptions::default());
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_non_sqlite_url() {
    with_env(&[("NEGOTIATOR_DATABASE_URL", "postgres://localhost/negotiator")], || {
        let result = migrate::run(LoadOptions::default());
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn seed_loads_deals_once() {
    let dir = TempDir::new().expect("tempdir");
    let url = database_url(dir.path());
    with_env(&[("NEGOTIATOR_DATABASE_URL", url.as_str())], || {
        let first = seed::run(LoadOptions::default());
        assert_eq!(first.exit_code, 0, "expected first seed invocation success");
        let first_payload = parse_payload(&first.output);
        assert_eq!(first_payload["status"], "ok");
        assert_eq!(first_payload["message"], "seeded 20 historical deals");

        let second = seed::run(LoadOptions::default());
        assert_eq!(second.exit_code, 0, "expected second seed invocation success");
        let second_payload = parse_payload(&second.output);
        assert_eq!(second_payload["status"], "ok");
        assert_eq!(
            second_payload["message"],
            "deal table already holds 20 deals; nothing inserted"
        );
    });
}

#[test]
fn list_conversations_reports_empty_database() {
    let dir = TempDir::new().expect("tempdir");
    let url = database_url(dir.path());
    with_env(&[("NEGOTIATOR_DATABASE_URL", url.as_str())], || {
        let result = list_conversations::run(LoadOptions::default(), 10);
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "list-conversations");
        assert_eq!(payload["message"], "no conversations yet");
    });
}

#[test]
fn approve_unknown_thread_is_not_found() {
    let dir = TempDir::new().expect("tempdir");
    let url = database_url(dir.path());
    with_env(
        &[
            ("NEGOTIATOR_DATABASE_URL", url.as_str()),
            ("NEGOTIATOR_LLM_PROVIDER", "offline"),
        ],
        || {
            let result =
                approve::run(LoadOptions::default(), "missing-thread", ApprovalDecision::approve());
            assert_eq!(result.exit_code, 7);

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "approve");
            assert_eq!(payload["status"], "error");
            assert_eq!(payload["error_class"], "not_found");
        },
    );
}

#[test]
fn doctor_flags_missing_seed_data_until_seeded() {
    let dir = TempDir::new().expect("tempdir");
    let url = database_url(dir.path());
    with_env(
        &[
            ("NEGOTIATOR_DATABASE_URL", url.as_str()),
            ("NEGOTIATOR_LLM_PROVIDER", "offline"),
        ],
        || {
            assert_eq!(migrate::run(LoadOptions::default()).exit_code, 0);

            let (passed, output) = doctor::run(LoadOptions::default(), true);
            assert!(!passed);
            let report: Value = serde_json::from_str(&output).expect("doctor json");
            assert_eq!(report["overall_status"], "fail");
            assert_eq!(check_status(&report, "migrations"), "pass");
            assert_eq!(check_status(&report, "seed_data"), "fail");

            assert_eq!(seed::run(LoadOptions::default()).exit_code, 0);
            let (passed, output) = doctor::run(LoadOptions::default(), false);
            assert!(passed, "{output}");
            assert!(output.starts_with("doctor: all readiness checks passed"));
        },
    );
}

#[test]
fn doctor_skips_database_checks_without_config() {
    with_env(&[("NEGOTIATOR_LLM_PROVIDER", "gemini")], || {
        let (passed, output) = doctor::run(LoadOptions::default(), true);
        assert!(!passed);

        let report: Value = serde_json::from_str(&output).expect("doctor json");
        assert_eq!(check_status(&report, "config_validation"), "fail");
        assert_eq!(check_status(&report, "database_connectivity"), "skipped");
    });
}

fn check_status<'a>(report: &'a Value, name: &str) -> &'a str {
    report["checks"]
        .as_array()
        .and_then(|checks| checks.iter().find(|check| check["name"] == name))
        .and_then(|check| check["status"].as_str())
        .unwrap_or("missing")
}

fn database_url(dir: &Path) -> String {
    format!("sqlite://{}", dir.join("negotiator.db").display())
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "NEGOTIATOR_DATABASE_URL",
        "NEGOTIATOR_DATABASE_MAX_CONNECTIONS",
        "NEGOTIATOR_DATABASE_TIMEOUT_SECS",
        "NEGOTIATOR_LLM_PROVIDER",
        "NEGOTIATOR_LLM_API_KEY",
        "NEGOTIATOR_LLM_BASE_URL",
        "NEGOTIATOR_LLM_MODEL",
        "NEGOTIATOR_LLM_TIMEOUT_SECS",
        "NEGOTIATOR_LLM_MAX_RETRIES",
        "NEGOTIATOR_DEFAULT_AGENT",
        "NEGOTIATOR_TARGET_RATE",
        "NEGOTIATOR_BENCHMARK_SAMPLES",
        "NEGOTIATOR_HISTORY_LIMIT",
        "NEGOTIATOR_REPRICE_AFTER_TURNS",
        "NEGOTIATOR_HANDOFF_KEYWORDS",
        "NEGOTIATOR_LOGGING_LEVEL",
        "NEGOTIATOR_LOGGING_FORMAT",
        "NEGOTIATOR_LOG_LEVEL",
        "NEGOTIATOR_LOG_FORMAT",
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
