use negotiator_agent::llm::build_client;
use negotiator_core::config::{AppConfig, LoadOptions};
use negotiator_db::repositories::SqlDealRepository;
use negotiator_db::{connect_from_config, migrations};
use serde::Serialize;

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

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, reason: &str) -> Self {
        Self { name, status: CheckStatus::Skipped, details: format!("skipped because {reason}") }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

impl DoctorReport {
    fn from_checks(checks: Vec<DoctorCheck>) -> Self {
        let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
        let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
        let summary = if all_pass {
            "doctor: all readiness checks passed".to_string()
        } else {
            "doctor: one or more readiness checks failed".to_string()
        };

        Self { overall_status, summary, checks }
    }

    fn passed(&self) -> bool {
        self.overall_status == CheckStatus::Pass
    }
}

/// Readiness report plus whether every check passed.
pub fn run(options: LoadOptions, json_output: bool) -> (bool, String) {
    let report = build_report(options);
    let passed = report.passed();

    if json_output {
        let rendered = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return (passed, rendered);
    }

    (passed, render_human(&report))
}

fn build_report(options: LoadOptions) -> DoctorReport {
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            let reason = "configuration did not load";
            return DoctorReport::from_checks(vec![
                DoctorCheck::fail("config_validation", error.to_string()),
                DoctorCheck::skipped("llm_backend", reason),
                DoctorCheck::skipped("database_connectivity", reason),
                DoctorCheck::skipped("migrations", reason),
                DoctorCheck::skipped("seed_data", reason),
            ]);
        }
    };

    let mut checks = vec![
        DoctorCheck::pass("config_validation", "configuration loaded and validated"),
        check_llm_backend(&config),
    ];
    checks.extend(check_database(&config));

    DoctorReport::from_checks(checks)
}

fn check_llm_backend(config: &AppConfig) -> DoctorCheck {
    match build_client(&config.llm) {
        Ok(client) => DoctorCheck::pass(
            "llm_backend",
            format!("{} client ready (model `{}`)", client.name(), config.llm.model),
        ),
        Err(error) => DoctorCheck::fail("llm_backend", format!("{error:#}")),
    }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                DoctorCheck::fail(
                    "database_connectivity",
                    format!("failed to initialize async runtime: {error}"),
                ),
                DoctorCheck::skipped("migrations", "the database was not reachable"),
                DoctorCheck::skipped("seed_data", "the database was not reachable"),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_from_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck::fail(
                        "database_connectivity",
                        format!("failed to connect to database: {error}"),
                    ),
                    DoctorCheck::skipped("migrations", "the database was not reachable"),
                    DoctorCheck::skipped("seed_data", "the database was not reachable"),
                ];
            }
        };

        let mut checks = vec![DoctorCheck::pass(
            "database_connectivity",
            format!("connected using `{}`", config.database.url),
        )];

        let migrated = match migrations::pending_count(&pool).await {
            Ok(0) => {
                checks.push(DoctorCheck::pass("migrations", "schema is up to date"));
                true
            }
            Ok(pending) => {
                checks.push(DoctorCheck::fail(
                    "migrations",
                    format!("{pending} pending migration(s); run `negotiator migrate`"),
                ));
                false
            }
            Err(error) => {
                checks.push(DoctorCheck::fail(
                    "migrations",
                    format!("could not inspect migrations: {error}"),
                ));
                false
            }
        };

        if migrated {
            checks.push(check_seed_data(SqlDealRepository::new(pool.clone()).count().await));
        } else {
            checks.push(DoctorCheck::skipped("seed_data", "the schema is not migrated"));
        }

        pool.close().await;
        checks
    })
}

fn check_seed_data<E: std::fmt::Display>(count: Result<i64, E>) -> DoctorCheck {
    match count {
        Ok(0) => DoctorCheck::fail(
            "seed_data",
            "no historical deals; run `negotiator seed` to load benchmarks",
        ),
        Ok(count) => DoctorCheck::pass("seed_data", format!("{count} historical deals available")),
        Err(error) => DoctorCheck::fail("seed_data", format!("could not count deals: {error}")),
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
