use negotiator_agent::llm::build_client;
use negotiator_agent::runtime::AgentRuntime;
use negotiator_core::config::{AppConfig, LoadOptions};
use negotiator_core::domain::approval::ApprovalDecision;
use negotiator_core::domain::conversation::ThreadId;
use negotiator_core::errors::{ApplicationError, DomainError};
use negotiator_db::DbPool;

use crate::commands::{block_on, load_config, open_database, CommandResult, StepError};

pub fn run(options: LoadOptions, thread_id: &str, decision: ApprovalDecision) -> CommandResult {
    let config = match load_config("approve", options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let thread_id = ThreadId(thread_id.trim().to_owned());

    let result = block_on("approve", async {
        let pool = open_database(&config).await?;
        let runtime = build_runtime(&config, pool.clone())?;
        let reply = runtime
            .handle_approval(&thread_id, decision)
            .await
            .map_err(|error| application_failure(&error))?;
        pool.close().await;
        Ok(reply)
    });

    match result {
        Ok(reply) => CommandResult::success(
            "approve",
            format!("{} ({}): {}", thread_id, decision.outcome().as_str(), reply.reply),
        ),
        Err(failure) => failure,
    }
}

pub(crate) fn build_runtime(config: &AppConfig, pool: DbPool) -> Result<AgentRuntime, StepError> {
    let client = build_client(&config.llm)
        .map_err(|error| ("llm_backend", format!("{error:#}"), 2u8))?;
    AgentRuntime::from_config(config, pool, client)
        .map_err(|error| application_failure(&error))
}

/// Maps a runtime failure onto the command error classes.
pub(crate) fn application_failure(error: &ApplicationError) -> StepError {
    match error {
        ApplicationError::Domain(DomainError::Flow(flow)) => ("flow", flow.to_string(), 7),
        ApplicationError::Domain(DomainError::InvariantViolation(message)) => {
            ("not_found", message.clone(), 7)
        }
        ApplicationError::Persistence(message) => ("persistence", message.clone(), 4),
        ApplicationError::Integration(message) => ("llm_backend", message.clone(), 8),
        ApplicationError::Configuration(message) => ("config_validation", message.clone(), 2),
    }
}
