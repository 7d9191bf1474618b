pub mod commands;
pub mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use negotiator_core::config::{AppConfig, ConfigOverrides, LlmProvider, LoadOptions};
use negotiator_core::domain::approval::ApprovalDecision;
use negotiator_core::domain::money::parse_brl;
use rust_decimal::Decimal;

use crate::commands::CommandResult;

#[derive(Debug, Parser)]
#[command(
    name = "negotiator",
    about = "Influencer booking negotiation agent",
    long_about = "Chat with the negotiation agent, resolve pending price approvals, and manage the local database.",
    after_help = "Examples:\n  negotiator seed\n  negotiator chat --influencer +5511999990000\n  negotiator approve --thread <id> --counter 5000\n  negotiator doctor --json"
)]
pub struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct GlobalArgs {
    #[arg(long, global = true, help = "Path to a TOML config file")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "SQLite database URL (overrides config and env)")]
    database_url: Option<String>,
    #[arg(long, global = true, help = "Log level filter, e.g. info or negotiator_agent=debug")]
    log_level: Option<String>,
    #[arg(long, global = true, help = "LLM backend: openai, ollama or offline")]
    provider: Option<LlmProvider>,
    #[arg(long, global = true, help = "Model name passed to the LLM backend")]
    model: Option<String>,
}

impl GlobalArgs {
    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            config_path: self.config.clone(),
            require_file: self.config.is_some(),
            overrides: ConfigOverrides {
                database_url: self.database_url.clone(),
                log_level: self.log_level.clone(),
                llm_provider: self.provider,
                llm_model: self.model.clone(),
                default_agent: None,
            },
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Start or resume an interactive negotiation with an influencer")]
    Chat {
        #[arg(long, help = "Agent id; defaults to negotiation.default_agent")]
        agent: Option<String>,
        #[arg(long, help = "Influencer phone number identifying the conversation")]
        influencer: String,
        #[arg(long, help = "Close any active conversation and start a fresh one")]
        new: bool,
    },
    #[command(about = "Resolve the pending price approval of a thread")]
    Approve {
        #[arg(long, help = "Thread id shown by list-conversations")]
        thread: String,
        #[command(flatten)]
        decision: DecisionArgs,
    },
    #[command(about = "Load the historical deal dataset used for benchmarks")]
    Seed,
    #[command(about = "List recent conversations with their status and owner")]
    ListConversations {
        #[arg(long, default_value_t = commands::list_conversations::DEFAULT_LIMIT)]
        limit: u32,
    },
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, LLM backend, database, migrations and seed data")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
struct DecisionArgs {
    #[arg(long, help = "Accept the proposed price")]
    approve: bool,
    #[arg(long, help = "Reject the proposed price and keep the agent's offer")]
    reject: bool,
    #[arg(
        long,
        value_name = "AMOUNT",
        value_parser = parse_amount,
        help = "Replace the proposed price with this amount, e.g. 5000 or 5.000,00"
    )]
    counter: Option<Decimal>,
}

impl DecisionArgs {
    fn decision(&self) -> ApprovalDecision {
        match self.counter {
            Some(amount) => ApprovalDecision::counter(amount),
            None if self.approve => ApprovalDecision::approve(),
            None => ApprovalDecision::reject(),
        }
    }
}

fn parse_amount(raw: &str) -> Result<Decimal, String> {
    parse_brl(raw)
        .filter(|amount| *amount > Decimal::ZERO)
        .ok_or_else(|| format!("`{raw}` is not a positive amount"))
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = cli.global.load_options();

    if let Ok(config) = AppConfig::load(options.clone()) {
        logging::init_logging(&config.logging);
    }

    let result = match cli.command {
        Command::Chat { agent, influencer, new } => {
            commands::chat::run(options, agent.as_deref(), &influencer, new)
        }
        Command::Approve { thread, decision } => {
            commands::approve::run(options, &thread, decision.decision())
        }
        Command::Seed => commands::seed::run(options),
        Command::ListConversations { limit } => commands::list_conversations::run(options, limit),
        Command::Migrate => commands::migrate::run(options),
        Command::Config => CommandResult::text(0, commands::config::run(options)),
        Command::Doctor { json } => {
            let (passed, output) = commands::doctor::run(options, json);
            CommandResult::text(if passed { 0 } else { 1 }, output)
        }
    };

    if !result.output.is_empty() {
        println!("{}", result.output);
    }
    ExitCode::from(result.exit_code)
}
