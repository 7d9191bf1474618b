use anyhow::Result;
use console::style;
use dialoguer::Input;
use tracing::error;

use negotiator_agent::runtime::{AgentRuntime, Session};
use negotiator_core::config::LoadOptions;
use negotiator_core::domain::approval::{ApprovalDecision, ApprovalRequest};
use negotiator_core::domain::conversation::{Owner, ThreadId};
use negotiator_core::errors::{ApplicationError, DomainError, GENERIC_FAILURE_REPLY};
use negotiator_core::flows::FlowError;

use crate::commands::approve::{application_failure, build_runtime};
use crate::commands::{block_on, load_config, open_database, CommandResult};

const EXIT_WORDS: [&str; 3] = ["sair", "exit", "quit"];

/// Terminal side of a chat session. The loop only talks to this, so scripted sessions
/// can stand in for a person.
pub trait ChatIo {
    /// The next counterpart message, or `None` when input is exhausted.
    fn read_message(&mut self) -> Result<Option<String>>;
    /// Operator answer to a pending approval.
    fn read_approval(&mut self, request: &ApprovalRequest) -> Result<String>;
    fn show_reply(&mut self, text: &str);
    fn show_notice(&mut self, text: &str);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatEnd {
    UserExit,
    Handoff,
    Closed,
    EndOfInput,
}

pub fn run(
    options: LoadOptions,
    agent_id: Option<&str>,
    phone: &str,
    force_new: bool,
) -> CommandResult {
    let config = match load_config("chat", options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let agent_id = agent_id.unwrap_or(config.negotiation.default_agent.as_str()).to_owned();

    let result = block_on("chat", async {
        let pool = open_database(&config).await?;
        let runtime = build_runtime(&config, pool.clone())?;
        let session = runtime
            .start_or_resume(&agent_id, phone, force_new)
            .await
            .map_err(|error| application_failure(&error))?;

        let mut terminal = TerminalIo;
        terminal.show_notice(&banner(&session, runtime.client_name()));
        let end = drive(&runtime, &session, &mut terminal)
            .await
            .map_err(|error| ("terminal", format!("{error:#}"), 9u8))?;
        pool.close().await;
        Ok(end)
    });

    match result {
        Ok(end) => CommandResult::text(0, farewell(end)),
        Err(failure) => failure,
    }
}

/// Runs the conversation until the counterpart leaves, a human takes over or the thread
/// closes.
pub async fn drive(
    runtime: &AgentRuntime,
    session: &Session,
    io: &mut impl ChatIo,
) -> Result<ChatEnd> {
    let thread_id = &session.conversation.thread_id;

    if let Some(request) = pending_approval(runtime, thread_id).await {
        if let Some(end) = resolve_approval(runtime, thread_id, request, io).await? {
            return Ok(end);
        }
    }

    loop {
        let Some(message) = io.read_message()? else {
            return Ok(ChatEnd::EndOfInput);
        };
        let message = message.trim();
        if message.is_empty() {
            continue;
        }
        if EXIT_WORDS.contains(&message.to_lowercase().as_str()) {
            return Ok(ChatEnd::UserExit);
        }

        match runtime.handle_thread_message(thread_id, message).await {
            Ok(reply) => {
                if !reply.reply.trim().is_empty() {
                    io.show_reply(&reply.reply);
                }
                if let Some(request) = reply.approval {
                    if let Some(end) = resolve_approval(runtime, thread_id, request, io).await? {
                        return Ok(end);
                    }
                    continue;
                }
                if let Some(end) = session_end(reply.closed, reply.owner) {
                    return Ok(end);
                }
            }
            Err(failure) => {
                if let Some(end) = report_failure(thread_id, &failure, io) {
                    return Ok(end);
                }
            }
        }
    }
}

async fn resolve_approval(
    runtime: &AgentRuntime,
    thread_id: &ThreadId,
    request: ApprovalRequest,
    io: &mut impl ChatIo,
) -> Result<Option<ChatEnd>> {
    let mut pending = Some(request);
    while let Some(request) = pending.take() {
        let answer = io.read_approval(&request)?;
        let decision = ApprovalDecision::from_operator_input(&answer);
        match runtime.handle_approval(thread_id, decision).await {
            Ok(reply) => {
                io.show_reply(&reply.reply);
                if let Some(end) = session_end(reply.closed, reply.owner) {
                    return Ok(Some(end));
                }
                pending = reply.approval;
            }
            Err(failure) => return Ok(report_failure(thread_id, &failure, io)),
        }
    }
    Ok(None)
}

async fn pending_approval(
    runtime: &AgentRuntime,
    thread_id: &ThreadId,
) -> Option<ApprovalRequest> {
    match runtime.pending_approval(thread_id).await {
        Ok(request) => request,
        Err(failure) => {
            error!(
                event_name = "chat.checkpoint_unavailable",
                thread_id = %thread_id,
                error = %failure,
                "could not read pending approval"
            );
            None
        }
    }
}

fn session_end(closed: bool, owner: Owner) -> Option<ChatEnd> {
    if closed {
        Some(ChatEnd::Closed)
    } else if owner == Owner::Human {
        Some(ChatEnd::Handoff)
    } else {
        None
    }
}

/// Logs the failure and shows the generic reply. A closed thread ends the session.
fn report_failure(
    thread_id: &ThreadId,
    failure: &ApplicationError,
    io: &mut impl ChatIo,
) -> Option<ChatEnd> {
    let interface = failure.clone().into_interface(thread_id.0.clone());
    error!(
        event_name = "chat.turn_failed",
        thread_id = %thread_id,
        correlation_id = interface.correlation_id(),
        error = %interface,
        "turn failed"
    );
    io.show_reply(GENERIC_FAILURE_REPLY);
    matches!(failure, ApplicationError::Domain(DomainError::Flow(FlowError::ThreadClosed { .. })))
        .then_some(ChatEnd::Closed)
}

fn banner(session: &Session, backend: &str) -> String {
    let verb = if session.resumed { "Retomando" } else { "Iniciando" };
    format!(
        "{verb} negociação {} com {} (agente {}, backend {backend}). Digite 'sair' para encerrar.",
        session.conversation.thread_id, session.conversation.influencer_phone, session.agent.name,
    )
}

fn farewell(end: ChatEnd) -> &'static str {
    match end {
        ChatEnd::UserExit | ChatEnd::EndOfInput => "Sessão encerrada.",
        ChatEnd::Handoff => "Conversa transferida para um atendente humano.",
        ChatEnd::Closed => "Negociação encerrada.",
    }
}

struct TerminalIo;

impl ChatIo for TerminalIo {
    fn read_message(&mut self) -> Result<Option<String>> {
        let line: String =
            Input::new().with_prompt("Influenciador").allow_empty(true).interact_text()?;
        Ok(Some(line))
    }

    fn read_approval(&mut self, request: &ApprovalRequest) -> Result<String> {
        println!("{}", style(&request.prompt).yellow().bold());
        let answer: String = Input::new().with_prompt("Operador").interact_text()?;
        Ok(answer)
    }

    fn show_reply(&mut self, text: &str) {
        println!("{} {}", style("Agente:").cyan().bold(), text);
    }

    fn show_notice(&mut self, text: &str) {
        println!("{}", style(text).dim());
    }
}
