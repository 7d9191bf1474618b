use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::approval::ApprovalRequest;
use crate::domain::conversation::{ConversationState, MessageRole, ThreadId};
use crate::flows::engine::FlowError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Qualify,
    RetrieveBenchmarks,
    Price,
    Negotiate,
    Approval,
    Close,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Qualify => "qualify",
            Self::RetrieveBenchmarks => "retrieve_benchmarks",
            Self::Price => "price",
            Self::Negotiate => "negotiate",
            Self::Approval => "approval",
            Self::Close => "close",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "qualify" => Some(Self::Qualify),
            "retrieve_benchmarks" => Some(Self::RetrieveBenchmarks),
            "price" => Some(Self::Price),
            "negotiate" => Some(Self::Negotiate),
            "approval" => Some(Self::Approval),
            "close" => Some(Self::Close),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendReason {
    AwaitingMessage,
    AwaitingApproval,
}

impl SuspendReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingMessage => "awaiting_message",
            Self::AwaitingApproval => "awaiting_approval",
        }
    }
}

/// Where execution goes once a stage's output has been merged into state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    Goto(Stage),
    Suspend(SuspendReason),
    Terminate,
}

impl Route {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Goto(stage) => stage.as_str(),
            Self::Suspend(reason) => reason.as_str(),
            Self::Terminate => "end",
        }
    }
}

/// How many turns a computed price range may be reused before qualify routes back through
/// benchmark retrieval. `None` reuses it for the life of the thread.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepricePolicy {
    pub after_turns: Option<u32>,
}

impl RepricePolicy {
    pub fn is_stale(&self, state: &ConversationState) -> bool {
        self.after_turns.is_some_and(|limit| state.turns_since_pricing >= limit)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    Suspended { stage: Stage, reason: SuspendReason },
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    AwaitingMessage,
    AwaitingApproval,
    Closed,
}

impl CheckpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingMessage => "awaiting_message",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "awaiting_message" => Some(Self::AwaitingMessage),
            "awaiting_approval" => Some(Self::AwaitingApproval),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// Durable record of where a thread paused: the stage tag plus a full state snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: ThreadId,
    pub stage: Stage,
    pub status: CheckpointStatus,
    pub state: ConversationState,
    pub pending_approval: Option<ApprovalRequest>,
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn is_awaiting_approval(&self) -> bool {
        self.status == CheckpointStatus::AwaitingApproval
    }

    /// State to continue from when a new counterpart message arrives.
    pub fn state_for_message(self) -> Result<ConversationState, FlowError> {
        match self.status {
            CheckpointStatus::AwaitingMessage => Ok(self.state),
            CheckpointStatus::AwaitingApproval => {
                Err(FlowError::AwaitingApproval { thread_id: self.thread_id.0 })
            }
            CheckpointStatus::Closed => Err(FlowError::ThreadClosed { thread_id: self.thread_id.0 }),
        }
    }
}

/// Result of one machine execution, from entry to a suspension or the end of the thread.
#[derive(Clone, Debug, PartialEq)]
pub struct TurnReport {
    pub state: ConversationState,
    pub outcome: TurnOutcome,
    pub visited: Vec<Stage>,
    pub replies: Vec<String>,
    pub approval_request: Option<ApprovalRequest>,
}

impl TurnReport {
    pub fn reply(&self) -> Option<&str> {
        self.replies.last().map(String::as_str)
    }

    pub fn is_closed(&self) -> bool {
        self.outcome == TurnOutcome::Closed
    }

    pub fn checkpoint(&self) -> Checkpoint {
        let (stage, status) = match &self.outcome {
            TurnOutcome::Suspended { stage, reason: SuspendReason::AwaitingMessage } => {
                (*stage, CheckpointStatus::AwaitingMessage)
            }
            TurnOutcome::Suspended { stage, reason: SuspendReason::AwaitingApproval } => {
                (*stage, CheckpointStatus::AwaitingApproval)
            }
            TurnOutcome::Closed => (Stage::Close, CheckpointStatus::Closed),
        };
        Checkpoint {
            thread_id: self.state.thread_id.clone(),
            stage,
            status,
            state: self.state.clone(),
            pending_approval: self.approval_request.clone(),
            saved_at: Utc::now(),
        }
    }

    pub(crate) fn collect_replies(state: &ConversationState, from: usize) -> Vec<String> {
        state
            .messages()
            .iter()
            .skip(from)
            .filter(|message| message.role == MessageRole::Assistant)
            .map(|message| message.content.clone())
            .collect()
    }
}
