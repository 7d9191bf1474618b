//! Agent runtime for influencer negotiations.
//!
//! The runtime screens each inbound message with [`guardrails`], then drives the
//! negotiation state machine from `negotiator-core` with a language model behind the
//! conversational stages ([`stages`]). Every turn is persisted through `negotiator-db` in
//! one transaction.
//!
//! # Safety Principle
//!
//! The model only phrases replies and extracts fields. Price ranges and the approval gate
//! are computed deterministically in core; the model sees the range as internal context and
//! is told never to reveal it.

pub mod conversation;
pub mod guardrails;
pub mod llm;
pub mod offline;
pub mod openai;
pub mod prompts;
pub mod runtime;
pub mod stages;
pub mod tool_loop;
pub mod tools;

pub use guardrails::{GuardrailDecision, Guardrails};
pub use llm::{build_client, Generation, LlmClient, LlmRequest, ScriptedClient};
pub use runtime::{AgentRuntime, Session, TurnReply};
pub use stages::LlmStages;
