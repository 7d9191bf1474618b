use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;

use negotiator_core::config::{LlmConfig, LlmProvider};

use crate::offline::OfflineClient;
use crate::openai::OpenAiClient;

/// A function the model may call, described with a JSON schema.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LlmMessage {
    User(String),
    Assistant(String),
    ToolCalls(Vec<ToolCall>),
    ToolResult { call_id: String, content: String },
}

/// Why a request is made. Backends that do not generate free text use it to pick a reply.
#[derive(Clone, Debug, PartialEq)]
pub enum RequestPurpose {
    Extraction { message: String },
    Clarification { missing: Vec<String> },
    Negotiation { opening_offer: Option<Decimal>, counterpart_offer: Option<Decimal> },
}

impl RequestPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extraction { .. } => "extraction",
            Self::Clarification { .. } => "clarification",
            Self::Negotiation { .. } => "negotiation",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LlmRequest {
    pub purpose: RequestPurpose,
    pub instructions: String,
    pub messages: Vec<LlmMessage>,
    pub tools: Vec<ToolDescriptor>,
}

impl LlmRequest {
    pub fn new(purpose: RequestPurpose, instructions: impl Into<String>) -> Self {
        Self { purpose, instructions: instructions.into(), messages: Vec::new(), tools: Vec::new() }
    }

    pub fn with_user_message(mut self, content: impl Into<String>) -> Self {
        self.messages.push(LlmMessage::User(content.into()));
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDescriptor>) -> Self {
        self.tools = tools;
        self
    }

    pub fn last_user_message(&self) -> Option<&str> {
        self.messages.iter().rev().find_map(|message| match message {
            LlmMessage::User(content) => Some(content.as_str()),
            _ => None,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Generation {
    Text(String),
    ToolCalls { calls: Vec<ToolCall>, text: Option<String> },
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    fn name(&self) -> &'static str;
    async fn generate(&self, request: &LlmRequest) -> Result<Generation>;
}

pub fn build_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    let client: Arc<dyn LlmClient> = match config.provider {
        LlmProvider::OpenAi | LlmProvider::Ollama => Arc::new(OpenAiClient::from_config(config)?),
        LlmProvider::Offline => Arc::new(OfflineClient::new()),
    };
    Ok(client)
}

/// Replays canned generations in order and records every request it receives. Once the
/// script runs out it answers with empty text.
#[derive(Default)]
pub struct ScriptedClient {
    script: Mutex<VecDeque<Result<Generation, String>>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedClient {
    pub fn new(generations: impl IntoIterator<Item = Generation>) -> Self {
        Self {
            script: Mutex::new(generations.into_iter().map(Ok).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, generation: Generation) {
        lock(&self.script).push_back(Ok(generation));
    }

    /// Queues a backend failure.
    pub fn push_failure(&self, message: impl Into<String>) {
        lock(&self.script).push_back(Err(message.into()));
    }

    pub fn requests(&self) -> Vec<LlmRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn generate(&self, request: &LlmRequest) -> Result<Generation> {
        lock(&self.requests).push(request.clone());
        match lock(&self.script).pop_front() {
            Some(Ok(generation)) => Ok(generation),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(Generation::Text(String::new())),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use negotiator_core::config::{AppConfig, LlmProvider};

    use super::{build_client, Generation, LlmClient, LlmRequest, RequestPurpose, ScriptedClient};

    #[test]
    fn provider_selects_client() {
        let mut config = AppConfig::default().llm;
        config.provider = LlmProvider::Offline;
        assert_eq!(build_client(&config).expect("offline").name(), "offline");

        config.provider = LlmProvider::Ollama;
        assert_eq!(build_client(&config).expect("ollama").name(), "ollama");
    }

    #[test]
    fn last_user_message_skips_other_roles() {
        let request = LlmRequest::new(RequestPurpose::Extraction { message: "segunda".to_owned() }, "extrair")
            .with_user_message("primeira")
            .with_user_message("segunda");
        assert_eq!(request.last_user_message(), Some("segunda"));
    }

    #[tokio::test]
    async fn scripted_client_replays_then_falls_back_to_empty_text() {
        let client = ScriptedClient::new([Generation::Text("primeira".to_owned())]);
        client.push_failure("backend down");
        let request = LlmRequest::new(RequestPurpose::Extraction { message: "oi".to_owned() }, "");

        assert_eq!(
            client.generate(&request).await.expect("scripted"),
            Generation::Text("primeira".to_owned())
        );
        assert!(client.generate(&request).await.is_err());
        assert_eq!(
            client.generate(&request).await.expect("exhausted"),
            Generation::Text(String::new())
        );
        assert_eq!(client.requests().len(), 3);
    }
}
