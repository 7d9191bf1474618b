//! Chat-completions client for OpenAI and for servers exposing the same API under `/v1`
//! (Ollama, vLLM, LM Studio).

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use negotiator_core::config::{LlmConfig, LlmProvider};

use crate::llm::{Generation, LlmClient, LlmMessage, LlmRequest, ToolCall, ToolDescriptor};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";
const RETRY_BASE_DELAY_MS: u64 = 250;
const ERROR_BODY_LIMIT: usize = 200;

pub struct OpenAiClient {
    name: &'static str,
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<SecretString>,
    model: String,
    max_retries: u32,
}

impl OpenAiClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let (name, default_base) = match config.provider {
            LlmProvider::OpenAi => ("openai", OPENAI_BASE_URL),
            LlmProvider::Ollama | LlmProvider::Offline => ("ollama", OLLAMA_BASE_URL),
        };
        let base_url = config.base_url.as_deref().unwrap_or(default_base);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .context("failed to build http client")?;

        Ok(Self {
            name,
            http,
            endpoint: chat_completions_url(base_url),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_retries: config.max_retries,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send(&self, body: &ChatRequest<'_>) -> Result<ChatResponse> {
        let mut attempt = 0;
        loop {
            let mut request = self.http.post(&self.endpoint).json(body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key.expose_secret());
            }

            let retryable = match request.send().await {
                Ok(response) if response.status().is_success() => {
                    return response
                        .json::<ChatResponse>()
                        .await
                        .with_context(|| format!("{} returned an unreadable response", self.name));
                }
                Ok(response) => {
                    let status = response.status();
                    let detail = truncate(&response.text().await.unwrap_or_default());
                    if !is_retryable(status) {
                        bail!("{} request failed with {status}: {detail}", self.name);
                    }
                    anyhow!("{} request failed with {status}: {detail}", self.name)
                }
                Err(error) => anyhow!(error).context(format!("{} request failed", self.name)),
            };

            if attempt >= self.max_retries {
                return Err(retryable);
            }
            attempt += 1;
            warn!(
                event_name = "llm.retry",
                provider = self.name,
                attempt,
                error = %retryable,
                "retrying generation request"
            );
            tokio::time::sleep(Duration::from_millis(RETRY_BASE_DELAY_MS * u64::from(attempt)))
                .await;
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn generate(&self, request: &LlmRequest) -> Result<Generation> {
        let body = ChatRequest::build(&self.model, request);
        debug!(
            event_name = "llm.request",
            provider = self.name,
            purpose = request.purpose.as_str(),
            messages = body.messages.len(),
            tools = request.tools.len(),
            "sending generation request"
        );

        let response = self.send(&body).await?;
        let message = response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| anyhow!("{} returned no choices", self.name))?;

        Ok(into_generation(message))
    }
}

/// Appends the chat-completions path unless the base already names it.
pub fn chat_completions_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_owned()
    } else if base.ends_with("/v1") {
        format!("{base}/chat/completions")
    } else {
        format!("{base}/v1/chat/completions")
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn truncate(body: &str) -> String {
    body.chars().take(ERROR_BODY_LIMIT).collect()
}

fn into_generation(message: ResponseMessage) -> Generation {
    let text = message.content.filter(|content| !content.trim().is_empty());
    let calls: Vec<ToolCall> = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| ToolCall {
            arguments: parse_arguments(&call.function.name, &call.function.arguments),
            id: call.id,
            name: call.function.name,
        })
        .collect();

    if calls.is_empty() {
        Generation::Text(text.unwrap_or_default())
    } else {
        Generation::ToolCalls { calls, text }
    }
}

fn parse_arguments(tool: &str, raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Map::new());
    }
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(error) => {
            warn!(event_name = "llm.malformed_arguments", tool, error = %error, "tool arguments are not JSON");
            Value::Object(Map::new())
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
}

impl<'a> ChatRequest<'a> {
    fn build(model: &'a str, request: &'a LlmRequest) -> Self {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if !request.instructions.is_empty() {
            messages.push(WireMessage::text("system", &request.instructions));
        }
        for message in &request.messages {
            messages.push(match message {
                LlmMessage::User(content) => WireMessage::text("user", content),
                LlmMessage::Assistant(content) => WireMessage::text("assistant", content),
                LlmMessage::ToolCalls(calls) => WireMessage {
                    role: "assistant",
                    content: None,
                    tool_call_id: None,
                    tool_calls: Some(calls.iter().map(WireToolCall::from_call).collect()),
                },
                LlmMessage::ToolResult { call_id, content } => WireMessage {
                    role: "tool",
                    content: Some(content.clone()),
                    tool_call_id: Some(call_id.clone()),
                    tool_calls: None,
                },
            });
        }

        Self { model, messages, tools: request.tools.iter().map(WireTool::from_descriptor).collect() }
    }
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
}

impl WireMessage {
    fn text(role: &'static str, content: &str) -> Self {
        Self { role, content: Some(content.to_owned()), tool_call_id: None, tool_calls: None }
    }
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    r#type: &'static str,
    function: WireFunction<'a>,
}

#[derive(Debug, Serialize)]
struct WireFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

impl<'a> WireTool<'a> {
    fn from_descriptor(descriptor: &'a ToolDescriptor) -> Self {
        Self {
            r#type: "function",
            function: WireFunction {
                name: &descriptor.name,
                description: &descriptor.description,
                parameters: &descriptor.parameters,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(default = "function_type")]
    r#type: String,
    function: WireToolCallFunction,
}

impl WireToolCall {
    fn from_call(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            r#type: function_type(),
            function: WireToolCallFunction {
                name: call.name.clone(),
                arguments: call.arguments.to_string(),
            },
        }
    }
}

fn function_type() -> String {
    "function".to_owned()
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCallFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}
