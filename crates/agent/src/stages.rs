use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use negotiator_core::domain::agent::AgentProfile;
use negotiator_core::domain::conversation::{
    ConversationState, ExtractedFields, MessageRole, QualificationField,
};
use negotiator_core::errors::ApplicationError;
use negotiator_core::flows::ConversationalStages;

use crate::conversation::parse_extract_info;
use crate::guardrails::append_handoff_suffix;
use crate::llm::{Generation, LlmClient, LlmMessage, LlmRequest, RequestPurpose};
use crate::prompts::{
    clarification_prompt, extract_info_descriptor, extraction_instructions, extraction_prompt,
    negotiator_instructions, EXTRACT_INFO_TOOL,
};
use crate::tool_loop::run_tool_loop;
use crate::tools::ToolRegistry;

/// The conversational stages backed by a generation client.
pub struct LlmStages {
    client: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    profile: AgentProfile,
    history_limit: usize,
}

impl LlmStages {
    pub fn new(
        client: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
        profile: AgentProfile,
        history_limit: usize,
    ) -> Self {
        Self { client, tools, profile, history_limit: history_limit.max(1) }
    }

    fn integration_error(&self, error: anyhow::Error) -> ApplicationError {
        ApplicationError::Integration(format!("{} generation failed: {error:#}", self.client.name()))
    }
}

#[async_trait]
impl ConversationalStages for LlmStages {
    async fn extract_fields(
        &self,
        state: &ConversationState,
    ) -> Result<ExtractedFields, ApplicationError> {
        let message = state.last_user_message.clone();
        let request = LlmRequest::new(
            RequestPurpose::Extraction { message: message.clone() },
            extraction_instructions(),
        )
        .with_user_message(extraction_prompt(&message, &state.qualification))
        .with_tools(vec![extract_info_descriptor()]);

        let generation =
            self.client.generate(&request).await.map_err(|error| self.integration_error(error))?;
        let extracted = match generation {
            Generation::ToolCalls { calls, .. } => calls
                .iter()
                .find(|call| call.name == EXTRACT_INFO_TOOL)
                .map(|call| parse_extract_info(&call.arguments))
                .unwrap_or_default(),
            Generation::Text(_) => {
                debug!(
                    event_name = "agent.extraction_without_tool_call",
                    thread_id = %state.thread_id,
                    "model answered extraction without calling extract_info"
                );
                ExtractedFields::default()
            }
        };
        Ok(extracted)
    }

    async fn request_missing_fields(
        &self,
        state: &ConversationState,
        missing: &[QualificationField],
    ) -> Result<String, ApplicationError> {
        let request = LlmRequest::new(
            RequestPurpose::Clarification {
                missing: missing.iter().map(|field| field.label().to_owned()).collect(),
            },
            negotiator_instructions(&self.profile, state),
        )
        .with_user_message(clarification_prompt(state, missing));

        let text = run_tool_loop(self.client.as_ref(), request, &ToolRegistry::default())
            .await
            .map_err(|error| self.integration_error(error))?;
        Ok(with_suffix(text))
    }

    async fn negotiate(&self, state: &ConversationState) -> Result<String, ApplicationError> {
        let approved = state.reviewed_price.filter(|price| Some(*price) == state.proposed_price);
        let purpose = RequestPurpose::Negotiation {
            opening_offer: approved.or(state.price_range.as_ref().map(|range| range.floor)),
            counterpart_offer: if approved.is_some() { None } else { state.proposed_price },
        };

        let mut request = LlmRequest::new(purpose, negotiator_instructions(&self.profile, state))
            .with_tools(self.tools.descriptors());
        request.messages = state
            .recent_messages(self.history_limit)
            .iter()
            .map(|message| match message.role {
                MessageRole::User => LlmMessage::User(message.content.clone()),
                MessageRole::Assistant => LlmMessage::Assistant(message.content.clone()),
            })
            .collect();

        let text = run_tool_loop(self.client.as_ref(), request, &self.tools)
            .await
            .map_err(|error| self.integration_error(error))?;
        if text.trim().is_empty() {
            warn!(
                event_name = "agent.empty_negotiation_reply",
                thread_id = %state.thread_id,
                "negotiation produced no text"
            );
        }
        Ok(with_suffix(text))
    }
}

/// Blank replies stay blank so the caller can substitute its fallback.
fn with_suffix(text: String) -> String {
    if text.trim().is_empty() {
        text
    } else {
        append_handoff_suffix(text.trim_end())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal::Decimal;
    use serde_json::json;

    use negotiator_core::domain::agent::AgentProfile;
    use negotiator_core::domain::conversation::{
        ConversationState, MessageRole, Platform, QualificationField, ThreadId,
    };
    use negotiator_core::errors::ApplicationError;
    use negotiator_core::flows::ConversationalStages;
    use negotiator_core::pricing::{compute_range, InMemoryBenchmarkSource};

    use super::LlmStages;
    use crate::guardrails::HANDOFF_SUFFIX;
    use crate::llm::{Generation, LlmClient, LlmMessage, RequestPurpose, ScriptedClient, ToolCall};
    use crate::tools::ToolRegistry;

    fn stages(client: Arc<ScriptedClient>) -> LlmStages {
        let tools = ToolRegistry::negotiation(Arc::new(InMemoryBenchmarkSource::default()));
        let client: Arc<dyn LlmClient> = client;
        LlmStages::new(
            client,
            Arc::new(tools),
            AgentProfile::default_negotiator(Decimal::from(40)),
            20,
        )
    }

    fn state(message: &str) -> ConversationState {
        let mut state = ConversationState::new(
            ThreadId("t-stages".to_owned()),
            "+5511911112222",
            "negotiator",
            Decimal::from(40),
        );
        state.begin_turn(message);
        state
    }

    #[tokio::test]
    async fn extraction_reads_the_extract_info_call() {
        let client = Arc::new(ScriptedClient::new([Generation::ToolCalls {
            calls: vec![ToolCall {
                id: "c1".to_owned(),
                name: "extract_info".to_owned(),
                arguments: json!({"platform": "instagram", "avg_views": "100k"}),
            }],
            text: None,
        }]));

        let fields = stages(client.clone())
            .extract_fields(&state("sou do insta, 100k views"))
            .await
            .expect("extract");

        assert_eq!(fields.platform, Some(Platform::Instagram));
        assert_eq!(fields.avg_views, Some(100_000));
        let requests = client.requests();
        assert_eq!(
            requests[0].purpose,
            RequestPurpose::Extraction { message: "sou do insta, 100k views".to_owned() }
        );
        assert_eq!(requests[0].tools[0].name, "extract_info");
    }

    #[tokio::test]
    async fn extraction_without_tool_call_is_empty() {
        let client = Arc::new(ScriptedClient::new([Generation::Text("Olá!".to_owned())]));
        let fields = stages(client).extract_fields(&state("oi")).await.expect("extract");
        assert!(fields.is_empty());
    }

    #[tokio::test]
    async fn clarification_gets_the_handoff_suffix_once() {
        let client = Arc::new(ScriptedClient::new([Generation::Text(format!(
            "Qual o prazo?{HANDOFF_SUFFIX}"
        ))]));

        let prompt = stages(client.clone())
            .request_missing_fields(&state("faço reels"), &[QualificationField::Deadline])
            .await
            .expect("clarify");

        assert_eq!(prompt.matches(HANDOFF_SUFFIX).count(), 1);
        assert_eq!(
            client.requests()[0].purpose,
            RequestPurpose::Clarification { missing: vec!["prazo".to_owned()] }
        );
    }

    #[tokio::test]
    async fn negotiation_sends_history_tools_and_offers() {
        let client = Arc::new(ScriptedClient::new([Generation::Text("Podemos pagar R$2800.".to_owned())]));
        let mut state = state("cobro R$ 8.000");
        state.append_message(MessageRole::Assistant, "Que tal R$2800?");
        state.price_range = Some(compute_range(100_000, 1, Decimal::from(40), None));
        state.proposed_price = Some(Decimal::from(8000));

        let reply = stages(client.clone()).negotiate(&state).await.expect("negotiate");
        assert!(reply.starts_with("Podemos pagar R$2800."));
        assert!(reply.ends_with(HANDOFF_SUFFIX));

        let request = &client.requests()[0];
        assert_eq!(request.tools.len(), 3);
        assert_eq!(request.messages.len(), 2);
        assert!(matches!(&request.messages[0], LlmMessage::User(text) if text == "cobro R$ 8.000"));
        assert_eq!(
            request.purpose,
            RequestPurpose::Negotiation {
                opening_offer: Some(Decimal::from(2800)),
                counterpart_offer: Some(Decimal::from(8000)),
            }
        );
    }

    #[tokio::test]
    async fn approved_price_becomes_the_offer() {
        let client = Arc::new(ScriptedClient::default());
        let mut state = state("ok");
        state.price_range = Some(compute_range(100_000, 1, Decimal::from(40), None));
        state.proposed_price = Some(Decimal::from(5000));
        state.reviewed_price = Some(Decimal::from(5000));

        let reply = stages(client.clone()).negotiate(&state).await.expect("negotiate");
        assert!(reply.is_empty());
        assert_eq!(
            client.requests()[0].purpose,
            RequestPurpose::Negotiation {
                opening_offer: Some(Decimal::from(5000)),
                counterpart_offer: None,
            }
        );
    }

    #[tokio::test]
    async fn backend_failure_is_an_integration_error() {
        let client = Arc::new(ScriptedClient::default());
        client.push_failure("timeout");

        let error = stages(client).negotiate(&state("oi")).await.expect_err("failure");
        assert!(matches!(error, ApplicationError::Integration(message) if message.contains("timeout")));
    }
}
