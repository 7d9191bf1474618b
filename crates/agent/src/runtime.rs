use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use negotiator_core::audit::{
    AuditCategory, AuditContext, AuditOutcome, AuditSink, TracingAuditSink,
};
use negotiator_core::config::AppConfig;
use negotiator_core::domain::agent::{AgentProfile, AgentRegistry};
use negotiator_core::domain::approval::{ApprovalDecision, ApprovalOutcome, ApprovalRequest};
use negotiator_core::domain::conversation::{
    ChatMessage, ConversationState, ConversationStatus, MessageRole, Owner, ThreadId,
};
use negotiator_core::domain::offer::OfferRecord;
use negotiator_core::errors::{ApplicationError, DomainError, GENERIC_FAILURE_REPLY};
use negotiator_core::flows::{
    Checkpoint, CheckpointStatus, CheckpointStore, FlowEngine, FlowError, NegotiationFlow,
    RepricePolicy, Stage, StageServices, TurnOutcome, TurnReport,
};
use negotiator_core::pricing::{BenchmarkSource, PriceRange};
use negotiator_db::repositories::{
    ConversationRecord, ConversationSummary, InfluencerProfileUpdate, SqlAgentRepository,
    SqlBenchmarkSource, SqlCheckpointStore, SqlConversationRepository, SqlInfluencerRepository,
    SqlMessageRepository,
};
use negotiator_db::{commit_turn, DbPool, TurnCommit};

use crate::guardrails::{GuardrailDecision, Guardrails};
use crate::llm::LlmClient;
use crate::stages::LlmStages;
use crate::tools::ToolRegistry;

const APPROVAL_PROCESSED_REPLY: &str = "Aprovação processada.";

/// A conversation ready to receive messages.
#[derive(Clone, Debug)]
pub struct Session {
    pub conversation: ConversationRecord,
    pub agent: AgentProfile,
    /// True when an active conversation was picked up instead of created.
    pub resumed: bool,
}

/// What the caller shows after a turn.
#[derive(Clone, Debug, PartialEq)]
pub struct TurnReply {
    pub thread_id: ThreadId,
    pub reply: String,
    pub owner: Owner,
    pub closed: bool,
    pub approval: Option<ApprovalRequest>,
    pub stage: Option<Stage>,
}

/// Owns the collaborators of a negotiation and runs guarded, persisted turns.
///
/// Turns on the same thread are serialized; different threads run independently.
pub struct AgentRuntime {
    pool: DbPool,
    registry: Arc<AgentRegistry>,
    client: Arc<dyn LlmClient>,
    guardrails: Guardrails,
    benchmarks: Arc<dyn BenchmarkSource>,
    checkpoints: SqlCheckpointStore,
    tools: Arc<ToolRegistry>,
    audit_sink: Arc<dyn AuditSink>,
    engine: FlowEngine,
    history_limit: u32,
    locks: Mutex<HashMap<ThreadId, Arc<tokio::sync::Mutex<()>>>>,
}

impl AgentRuntime {
    pub fn from_config(
        config: &AppConfig,
        pool: DbPool,
        client: Arc<dyn LlmClient>,
    ) -> Result<Self, ApplicationError> {
        let guardrails = Guardrails::from_config(&config.guardrails).map_err(|error| {
            ApplicationError::Configuration(format!("invalid handoff keyword: {error}"))
        })?;
        let benchmarks: Arc<dyn BenchmarkSource> = Arc::new(SqlBenchmarkSource::new(pool.clone()));
        let engine = FlowEngine::new(NegotiationFlow::new(RepricePolicy {
            after_turns: config.negotiation.reprice_after_turns,
        }))
        .with_benchmark_samples(config.negotiation.benchmark_samples);

        Ok(Self {
            registry: Arc::new(AgentRegistry::from_config(config)),
            client,
            guardrails,
            tools: Arc::new(ToolRegistry::negotiation(benchmarks.clone())),
            benchmarks,
            checkpoints: SqlCheckpointStore::new(pool.clone()),
            audit_sink: Arc::new(TracingAuditSink),
            engine,
            history_limit: config.negotiation.history_limit.max(1),
            locks: Mutex::new(HashMap::new()),
            pool,
        })
    }

    pub fn with_audit_sink(mut self, audit_sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = audit_sink;
        self
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn client_name(&self) -> &'static str {
        self.client.name()
    }

    /// Picks up the active conversation between the agent and the phone, or opens one.
    pub async fn start_or_resume(
        &self,
        agent_id: &str,
        phone: &str,
        force_new: bool,
    ) -> Result<Session, ApplicationError> {
        let agent = self.registry.require(agent_id)?.clone();
        SqlAgentRepository::new(self.pool.clone()).get_or_create(&agent).await?;
        let influencer = SqlInfluencerRepository::new(self.pool.clone()).get_or_create(phone).await?;

        let conversations = SqlConversationRepository::new(self.pool.clone());
        let existing = if force_new {
            None
        } else {
            conversations.find_active(&agent.agent_id, influencer.id).await?
        };
        let resumed = existing.is_some();
        let conversation = match existing {
            Some(conversation) => conversation,
            None => conversations.create(&agent.agent_id, influencer.id).await?,
        };

        info!(
            event_name = "session.started",
            thread_id = %conversation.thread_id,
            agent_id = %agent.agent_id,
            resumed,
            "negotiation session ready"
        );
        Ok(Session { conversation, agent, resumed })
    }

    /// Screens, runs and persists one counterpart message. Nothing is written when the turn
    /// fails.
    pub async fn handle_thread_message(
        &self,
        thread_id: &ThreadId,
        text: &str,
    ) -> Result<TurnReply, ApplicationError> {
        let lock = self.thread_lock(thread_id);
        let _guard = lock.lock().await;

        let conversation = self.conversation(thread_id).await?;
        if conversation.status == ConversationStatus::Closed {
            return Err(FlowError::ThreadClosed { thread_id: thread_id.0.clone() }.into());
        }
        let audit = AuditContext::new(
            Some(thread_id.clone()),
            Uuid::new_v4().to_string(),
            "influencer",
        );
        let checkpoint = self.checkpoints.load(thread_id).await?;

        match self.guardrails.screen(text) {
            GuardrailDecision::Allow => {}
            GuardrailDecision::Refuse { reason_code, user_message } => {
                self.audit_sink.emit(
                    audit
                        .event("guardrail.refused", AuditCategory::Guardrail, AuditOutcome::Rejected)
                        .with_metadata("reason_code", reason_code),
                );
                let mut commit = TurnCommit::new(conversation.id, conversation.influencer_id);
                commit.messages = vec![
                    ChatMessage::new(MessageRole::User, self.guardrails.redact(text)),
                    ChatMessage::new(MessageRole::Assistant, user_message.clone()),
                ];
                commit_turn(&self.pool, &commit).await?;
                return Ok(self.guardrail_reply(&conversation, user_message, conversation.owner));
            }
            GuardrailDecision::Handoff { reason_code, user_message } => {
                self.audit_sink.emit(
                    audit
                        .event("guardrail.handoff", AuditCategory::Guardrail, AuditOutcome::Success)
                        .with_metadata("reason_code", reason_code),
                );
                let mut commit = TurnCommit::new(conversation.id, conversation.influencer_id);
                commit.messages = vec![
                    ChatMessage::new(MessageRole::User, text),
                    ChatMessage::new(MessageRole::Assistant, user_message.clone()),
                ];
                commit.owner = Some(Owner::Human);
                commit.checkpoint = self
                    .handoff_checkpoint(&conversation, checkpoint, text, &user_message)
                    .await?;
                commit_turn(&self.pool, &commit).await?;
                return Ok(self.guardrail_reply(&conversation, user_message, Owner::Human));
            }
        }

        let agent = self.registry.require(&conversation.agent_id)?.clone();
        let mut state = match checkpoint {
            Some(checkpoint) => checkpoint.state_for_message()?,
            None => self.fresh_state(&conversation, &agent).await?,
        };
        state.observe_owner(conversation.owner);

        let before_len = state.messages().len();
        let previous = (state.price_range.clone(), state.proposed_price);
        let stages = LlmStages::new(
            self.client.clone(),
            self.tools.clone(),
            agent,
            self.history_limit as usize,
        );
        let services = StageServices {
            conversation: &stages,
            benchmarks: self.benchmarks.as_ref(),
            audit_sink: self.audit_sink.as_ref(),
            audit: &audit,
        };
        let report = self.engine.handle_message(state, text, &services).await?;

        let offer = offer_changed(&report, &previous)
            .then(|| report.state.price_range.as_ref())
            .flatten()
            .map(|range| OfferRecord::from_range(range, report.state.proposed_price));
        self.finish_turn(&conversation, before_len, report, offer).await
    }

    /// Resumes a thread held at the approval gate with the operator's decision.
    pub async fn handle_approval(
        &self,
        thread_id: &ThreadId,
        decision: ApprovalDecision,
    ) -> Result<TurnReply, ApplicationError> {
        let lock = self.thread_lock(thread_id);
        let _guard = lock.lock().await;

        let conversation = self.conversation(thread_id).await?;
        let Some(mut checkpoint) = self.checkpoints.load(thread_id).await? else {
            return Err(FlowError::NoPendingApproval { thread_id: thread_id.0.clone() }.into());
        };
        checkpoint.state.observe_owner(conversation.owner);
        let before_len = checkpoint.state.messages().len();
        let held_price = checkpoint.state.proposed_price;

        let agent = self.registry.require(&conversation.agent_id)?.clone();
        let audit = AuditContext::new(
            Some(thread_id.clone()),
            Uuid::new_v4().to_string(),
            "operator",
        );
        let stages = LlmStages::new(
            self.client.clone(),
            self.tools.clone(),
            agent,
            self.history_limit as usize,
        );
        let services = StageServices {
            conversation: &stages,
            benchmarks: self.benchmarks.as_ref(),
            audit_sink: self.audit_sink.as_ref(),
            audit: &audit,
        };
        let report = self.engine.resume_with_decision(checkpoint, decision, &services).await?;

        let accepted = decision.outcome() != ApprovalOutcome::Rejected;
        let offered = if accepted { report.state.proposed_price } else { held_price };
        let offer = report
            .state
            .price_range
            .as_ref()
            .map(|range| OfferRecord::from_range(range, offered).with_acceptance(accepted));
        let mut reply = self.finish_turn(&conversation, before_len, report, offer).await?;
        if reply.reply.trim().is_empty() {
            reply.reply = APPROVAL_PROCESSED_REPLY.to_owned();
        }
        Ok(reply)
    }

    pub async fn pending_approval(
        &self,
        thread_id: &ThreadId,
    ) -> Result<Option<ApprovalRequest>, ApplicationError> {
        let checkpoint = self.checkpoints.load(thread_id).await?;
        Ok(checkpoint
            .filter(Checkpoint::is_awaiting_approval)
            .and_then(|checkpoint| checkpoint.pending_approval))
    }

    pub async fn list_conversations(
        &self,
        limit: u32,
    ) -> Result<Vec<ConversationSummary>, ApplicationError> {
        Ok(SqlConversationRepository::new(self.pool.clone()).list(limit).await?)
    }

    async fn conversation(&self, thread_id: &ThreadId) -> Result<ConversationRecord, ApplicationError> {
        SqlConversationRepository::new(self.pool.clone())
            .find_by_thread(thread_id)
            .await?
            .ok_or_else(|| {
                DomainError::InvariantViolation(format!("unknown thread {thread_id}")).into()
            })
    }

    async fn fresh_state(
        &self,
        conversation: &ConversationRecord,
        agent: &AgentProfile,
    ) -> Result<ConversationState, ApplicationError> {
        let history = SqlMessageRepository::new(self.pool.clone())
            .recent(conversation.id, self.history_limit)
            .await?;
        Ok(ConversationState::new(
            conversation.thread_id.clone(),
            conversation.influencer_phone.clone(),
            agent.agent_id.clone(),
            agent.target_rate,
        )
        .with_history(history))
    }

    /// Snapshot saved alongside a handoff so the next message reaches the close stage.
    /// A thread held for approval keeps its checkpoint until the operator decides.
    async fn handoff_checkpoint(
        &self,
        conversation: &ConversationRecord,
        checkpoint: Option<Checkpoint>,
        text: &str,
        reply: &str,
    ) -> Result<Option<Checkpoint>, ApplicationError> {
        let (stage, mut state) = match checkpoint {
            Some(checkpoint) if checkpoint.status == CheckpointStatus::AwaitingMessage => {
                (checkpoint.stage, checkpoint.state)
            }
            Some(_) => return Ok(None),
            None => {
                let agent = self.registry.require(&conversation.agent_id)?.clone();
                (Stage::Qualify, self.fresh_state(conversation, &agent).await?)
            }
        };
        state.append_message(MessageRole::User, text);
        state.append_message(MessageRole::Assistant, reply);
        state.hand_off_to_human();

        Ok(Some(Checkpoint {
            thread_id: conversation.thread_id.clone(),
            stage,
            status: CheckpointStatus::AwaitingMessage,
            state,
            pending_approval: None,
            saved_at: chrono::Utc::now(),
        }))
    }

    async fn finish_turn(
        &self,
        conversation: &ConversationRecord,
        before_len: usize,
        mut report: TurnReport,
        offer: Option<OfferRecord>,
    ) -> Result<TurnReply, ApplicationError> {
        if report.replies.is_empty() && !report.is_closed() && report.approval_request.is_none() {
            warn!(
                event_name = "agent.empty_turn",
                thread_id = %conversation.thread_id,
                "turn produced no reply; sending fallback"
            );
            report.state.append_message(MessageRole::Assistant, GENERIC_FAILURE_REPLY);
            report.replies.push(GENERIC_FAILURE_REPLY.to_owned());
        }

        let owner = report.state.owner();
        let closed = report.is_closed();
        let mut commit = TurnCommit::new(conversation.id, conversation.influencer_id);
        commit.messages = report.state.messages().get(before_len..).unwrap_or_default().to_vec();
        commit.owner = (owner != conversation.owner).then_some(owner);
        commit.status = closed.then_some(ConversationStatus::Closed);
        commit.offer = offer;
        commit.profile =
            Some(InfluencerProfileUpdate::from_state(&report.state)).filter(|p| !p.is_empty());
        commit.checkpoint = Some(report.checkpoint());
        commit_turn(&self.pool, &commit).await?;

        let stage = match &report.outcome {
            TurnOutcome::Suspended { stage, .. } => Some(*stage),
            TurnOutcome::Closed => Some(Stage::Close),
        };
        Ok(TurnReply {
            thread_id: conversation.thread_id.clone(),
            reply: report.replies.join("\n\n"),
            owner,
            closed,
            approval: report.approval_request,
            stage,
        })
    }

    fn guardrail_reply(
        &self,
        conversation: &ConversationRecord,
        reply: String,
        owner: Owner,
    ) -> TurnReply {
        TurnReply {
            thread_id: conversation.thread_id.clone(),
            reply,
            owner,
            closed: false,
            approval: None,
            stage: None,
        }
    }

    /// Entries only the map still references belong to threads with no turn in flight.
    fn thread_lock(&self, thread_id: &ThreadId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.retain(|id, lock| id == thread_id || Arc::strong_count(lock) > 1);
        locks.entry(thread_id.clone()).or_default().clone()
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or_default()
    }
}

fn offer_changed(report: &TurnReport, previous: &(Option<PriceRange>, Option<Decimal>)) -> bool {
    let (range, price) = previous;
    report.state.price_range.is_some()
        && (report.state.price_range != *range || report.state.proposed_price != *price)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use negotiator_core::config::AppConfig;
    use negotiator_core::domain::conversation::ThreadId;
    use negotiator_db::connect_with_settings;

    use super::AgentRuntime;
    use crate::offline::OfflineClient;

    #[tokio::test]
    async fn idle_thread_locks_are_pruned() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        let runtime =
            AgentRuntime::from_config(&AppConfig::default(), pool, Arc::new(OfflineClient::new()))
                .expect("runtime");
        let busy = ThreadId("t-1".to_owned());

        let held = runtime.thread_lock(&busy);
        let _idle = runtime.thread_lock(&ThreadId("t-2".to_owned()));
        assert!(Arc::ptr_eq(&held, &runtime.thread_lock(&busy)));
        drop(_idle);

        runtime.thread_lock(&ThreadId("t-3".to_owned()));
        assert_eq!(runtime.tracked_locks(), 2);

        drop(held);
        runtime.thread_lock(&ThreadId("t-4".to_owned()));
        assert_eq!(runtime.tracked_locks(), 1);
    }
}
