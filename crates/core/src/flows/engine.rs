use async_trait::async_trait;
use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::domain::approval::{ApprovalDecision, ApprovalOutcome, ApprovalRequest};
use crate::domain::conversation::{
    ConversationState, ExtractedFields, MessageRole, Owner, QualificationField,
};
use crate::domain::offer::DealSummary;
use crate::errors::ApplicationError;
use crate::flows::states::{
    Checkpoint, CheckpointStatus, RepricePolicy, Route, Stage, SuspendReason, TurnOutcome,
    TurnReport,
};
use crate::pricing::{BenchmarkQuery, BenchmarkSource, PricingRuntime, DEFAULT_SAMPLE_SIZE};

/// Upper bound on stage executions within one turn.
pub const MAX_STAGE_STEPS: usize = 12;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowError {
    #[error("stage `{stage}` requires missing fields: {}", .missing_fields.join(", "))]
    MissingRequiredFields { stage: Stage, missing_fields: Vec<String> },
    #[error("thread `{thread_id}` has no pending approval")]
    NoPendingApproval { thread_id: String },
    #[error("thread `{thread_id}` is awaiting an operator decision")]
    AwaitingApproval { thread_id: String },
    #[error("thread `{thread_id}` is closed")]
    ThreadClosed { thread_id: String },
    #[error("thread `{thread_id}` exceeded {steps} stage executions in one turn")]
    StepLimitExceeded { thread_id: String, steps: usize },
}

pub trait FlowDefinition: Send + Sync {
    fn entry_stage(&self) -> Stage;
    fn route(&self, completed: Stage, state: &ConversationState) -> Route;
}

#[derive(Clone, Debug, Default)]
pub struct NegotiationFlow {
    reprice: RepricePolicy,
}

impl NegotiationFlow {
    pub fn new(reprice: RepricePolicy) -> Self {
        Self { reprice }
    }
}

impl FlowDefinition for NegotiationFlow {
    fn entry_stage(&self) -> Stage {
        Stage::Qualify
    }

    fn route(&self, completed: Stage, state: &ConversationState) -> Route {
        route_negotiation(completed, state, &self.reprice)
    }
}

fn route_negotiation(completed: Stage, state: &ConversationState, reprice: &RepricePolicy) -> Route {
    use Stage::{Approval, Close, Negotiate, Price, Qualify, RetrieveBenchmarks};

    let human_owned = state.owner() == Owner::Human;
    match completed {
        Qualify if human_owned => Route::Goto(Close),
        Qualify if !state.qualification_complete => Route::Suspend(SuspendReason::AwaitingMessage),
        Qualify if state.price_range.is_some() && !reprice.is_stale(state) => Route::Goto(Negotiate),
        Qualify => Route::Goto(RetrieveBenchmarks),
        RetrieveBenchmarks => Route::Goto(Price),
        Price => Route::Goto(Negotiate),
        Negotiate if human_owned => Route::Goto(Close),
        Negotiate if state.approval_required => Route::Goto(Approval),
        Negotiate => Route::Suspend(SuspendReason::AwaitingMessage),
        Approval => Route::Goto(Negotiate),
        Close => Route::Terminate,
    }
}

/// The language-model backed parts of the machine.
///
/// Implementations degrade malformed model output to empty results; an `Err` means the
/// backend itself could not be reached and fails the turn.
#[async_trait]
pub trait ConversationalStages: Send + Sync {
    async fn extract_fields(
        &self,
        state: &ConversationState,
    ) -> Result<ExtractedFields, ApplicationError>;

    async fn request_missing_fields(
        &self,
        state: &ConversationState,
        missing: &[QualificationField],
    ) -> Result<String, ApplicationError>;

    async fn negotiate(&self, state: &ConversationState) -> Result<String, ApplicationError>;
}

/// Collaborators a turn needs, borrowed for its duration.
pub struct StageServices<'a> {
    pub conversation: &'a dyn ConversationalStages,
    pub benchmarks: &'a dyn BenchmarkSource,
    pub audit_sink: &'a dyn AuditSink,
    pub audit: &'a AuditContext,
}

enum StageOutcome {
    Continue,
    Interrupt(ApprovalRequest),
}

pub struct FlowEngine<F = NegotiationFlow> {
    flow: F,
    pricing: PricingRuntime,
    benchmark_samples: usize,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow, pricing: PricingRuntime::default(), benchmark_samples: DEFAULT_SAMPLE_SIZE }
    }

    pub fn with_pricing(mut self, pricing: PricingRuntime) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_benchmark_samples(mut self, samples: usize) -> Self {
        self.benchmark_samples = samples;
        self
    }

    pub fn route(&self, completed: Stage, state: &ConversationState) -> Route {
        self.flow.route(completed, state)
    }

    /// Runs one counterpart turn from the entry stage.
    pub async fn handle_message(
        &self,
        mut state: ConversationState,
        text: &str,
        services: &StageServices<'_>,
    ) -> Result<TurnReport, ApplicationError> {
        state.begin_turn(text);
        let entry = self.flow.entry_stage();
        self.drive(state, entry, None, services).await
    }

    /// Resumes a thread suspended at the approval gate with the operator's decision.
    pub async fn resume_with_decision(
        &self,
        checkpoint: Checkpoint,
        decision: ApprovalDecision,
        services: &StageServices<'_>,
    ) -> Result<TurnReport, ApplicationError> {
        match checkpoint.status {
            CheckpointStatus::AwaitingApproval => {}
            CheckpointStatus::Closed => {
                return Err(FlowError::ThreadClosed { thread_id: checkpoint.thread_id.0 }.into())
            }
            CheckpointStatus::AwaitingMessage => {
                return Err(FlowError::NoPendingApproval { thread_id: checkpoint.thread_id.0 }.into())
            }
        }

        self.drive(checkpoint.state, Stage::Approval, Some(decision), services).await
    }

    async fn drive(
        &self,
        mut state: ConversationState,
        entry: Stage,
        mut decision: Option<ApprovalDecision>,
        services: &StageServices<'_>,
    ) -> Result<TurnReport, ApplicationError> {
        let first_new_message = state.messages().len();
        let mut visited = Vec::new();
        let mut approval_request = None;
        let mut stage = entry;

        for _ in 0..MAX_STAGE_STEPS {
            visited.push(stage);
            let outcome = match self.run_stage(stage, &mut state, &mut decision, services).await {
                Ok(outcome) => outcome,
                Err(error) => {
                    services.audit_sink.emit(
                        services
                            .audit
                            .event("flow.stage_failed", AuditCategory::Flow, AuditOutcome::Failed)
                            .with_metadata("stage", stage.as_str())
                            .with_metadata("error", error.to_string()),
                    );
                    return Err(error);
                }
            };
            state.current_stage = Some(stage);

            let route = match outcome {
                StageOutcome::Continue => self.flow.route(stage, &state),
                StageOutcome::Interrupt(request) => {
                    approval_request = Some(request);
                    Route::Suspend(SuspendReason::AwaitingApproval)
                }
            };
            services.audit_sink.emit(
                services
                    .audit
                    .event("flow.stage_completed", AuditCategory::Flow, AuditOutcome::Success)
                    .with_metadata("from", stage.as_str())
                    .with_metadata("to", route.label()),
            );

            let outcome = match route {
                Route::Goto(next) => {
                    stage = next;
                    continue;
                }
                Route::Suspend(reason) => {
                    services.audit_sink.emit(
                        services
                            .audit
                            .event("flow.suspended", AuditCategory::Flow, AuditOutcome::Success)
                            .with_metadata("stage", stage.as_str())
                            .with_metadata("reason", reason.as_str()),
                    );
                    TurnOutcome::Suspended { stage, reason }
                }
                Route::Terminate => TurnOutcome::Closed,
            };

            tracing::debug!(
                event_name = "flow.turn_finished",
                thread_id = %state.thread_id,
                correlation_id = %services.audit.correlation_id,
                stage = stage.as_str(),
                outcome = ?outcome,
                "negotiation turn finished"
            );
            let replies = TurnReport::collect_replies(&state, first_new_message);
            return Ok(TurnReport { state, outcome, visited, replies, approval_request });
        }

        Err(FlowError::StepLimitExceeded { thread_id: state.thread_id.0, steps: MAX_STAGE_STEPS }
            .into())
    }

    async fn run_stage(
        &self,
        stage: Stage,
        state: &mut ConversationState,
        decision: &mut Option<ApprovalDecision>,
        services: &StageServices<'_>,
    ) -> Result<StageOutcome, ApplicationError> {
        match stage {
            Stage::Qualify => self.qualify(state, services).await,
            Stage::RetrieveBenchmarks => self.retrieve_benchmarks(state, services).await,
            Stage::Price => self.price(state, services),
            Stage::Negotiate => self.negotiate(state, services).await,
            Stage::Approval => Ok(self.approval(state, decision.take(), services)),
            Stage::Close => Ok(self.close(state, services)),
        }
    }

    async fn qualify(
        &self,
        state: &mut ConversationState,
        services: &StageServices<'_>,
    ) -> Result<StageOutcome, ApplicationError> {
        if state.owner() == Owner::Human {
            return Ok(StageOutcome::Continue);
        }

        let extracted = services.conversation.extract_fields(state).await?;
        let filled = state.merge_extracted(extracted);
        if !filled.is_empty() {
            tracing::debug!(
                event_name = "flow.qualify.fields_filled",
                thread_id = %state.thread_id,
                fields = ?filled.iter().map(QualificationField::as_str).collect::<Vec<_>>(),
                "qualification fields filled"
            );
        }

        let missing = state.missing_fields();
        if !missing.is_empty() {
            let prompt = services.conversation.request_missing_fields(state, &missing).await?;
            push_reply(state, prompt);
        }
        Ok(StageOutcome::Continue)
    }

    async fn retrieve_benchmarks(
        &self,
        state: &mut ConversationState,
        services: &StageServices<'_>,
    ) -> Result<StageOutcome, ApplicationError> {
        let fields = &state.qualification;
        let (Some(platform), Some(deliverable), Some(views)) =
            (fields.platform, fields.deliverable_type, fields.avg_views)
        else {
            return Err(missing_fields(Stage::RetrieveBenchmarks, state, &[
                QualificationField::Platform,
                QualificationField::DeliverableType,
                QualificationField::AvgViews,
            ]));
        };

        let query = BenchmarkQuery::new(platform, deliverable, views)
            .with_niche(fields.niche.clone())
            .with_sample_size(self.benchmark_samples);
        let snapshot = services.benchmarks.lookup(&query).await?;

        services.audit_sink.emit(
            services
                .audit
                .event("benchmark.retrieved", AuditCategory::Pricing, AuditOutcome::Success)
                .with_metadata("platform", platform.as_str())
                .with_metadata("deliverable_type", deliverable.as_str())
                .with_metadata("count", snapshot.count.to_string()),
        );
        state.benchmark = Some(snapshot);
        Ok(StageOutcome::Continue)
    }

    fn price(
        &self,
        state: &mut ConversationState,
        services: &StageServices<'_>,
    ) -> Result<StageOutcome, ApplicationError> {
        let (Some(views), Some(quantity)) =
            (state.qualification.avg_views, state.qualification.quantity)
        else {
            return Err(missing_fields(Stage::Price, state, &[
                QualificationField::AvgViews,
                QualificationField::Quantity,
            ]));
        };

        let computation =
            self.pricing.price(views, quantity, state.target_rate, state.benchmark.as_ref());
        services.audit_sink.emit(
            services
                .audit
                .event("pricing.range_computed", AuditCategory::Pricing, AuditOutcome::Success)
                .with_metadata("effective_rate", computation.effective_rate.to_string())
                .with_metadata("rate_source", computation.rate_source.as_str())
                .with_metadata("target", computation.range.target.to_string()),
        );
        state.price_range = Some(computation.range);
        state.turns_since_pricing = 0;
        Ok(StageOutcome::Continue)
    }

    async fn negotiate(
        &self,
        state: &mut ConversationState,
        services: &StageServices<'_>,
    ) -> Result<StageOutcome, ApplicationError> {
        let reply = services.conversation.negotiate(state).await?;
        push_reply(state, reply);

        let reason = match (state.proposed_price, state.price_range.as_ref()) {
            (Some(proposed), Some(range)) if state.reviewed_price != Some(proposed) => {
                self.pricing.approval_reason(proposed, range, state.benchmark.as_ref())
            }
            _ => None,
        };
        state.approval_required = reason.is_some();

        if let Some(reason) = reason {
            services.audit_sink.emit(
                services
                    .audit
                    .event("approval.required", AuditCategory::Approval, AuditOutcome::Success)
                    .with_metadata("reason", reason.as_str())
                    .with_metadata(
                        "proposed_price",
                        state.proposed_price.map(|price| price.to_string()).unwrap_or_default(),
                    ),
            );
        }
        Ok(StageOutcome::Continue)
    }

    fn approval(
        &self,
        state: &mut ConversationState,
        decision: Option<ApprovalDecision>,
        services: &StageServices<'_>,
    ) -> StageOutcome {
        let Some(decision) = decision else {
            let request = ApprovalRequest::new(
                state.thread_id.clone(),
                state.proposed_price,
                state.price_range.clone(),
            );
            services.audit_sink.emit(
                services
                    .audit
                    .event("approval.requested", AuditCategory::Approval, AuditOutcome::Success)
                    .with_metadata("prompt", request.prompt.clone()),
            );
            return StageOutcome::Interrupt(request);
        };

        match decision.outcome() {
            ApprovalOutcome::CounterOffer => {
                state.proposed_price = decision.counter_offer;
                state.reviewed_price = decision.counter_offer;
            }
            ApprovalOutcome::Approved => state.reviewed_price = state.proposed_price,
            // The refused ask is dropped; the last operator-cleared price, if any, stands.
            ApprovalOutcome::Rejected => state.proposed_price = state.reviewed_price,
        }
        state.approval_required = false;
        state.append_message(MessageRole::Assistant, decision.operator_note());

        services.audit_sink.emit(
            services
                .audit
                .event("approval.resolved", AuditCategory::Approval, AuditOutcome::Success)
                .with_metadata("outcome", decision.outcome().as_str()),
        );
        StageOutcome::Continue
    }

    fn close(&self, state: &mut ConversationState, services: &StageServices<'_>) -> StageOutcome {
        let summary = DealSummary::from_state(state);
        state.append_message(MessageRole::Assistant, summary.to_message());
        services.audit_sink.emit(
            services
                .audit
                .event("flow.closed", AuditCategory::Flow, AuditOutcome::Success)
                .with_metadata("owner", state.owner().as_str()),
        );
        StageOutcome::Continue
    }
}

impl Default for FlowEngine<NegotiationFlow> {
    fn default() -> Self {
        Self::new(NegotiationFlow::default())
    }
}

fn push_reply(state: &mut ConversationState, text: String) {
    if !text.trim().is_empty() {
        state.append_message(MessageRole::Assistant, text);
    }
}

fn missing_fields(
    stage: Stage,
    state: &ConversationState,
    required: &[QualificationField],
) -> ApplicationError {
    let missing_fields = required
        .iter()
        .filter(|field| !state.qualification.is_set(**field))
        .map(|field| field.as_str().to_owned())
        .collect();
    FlowError::MissingRequiredFields { stage, missing_fields }.into()
}
