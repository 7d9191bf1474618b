pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod pricing;

pub use audit::{AuditContext, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use domain::agent::{AgentProfile, AgentRegistry, DEFAULT_AGENT_ID};
pub use domain::approval::{ApprovalDecision, ApprovalOutcome, ApprovalRequest};
pub use domain::benchmark::{BenchmarkSnapshot, DealSample, HistoricalDeal};
pub use domain::conversation::{
    ChatMessage, ConversationState, ConversationStatus, DeliverableType, ExtractedFields,
    MessageRole, Owner, Platform, QualificationField, QualificationFields, ThreadId,
};
pub use domain::offer::{DealSummary, OfferRecord};
pub use errors::{ApplicationError, DomainError, InterfaceError, GENERIC_FAILURE_REPLY};
pub use flows::{
    Checkpoint, CheckpointStatus, CheckpointStore, FlowEngine, FlowError, Stage, TurnOutcome,
    TurnReport,
};
pub use pricing::{BenchmarkQuery, BenchmarkSource, PriceRange, PricingRuntime};
