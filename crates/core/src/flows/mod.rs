pub mod checkpoint;
pub mod engine;
pub mod states;

pub use checkpoint::{CheckpointStore, InMemoryCheckpointStore};
pub use engine::{
    ConversationalStages, FlowDefinition, FlowEngine, FlowError, NegotiationFlow, StageServices,
    MAX_STAGE_STEPS,
};
pub use states::{
    Checkpoint, CheckpointStatus, RepricePolicy, Route, Stage, SuspendReason, TurnOutcome,
    TurnReport,
};
