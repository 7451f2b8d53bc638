use thiserror::Error;

use crate::node::NodeId;

/// Errors raised by the engine itself. They travel inside `anyhow::Error`,
/// so callers that care about the kind use `downcast_ref::<PipelineError>()`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("non-authoritative registry {0} used directly")]
    NonAuthoritativeRegistry(usize),

    #[error("unknown registry {0}")]
    UnknownRegistry(usize),

    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),

    #[error("phase {phase} has {} initiators ({})", .initiators.len(), .initiators.join(", "))]
    MalformedPhase {
        phase: usize,
        initiators: Vec<String>,
    },

    #[error("item flow inside phase {phase} contains a cycle")]
    FlowCycle { phase: usize },

    #[error("cycle among phase dependencies")]
    DependencyCycle,

    #[error("pipeline has no nodes")]
    EmptyPipeline,

    #[error("pipeline has already been run")]
    PipelineConsumed,

    #[error("node {0} is not an initiator")]
    NotInitiator(String),

    #[error("reset on a merger that is not empty")]
    MergerNotEmpty,

    #[error("pull while nothing can be pulled")]
    PullWhileEmpty,

    #[error("worker job panicked")]
    WorkerPanicked,

    #[error("run {0} does not exist")]
    UnknownRun(usize),
}
