//! A pipelining dataflow engine.
//!
//! Nodes are joined by push, pull and dependency edges. Nodes glued
//! together by push or pull edges form a phase; phases run one after
//! another in an order that respects the dependency edges, and each phase
//! is driven by its single initiator node. Memory is split between the
//! nodes of a phase according to the contracts they declare.

pub mod compose;
pub mod config;
pub mod error;
pub mod memory;
pub mod merge;
pub mod node;
pub mod nodes;
pub mod phase;
pub mod pipeline;
pub mod pool;
pub mod registry;
pub mod runs;

pub use crate::{
    compose::{PipeBegin, PipeEnd, PipeMiddle, PipeToPull, PullBegin, PullEnd, PullMiddle},
    config::{PipelineConfig, SortConfig},
    error::PipelineError,
    memory::{FixedBudget, MemoryBudget},
    node::{Capabilities, Node, NodeBase, NodeId, PhaseContext, PullSource, PushDest, Relation},
    pipeline::{Pipeline, Runnable},
};
