use std::{cell::RefCell, fmt, rc::Rc};

use anyhow::bail;

use crate::error::PipelineError;

pub use self::context::PhaseContext;

mod context;
#[cfg(test)]
pub(crate) mod mock;

/// Identity of a node. Unique within the arena that created it, and
/// therefore within every registry built from that arena.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of an edge between two nodes.
///
/// `Pushes` and `Pulls` carry items and glue their endpoints into the same
/// phase. `Depends` carries nothing: the `from` node's phase only starts once
/// the `to` node's phase has finished.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Relation {
    Pushes,
    Pulls,
    Depends,
}

impl Relation {
    pub fn carries_items(self) -> bool {
        !matches!(self, Relation::Depends)
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Relation::Pushes => "pushes",
            Relation::Pulls => "pulls",
            Relation::Depends => "depends",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct Capabilities {
    /// Has a `go` loop and can be the initiator of a phase.
    pub drives: bool,
    pub accepts_push: bool,
    pub pullable: bool,
}

impl Capabilities {
    pub const INITIATOR: Capabilities = Capabilities {
        drives: true,
        accepts_push: false,
        pullable: false,
    };
    pub const PUSH: Capabilities = Capabilities {
        drives: false,
        accepts_push: true,
        pullable: false,
    };
    pub const PULL: Capabilities = Capabilities {
        drives: false,
        accepts_push: false,
        pullable: true,
    };
}

/// State every node carries: its name, memory contract and the allowance
/// it was handed for the current run.
#[derive(Debug, Clone)]
pub struct NodeBase {
    id: Option<NodeId>,
    name: String,
    capabilities: Capabilities,
    minimum_memory: usize,
    memory_fraction: f64,
    allowance: usize,
}

impl NodeBase {
    pub fn new<S: Into<String>>(name: S, capabilities: Capabilities) -> Self {
        NodeBase {
            id: None,
            name: name.into(),
            capabilities,
            minimum_memory: 0,
            memory_fraction: 0.0,
            allowance: 0,
        }
    }

    pub fn with_minimum_memory(mut self, bytes: usize) -> Self {
        self.minimum_memory = bytes;
        self
    }

    pub fn with_memory_fraction(mut self, fraction: f64) -> Self {
        self.memory_fraction = fraction;
        self
    }

    pub fn id(&self) -> Option<NodeId> {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: NodeId) {
        self.id = Some(id);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }
}

/// A unit of computation in a pipeline.
///
/// The driver calls, per phase: `propagate` and `begin` on every member in
/// item-flow order, `go` on the phase initiator, then `end` on every member
/// in item-flow order. Only the initiator needs a `go`; everybody else is
/// reached through `push`/`pull` calls made from inside it.
pub trait Node {
    fn base(&self) -> &NodeBase;
    fn base_mut(&mut self) -> &mut NodeBase;

    fn name(&self) -> &str {
        self.base().name()
    }

    fn capabilities(&self) -> Capabilities {
        self.base().capabilities
    }

    fn declared_minimum_memory(&self) -> usize {
        self.base().minimum_memory
    }

    fn memory_fraction(&self) -> f64 {
        self.base().memory_fraction
    }

    fn set_memory_allowance(&mut self, bytes: usize) {
        self.base_mut().allowance = bytes;
    }

    fn memory_allowance(&self) -> usize {
        self.base().allowance
    }

    fn propagate(&mut self, _ctx: &mut PhaseContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn begin(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn go(&mut self) -> anyhow::Result<()> {
        bail!(PipelineError::NotInitiator(self.name().to_owned()))
    }

    fn end(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A node items can be pushed into.
pub trait PushDest<T>: Node {
    fn push(&mut self, item: T) -> anyhow::Result<()>;
}

/// A node items can be pulled out of.
pub trait PullSource<T>: Node {
    fn can_pull(&mut self) -> bool;
    fn pull(&mut self) -> anyhow::Result<T>;
}

pub type NodeRef = Rc<RefCell<dyn Node>>;
