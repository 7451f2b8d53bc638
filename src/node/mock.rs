use std::{cell::RefCell, rc::Rc};

use anyhow::bail;

use super::{Capabilities, Node, NodeBase, PhaseContext};
use crate::error::PipelineError;

/// Records its lifecycle calls into a shared event list.
#[derive(Debug)]
pub struct MockNode {
    base: NodeBase,
    events: Rc<RefCell<Vec<String>>>,
}

impl MockNode {
    pub fn new(name: &str, capabilities: Capabilities, events: Rc<RefCell<Vec<String>>>) -> Self {
        MockNode {
            base: NodeBase::new(name, capabilities),
            events,
        }
    }

    pub fn with_memory(mut self, minimum: usize, fraction: f64) -> Self {
        self.base = self
            .base
            .with_minimum_memory(minimum)
            .with_memory_fraction(fraction);
        self
    }

    fn record(&self, what: &str) {
        (*self.events)
            .borrow_mut()
            .push(format!("{} {}", what, self.base.name()));
    }
}

impl Node for MockNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn propagate(&mut self, _ctx: &mut PhaseContext) -> anyhow::Result<()> {
        self.record("propagate");
        Ok(())
    }

    fn begin(&mut self) -> anyhow::Result<()> {
        self.record("begin");
        Ok(())
    }

    fn go(&mut self) -> anyhow::Result<()> {
        if !self.base.capabilities().drives {
            bail!(PipelineError::NotInitiator(self.base.name().to_owned()));
        }
        self.record("go");
        Ok(())
    }

    fn end(&mut self) -> anyhow::Result<()> {
        self.record("end");
        Ok(())
    }
}
