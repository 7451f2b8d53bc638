//! Running a push chain where a pull chain is expected, and the other way
//! round. The wrapped chain joins the phase of the adapter.

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use anyhow::bail;

use crate::{
    compose::{pull_edge, push_edge, register, PipeMiddle, PullHandle, PullMiddle, PushHandle},
    error::PipelineError,
    node::{Capabilities, Node, NodeBase, PullSource, PushDest},
};

type Slot<T> = Rc<RefCell<VecDeque<T>>>;

struct Collect<T> {
    base: NodeBase,
    slot: Slot<T>,
}

impl<T: 'static> Node for Collect<T> {
    node_base!();
}

impl<T: 'static> PushDest<T> for Collect<T> {
    fn push(&mut self, item: T) -> anyhow::Result<()> {
        self.slot.borrow_mut().push_back(item);
        Ok(())
    }
}

struct PushToPull<I, O> {
    base: NodeBase,
    source: PullHandle<I>,
    head: PushHandle<I>,
    slot: Slot<O>,
    failed: Option<anyhow::Error>,
}

impl<I: 'static, O: 'static> PushToPull<I, O> {
    /// Pushes pulled items through the chain until something comes out of
    /// it or the source runs dry.
    fn fill(&mut self) -> anyhow::Result<()> {
        while self.slot.borrow().is_empty() && self.source.can_pull() {
            let item = self.source.pull()?;
            self.head.push(item)?;
        }
        Ok(())
    }
}

impl<I: 'static, O: 'static> Node for PushToPull<I, O> {
    node_base!();

    fn begin(&mut self) -> anyhow::Result<()> {
        self.slot.borrow_mut().clear();
        self.failed = None;
        Ok(())
    }
}

impl<I: 'static, O: 'static> PullSource<O> for PushToPull<I, O> {
    fn can_pull(&mut self) -> bool {
        if self.failed.is_none() {
            if let Err(e) = self.fill() {
                self.failed = Some(e);
            }
        }
        // A failure is handed to the next pull.
        self.failed.is_some() || !self.slot.borrow().is_empty()
    }

    fn pull(&mut self) -> anyhow::Result<O> {
        if let Some(e) = self.failed.take() {
            return Err(e);
        }
        self.fill()?;
        match self.slot.borrow_mut().pop_front() {
            Some(item) => Ok(item),
            None => bail!(PipelineError::PullWhileEmpty),
        }
    }
}

/// Runs the push chain `chain` inside a pull chain. Items are pulled from
/// upstream one at a time and pushed through `chain` until it produces
/// output. `chain` must pass items on as it receives them: anything it
/// only emits from its end hook is lost.
pub fn push_to_pull<I, O>(chain: PipeMiddle<I, O>) -> PullMiddle<I, O>
where
    I: 'static,
    O: 'static,
{
    PullMiddle::new(move |arena, source| {
        let slot: Slot<O> = Rc::new(RefCell::new(VecDeque::new()));
        let sink = Collect {
            base: NodeBase::new("push_to_pull_sink", Capabilities::PUSH),
            slot: slot.clone(),
        };
        let (sink, sink_token) = register(arena, sink)?;
        let head = chain.attach(arena, PushHandle::new(sink_token, sink))?;

        let node = PushToPull {
            base: NodeBase::new("push_to_pull", Capabilities::PULL),
            source: source.clone(),
            head: head.clone(),
            slot,
            failed: None,
        };
        let (node, token) = register(arena, node)?;
        pull_edge(arena, token, &source)?;
        push_edge(arena, token, &head)?;
        Ok(PullHandle::new(token, node))
    })
}

struct Feed<T> {
    base: NodeBase,
    slot: Slot<T>,
}

impl<T: 'static> Node for Feed<T> {
    node_base!();
}

impl<T: 'static> PullSource<T> for Feed<T> {
    fn can_pull(&mut self) -> bool {
        !self.slot.borrow().is_empty()
    }

    fn pull(&mut self) -> anyhow::Result<T> {
        match self.slot.borrow_mut().pop_front() {
            Some(item) => Ok(item),
            None => bail!(PipelineError::PullWhileEmpty),
        }
    }
}

struct PullToPush<I, O> {
    base: NodeBase,
    tail: PullHandle<O>,
    dest: PushHandle<O>,
    slot: Slot<I>,
}

impl<I: 'static, O: 'static> Node for PullToPush<I, O> {
    node_base!();
}

impl<I: 'static, O: 'static> PushDest<I> for PullToPush<I, O> {
    fn push(&mut self, item: I) -> anyhow::Result<()> {
        self.slot.borrow_mut().push_back(item);
        while self.tail.can_pull() {
            let item = self.tail.pull()?;
            self.dest.push(item)?;
        }
        Ok(())
    }
}

/// Runs the pull chain `chain` inside a push chain. Every pushed item is
/// offered to `chain`, and whatever can then be pulled from it is pushed on.
pub fn pull_to_push<I, O>(chain: PullMiddle<I, O>) -> PipeMiddle<I, O>
where
    I: 'static,
    O: 'static,
{
    PipeMiddle::new(move |arena, dest| {
        let slot: Slot<I> = Rc::new(RefCell::new(VecDeque::new()));
        let feed = Feed {
            base: NodeBase::new("pull_to_push_source", Capabilities::PULL),
            slot: slot.clone(),
        };
        let (feed, feed_token) = register(arena, feed)?;
        let tail = chain.attach(arena, PullHandle::new(feed_token, feed))?;

        let node = PullToPush {
            base: NodeBase::new("pull_to_push", Capabilities::PUSH),
            tail: tail.clone(),
            dest: dest.clone(),
            slot,
        };
        let (node, token) = register(arena, node)?;
        pull_edge(arena, token, &tail)?;
        push_edge(arena, token, &dest)?;
        Ok(PushHandle::new(token, node))
    })
}
