//! Nodes that hold every item of one phase and hand them on in a later one.

use std::{cell::RefCell, rc::Rc};

use anyhow::{anyhow, bail};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::{
    compose::{push_edge, register, PipeMiddle, PipeToPull, PullHandle, PushHandle},
    error::PipelineError,
    merge::Run,
    node::{Capabilities, Node, NodeBase, PhaseContext, PullSource, PushDest, Relation},
    runs::{MemoryRunStore, RunId, RunStore, TempDirRunStore},
};

struct BufferState<T> {
    store: Box<dyn RunStore<T>>,
    run: Option<RunId>,
}

struct BufferInput<T> {
    base: NodeBase,
    state: Rc<RefCell<BufferState<T>>>,
}

impl<T: 'static> Node for BufferInput<T> {
    node_base!();

    fn begin(&mut self) -> anyhow::Result<()> {
        let mut state = self.state.borrow_mut();
        let run = state.store.begin_run()?;
        state.run = Some(run);
        Ok(())
    }

    fn end(&mut self) -> anyhow::Result<()> {
        let mut state = self.state.borrow_mut();
        if let Some(run) = state.run {
            state.store.finish_run(run)?;
            debug!(
                name = self.base.name(),
                items = state.store.run_len(run).unwrap_or(0),
                "buffered items"
            );
        }
        Ok(())
    }
}

impl<T: 'static> PushDest<T> for BufferInput<T> {
    fn push(&mut self, item: T) -> anyhow::Result<()> {
        let mut state = self.state.borrow_mut();
        let run = state
            .run
            .ok_or_else(|| anyhow!("{} was pushed to before it began", self.base.name()))?;
        state.store.append(run, item)
    }
}

struct BufferOutput<T> {
    base: NodeBase,
    state: Rc<RefCell<BufferState<T>>>,
    reader: Option<Box<dyn Run<T>>>,
}

impl<T: 'static> Node for BufferOutput<T> {
    node_base!();

    fn propagate(&mut self, ctx: &mut PhaseContext) -> anyhow::Result<()> {
        let state = self.state.borrow();
        if let Some(len) = state.run.and_then(|run| state.store.run_len(run)) {
            ctx.forward("items", len as u64);
        }
        Ok(())
    }

    fn begin(&mut self) -> anyhow::Result<()> {
        let mut state = self.state.borrow_mut();
        self.reader = match state.run {
            Some(run) => Some(state.store.open(run)?),
            None => None,
        };
        Ok(())
    }

    fn end(&mut self) -> anyhow::Result<()> {
        self.reader = None;
        let mut state = self.state.borrow_mut();
        if let Some(run) = state.run.take() {
            state.store.remove(run)?;
        }
        Ok(())
    }
}

impl<T: 'static> PullSource<T> for BufferOutput<T> {
    fn can_pull(&mut self) -> bool {
        self.reader.as_mut().map_or(false, |r| r.has_more())
    }

    fn pull(&mut self) -> anyhow::Result<T> {
        if !self.can_pull() {
            bail!(PipelineError::PullWhileEmpty);
        }
        match self.reader.as_mut() {
            Some(reader) => reader.read_next(),
            None => bail!(PipelineError::PullWhileEmpty),
        }
    }
}

fn buffer_with_store<T, S>(name: &'static str, make_store: S) -> PipeToPull<T>
where
    T: 'static,
    S: FnOnce() -> anyhow::Result<Box<dyn RunStore<T>>> + 'static,
{
    PipeToPull::new(move |arena| {
        let store = make_store()?;
        let per_run = store.per_run_memory();
        let state = Rc::new(RefCell::new(BufferState { store, run: None }));

        let output = BufferOutput {
            base: NodeBase::new(format!("{}_output", name), Capabilities::PULL)
                .with_minimum_memory(per_run),
            state: state.clone(),
            reader: None,
        };
        let (output, output_token) = register(arena, output)?;

        let input = BufferInput {
            base: NodeBase::new(format!("{}_input", name), Capabilities::PUSH),
            state,
        };
        let (input, input_token) = register(arena, input)?;
        arena.connect(output_token, input_token, Relation::Depends)?;
        Ok((
            PushHandle::new(input_token, input),
            PullHandle::new(output_token, output),
        ))
    })
}

/// Holds the items of a push chain in memory until the next phase, where
/// they can be pulled in the order they arrived.
pub fn buffer<T: 'static>() -> PipeToPull<T> {
    buffer_with_store("buffer", || {
        Ok(Box::new(MemoryRunStore::<T>::new()) as Box<dyn RunStore<T>>)
    })
}

/// Like [`buffer`], but the items wait in a temporary file.
pub fn external_buffer<T>() -> PipeToPull<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    buffer_with_store("external_buffer", || {
        Ok(Box::new(TempDirRunStore::<T>::new()?) as Box<dyn RunStore<T>>)
    })
}

struct ReverseInput<T> {
    base: NodeBase,
    items: Rc<RefCell<Vec<T>>>,
}

impl<T: 'static> Node for ReverseInput<T> {
    node_base!();

    fn propagate(&mut self, ctx: &mut PhaseContext) -> anyhow::Result<()> {
        if let Some(&n) = ctx.fetch::<u64>("items") {
            self.items.borrow_mut().reserve(n as usize);
        }
        Ok(())
    }
}

impl<T: 'static> PushDest<T> for ReverseInput<T> {
    fn push(&mut self, item: T) -> anyhow::Result<()> {
        self.items.borrow_mut().push(item);
        Ok(())
    }
}

struct ReverseOutput<T> {
    base: NodeBase,
    items: Rc<RefCell<Vec<T>>>,
    dest: PushHandle<T>,
}

impl<T: 'static> Node for ReverseOutput<T> {
    node_base!();

    fn go(&mut self) -> anyhow::Result<()> {
        let items = self.items.take();
        for item in items.into_iter().rev() {
            self.dest.push(item)?;
        }
        Ok(())
    }
}

/// Pushes the items of one phase on in reverse order, in the next phase.
pub fn reverse<T: 'static>() -> PipeMiddle<T, T> {
    PipeMiddle::new(move |arena, dest| {
        let items = Rc::new(RefCell::new(Vec::new()));
        let output = ReverseOutput {
            base: NodeBase::new("reverse_output", Capabilities::INITIATOR),
            items: items.clone(),
            dest: dest.clone(),
        };
        let (_, output) = register(arena, output)?;
        push_edge(arena, output, &dest)?;

        let input = ReverseInput {
            base: NodeBase::new("reverse_input", Capabilities::PUSH).with_memory_fraction(1.0),
            items,
        };
        let (input, token) = register(arena, input)?;
        arena.connect(output, token, Relation::Depends)?;
        Ok(PushHandle::new(token, input))
    })
}
