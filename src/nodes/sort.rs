//! Sorting in two phases. The input node collects items into buffers sized
//! by its memory allowance and writes each full buffer out as a sorted run.
//! The output node, in a later phase, merges the runs (in several rounds if
//! there are more than it can hold open at once) and pushes the result on.

use std::{cell::RefCell, cmp::Ordering, mem, rc::Rc, sync::Arc};

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, trace};

use crate::{
    compose::{push_edge, register, PipeMiddle, PushHandle},
    config::SortConfig,
    error::PipelineError,
    merge::{Merger, Run, VecRun},
    node::{Capabilities, Node, NodeBase, PhaseContext, PushDest, Relation},
    pool::JobPool,
    runs::{MemoryRunStore, RunId, RunStore, TempDirRunStore},
};

/// A run buffer always has room for at least this many items.
pub const MIN_RUN_ITEMS: usize = 16;

struct SortState<T> {
    store: Box<dyn RunStore<T>>,
    runs: Vec<RunId>,
}

struct SortInput<T, C> {
    base: NodeBase,
    cmp: C,
    buffer: Vec<T>,
    capacity: usize,
    state: Rc<RefCell<SortState<T>>>,
    pool: Option<Arc<JobPool>>,
    config: SortConfig,
}

impl<T, C> SortInput<T, C>
where
    T: Send + 'static,
    C: Fn(&T, &T) -> Ordering + Clone + Send + Sync + 'static,
{
    fn flush(&mut self) -> anyhow::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let items = mem::take(&mut self.buffer);
        let sorted = self.sort_items(items)?;
        let mut state = self.state.borrow_mut();
        let run = state.store.write_run(sorted)?;
        trace!(run = run.0, "wrote sorted run");
        state.runs.push(run);
        Ok(())
    }

    fn sort_items(&self, mut items: Vec<T>) -> anyhow::Result<Vec<T>> {
        let chunks = self.config.parallel_chunks;
        let threshold = self.config.parallel_threshold.max(chunks);
        let pool = match &self.pool {
            Some(pool) if chunks > 1 && items.len() >= threshold => pool,
            _ => {
                let cmp = &self.cmp;
                items.sort_by(|a, b| cmp(a, b));
                return Ok(items);
            }
        };

        let total = items.len();
        let chunk_len = (total + chunks - 1) / chunks;
        let mut pieces = Vec::with_capacity(chunks);
        while !items.is_empty() {
            let at = items.len().saturating_sub(chunk_len);
            pieces.push(items.split_off(at));
        }
        let jobs: Vec<_> = pieces
            .into_iter()
            .map(|mut piece| {
                let cmp = self.cmp.clone();
                move || {
                    piece.sort_by(|a, b| cmp(a, b));
                    piece
                }
            })
            .collect();
        let sorted = pool.run_all(jobs)?;
        trace!(items = total, pieces = sorted.len(), "sorted run buffer in parallel");

        let mut merger = Merger::new(&self.cmp);
        merger.reset(sorted.into_iter().map(VecRun::new).collect(), usize::MAX)?;
        let mut out = Vec::with_capacity(total);
        while merger.can_pull() {
            out.push(merger.pull()?);
        }
        Ok(out)
    }
}

impl<T, C> Node for SortInput<T, C>
where
    T: Send + 'static,
    C: Fn(&T, &T) -> Ordering + Clone + Send + Sync + 'static,
{
    node_base!();

    fn propagate(&mut self, ctx: &mut PhaseContext) -> anyhow::Result<()> {
        let item_size = mem::size_of::<T>().max(1);
        self.capacity = (self.memory_allowance() / item_size).max(MIN_RUN_ITEMS);
        self.pool = ctx.pool();
        self.config = ctx.config().sort.clone();
        Ok(())
    }

    fn begin(&mut self) -> anyhow::Result<()> {
        self.buffer = Vec::new();
        Ok(())
    }

    fn end(&mut self) -> anyhow::Result<()> {
        self.flush()?;
        debug!(
            name = self.name(),
            runs = self.state.borrow().runs.len(),
            "formed sorted runs"
        );
        Ok(())
    }
}

impl<T, C> PushDest<T> for SortInput<T, C>
where
    T: Send + 'static,
    C: Fn(&T, &T) -> Ordering + Clone + Send + Sync + 'static,
{
    fn push(&mut self, item: T) -> anyhow::Result<()> {
        self.buffer.push(item);
        if self.buffer.len() >= self.capacity {
            self.flush()?;
        }
        Ok(())
    }
}

struct SortOutput<T, C> {
    base: NodeBase,
    cmp: C,
    state: Rc<RefCell<SortState<T>>>,
    dest: PushHandle<T>,
    fanout: usize,
}

/// Largest number of runs, between 2 and `max_fanout`, that can be merged
/// at once within `allowance` bytes.
fn fanout_for<T, C>(allowance: usize, per_run: usize, max_fanout: usize) -> usize
where
    T: 'static,
    C: Fn(&T, &T) -> Ordering,
{
    let cost = |k: usize| {
        Merger::<T, Box<dyn Run<T>>, C>::memory_usage(k).saturating_add(k.saturating_mul(per_run))
    };
    let mut k = max_fanout.max(2);
    while k > 2 && cost(k) > allowance {
        k -= 1;
    }
    k
}

fn open_runs<T>(
    store: &mut dyn RunStore<T>,
    group: &[RunId],
) -> anyhow::Result<(Vec<Box<dyn Run<T>>>, usize)> {
    let mut opened = Vec::with_capacity(group.len());
    let mut longest = 0;
    for run in group {
        let len = store
            .run_len(*run)
            .ok_or(PipelineError::UnknownRun(run.0))?;
        longest = longest.max(len);
        opened.push(store.open(*run)?);
    }
    Ok((opened, longest))
}

impl<T, C> Node for SortOutput<T, C>
where
    T: 'static,
    C: Fn(&T, &T) -> Ordering + 'static,
{
    node_base!();

    fn propagate(&mut self, ctx: &mut PhaseContext) -> anyhow::Result<()> {
        let per_run = self.state.borrow().store.per_run_memory();
        let max_fanout = ctx.config().sort.max_fanout;
        self.fanout = fanout_for::<T, C>(self.memory_allowance(), per_run, max_fanout);
        Ok(())
    }

    fn go(&mut self) -> anyhow::Result<()> {
        let mut state = self.state.borrow_mut();
        let mut runs = mem::take(&mut state.runs);
        let mut merger = Merger::new(&self.cmp);

        let mut round = 0;
        while runs.len() > self.fanout {
            let mut next = Vec::with_capacity(runs.len() / self.fanout + 1);
            for group in runs.chunks(self.fanout) {
                if group.len() == 1 {
                    next.push(group[0]);
                    continue;
                }
                let (opened, run_length) = open_runs(state.store.as_mut(), group)?;
                let merged = state.store.begin_run()?;
                merger.reset(opened, run_length)?;
                while merger.can_pull() {
                    let item = merger.pull()?;
                    state.store.append(merged, item)?;
                }
                state.store.finish_run(merged)?;
                for run in group {
                    state.store.remove(*run)?;
                }
                next.push(merged);
            }
            debug!(round, before = runs.len(), after = next.len(), "merge round");
            runs = next;
            round += 1;
        }

        let (opened, run_length) = open_runs(state.store.as_mut(), &runs)?;
        merger.reset(opened, run_length)?;
        while merger.can_pull() {
            self.dest.push(merger.pull()?)?;
        }
        for run in runs {
            state.store.remove(run)?;
        }
        Ok(())
    }
}

fn sort_with_store<T, C, S>(name: &'static str, cmp: C, make_store: S) -> PipeMiddle<T, T>
where
    T: Send + 'static,
    C: Fn(&T, &T) -> Ordering + Clone + Send + Sync + 'static,
    S: FnOnce() -> anyhow::Result<Box<dyn RunStore<T>>> + 'static,
{
    PipeMiddle::new(move |arena, dest| {
        let store = make_store()?;
        let per_run = store.per_run_memory();
        let state = Rc::new(RefCell::new(SortState {
            store,
            runs: Vec::new(),
        }));

        let output = SortOutput {
            base: NodeBase::new(format!("{}_output", name), Capabilities::INITIATOR)
                .with_minimum_memory(
                    Merger::<T, Box<dyn Run<T>>, C>::memory_usage(2) + 2 * per_run,
                )
                .with_memory_fraction(1.0),
            cmp: cmp.clone(),
            state: state.clone(),
            dest: dest.clone(),
            fanout: 2,
        };
        let (_, output) = register(arena, output)?;
        push_edge(arena, output, &dest)?;

        let input = SortInput {
            base: NodeBase::new(format!("{}_input", name), Capabilities::PUSH)
                .with_minimum_memory(MIN_RUN_ITEMS * mem::size_of::<T>())
                .with_memory_fraction(1.0),
            cmp,
            buffer: Vec::new(),
            capacity: MIN_RUN_ITEMS,
            state,
            pool: None,
            config: SortConfig::default(),
        };
        let (input, token) = register(arena, input)?;
        arena.connect(output, token, Relation::Depends)?;
        Ok(PushHandle::new(token, input))
    })
}

/// Sorts by `cmp`, keeping runs in memory.
pub fn sort_by<T, C>(cmp: C) -> PipeMiddle<T, T>
where
    T: Send + 'static,
    C: Fn(&T, &T) -> Ordering + Clone + Send + Sync + 'static,
{
    sort_with_store("sort", cmp, || {
        Ok(Box::new(MemoryRunStore::<T>::new()) as Box<dyn RunStore<T>>)
    })
}

pub fn sort<T: Ord + Send + 'static>() -> PipeMiddle<T, T> {
    sort_by(|a: &T, b: &T| a.cmp(b))
}

/// Sorts by `cmp`, spilling runs to a temporary directory.
pub fn external_sort_by<T, C>(cmp: C) -> PipeMiddle<T, T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
    C: Fn(&T, &T) -> Ordering + Clone + Send + Sync + 'static,
{
    sort_with_store("external_sort", cmp, || {
        Ok(Box::new(TempDirRunStore::<T>::new()?) as Box<dyn RunStore<T>>)
    })
}

pub fn external_sort<T>() -> PipeMiddle<T, T>
where
    T: Ord + Serialize + DeserializeOwned + Send + 'static,
{
    external_sort_by(|a: &T, b: &T| a.cmp(b))
}
