use std::cmp::Ordering;

use anyhow::bail;

use crate::error::PipelineError;

pub use self::{
    queue::PriorityQueue,
    run::{Run, VecRun},
};

mod queue;
mod run;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergerState {
    Empty,
    Seeded,
    Draining,
}

/// K-way merger over sorted runs.
///
/// `reset` seeds a priority queue with the head of every run; each `pull`
/// hands out the smallest pending item and refills from the run it came
/// from. A run contributes at most `run_length` items per round. Once the
/// queue drains the merger forgets its runs and is ready for the next
/// `reset`.
///
/// Items that compare equal come out in an unspecified (but deterministic)
/// order.
pub struct Merger<T, R, C> {
    queue: PriorityQueue<(T, usize)>,
    runs: Vec<R>,
    items_read: Vec<usize>,
    run_length: usize,
    pulled: bool,
    cmp: C,
}

impl<T, R, C> Merger<T, R, C>
where
    R: Run<T>,
    C: Fn(&T, &T) -> Ordering,
{
    pub fn new(cmp: C) -> Self {
        Merger {
            queue: PriorityQueue::with_capacity(0),
            runs: Vec::new(),
            items_read: Vec::new(),
            run_length: 0,
            pulled: false,
            cmp,
        }
    }

    /// Bytes a merger of the given fanout needs, excluding whatever buffers
    /// the runs themselves hold.
    pub fn memory_usage(fanout: usize) -> usize {
        std::mem::size_of::<Self>() - std::mem::size_of::<PriorityQueue<(T, usize)>>()
            + PriorityQueue::<(T, usize)>::memory_usage(fanout)
            + fanout * (std::mem::size_of::<R>() + std::mem::size_of::<usize>())
    }

    pub fn state(&self) -> MergerState {
        if self.queue.is_empty() {
            MergerState::Empty
        } else if self.pulled {
            MergerState::Draining
        } else {
            MergerState::Seeded
        }
    }

    pub fn fanout(&self) -> usize {
        self.runs.len()
    }

    pub fn can_pull(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn reset(&mut self, runs: Vec<R>, run_length: usize) -> anyhow::Result<()> {
        if self.state() != MergerState::Empty {
            bail!(PipelineError::MergerNotEmpty);
        }

        self.queue = PriorityQueue::with_capacity(runs.len());
        self.items_read = vec![0; runs.len()];
        self.runs = runs;
        self.run_length = run_length;
        self.pulled = false;

        // A run that fails while seeding leaves nothing behind.
        if let Err(e) = self.seed() {
            self.clear();
            return Err(e);
        }
        if self.queue.is_empty() {
            self.clear();
        }
        Ok(())
    }

    fn seed(&mut self) -> anyhow::Result<()> {
        let Merger {
            queue,
            runs,
            items_read,
            run_length,
            cmp,
            ..
        } = self;
        let by_item = |a: &(T, usize), b: &(T, usize)| cmp(&a.0, &b.0);
        for (i, run) in runs.iter_mut().enumerate() {
            if *run_length > 0 && run.has_more() {
                let item = run.read_next()?;
                items_read[i] = 1;
                queue.push((item, i), &by_item);
            }
        }
        Ok(())
    }

    pub fn pull(&mut self) -> anyhow::Result<T> {
        let source = match self.queue.peek() {
            Some((_, source)) => *source,
            None => bail!(PipelineError::PullWhileEmpty),
        };
        self.pulled = true;

        let Merger {
            queue,
            runs,
            items_read,
            run_length,
            cmp,
            ..
        } = self;
        let by_item = |a: &(T, usize), b: &(T, usize)| cmp(&a.0, &b.0);
        let top = if items_read[source] < *run_length && runs[source].has_more() {
            let next = runs[source].read_next()?;
            items_read[source] += 1;
            queue.pop_and_push((next, source), &by_item)
        } else {
            queue.pop(&by_item)
        };

        if self.queue.is_empty() {
            self.clear();
        }

        match top {
            Some((item, _)) => Ok(item),
            None => bail!(PipelineError::PullWhileEmpty),
        }
    }

    fn clear(&mut self) {
        self.queue.clear();
        self.runs.clear();
        self.items_read.clear();
        self.run_length = 0;
        self.pulled = false;
    }
}
