use std::panic::{self, AssertUnwindSafe};

use anyhow::bail;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use crate::error::PipelineError;

/// A fixed set of worker threads. Owned by whoever runs the pipeline and
/// torn down when dropped.
pub struct JobPool {
    pool: ThreadPool,
}

impl JobPool {
    pub fn new(threads: usize) -> anyhow::Result<Self> {
        let threads = threads.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("extpipe-worker-{}", i))
            .build()?;
        debug!(threads, "started job pool");
        Ok(JobPool { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Runs every job on the pool and blocks until all of them are done.
    /// Results come back in submission order. If any job panics the whole
    /// batch fails.
    pub fn run_all<R, F>(&self, jobs: Vec<F>) -> anyhow::Result<Vec<R>>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let mut results: Vec<Option<R>> = jobs.iter().map(|_| None).collect();
        // A panicking job resurfaces from `scope` once every job has finished.
        let batch = panic::catch_unwind(AssertUnwindSafe(|| {
            self.pool.scope(|s| {
                for (job, slot) in jobs.into_iter().zip(results.iter_mut()) {
                    s.spawn(move |_| *slot = Some(job()));
                }
            })
        }));
        if batch.is_err() {
            bail!(PipelineError::WorkerPanicked);
        }
        Ok(results.into_iter().flatten().collect())
    }
}
