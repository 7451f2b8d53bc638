use std::{
    collections::HashMap,
    fs::{self, File},
    io::{BufRead, BufReader, BufWriter, Lines, Write},
    marker::PhantomData,
    path::PathBuf,
};

use anyhow::bail;
use serde::{de::DeserializeOwned, Serialize};
use tempfile::TempDir;
use tracing::trace;

use crate::{
    error::PipelineError,
    merge::{Run, VecRun},
};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct RunId(pub usize);

/// Where sorted runs live between being written and being merged.
pub trait RunStore<T> {
    fn begin_run(&mut self) -> anyhow::Result<RunId>;
    fn append(&mut self, run: RunId, item: T) -> anyhow::Result<()>;
    fn finish_run(&mut self, run: RunId) -> anyhow::Result<()>;

    /// Opens a finished run for reading from its start.
    fn open(&mut self, run: RunId) -> anyhow::Result<Box<dyn Run<T>>>;

    fn run_len(&self, run: RunId) -> Option<usize>;
    fn remove(&mut self, run: RunId) -> anyhow::Result<()>;

    /// Bytes an open run costs on top of the items themselves.
    fn per_run_memory(&self) -> usize;

    fn write_run(&mut self, items: Vec<T>) -> anyhow::Result<RunId> {
        let run = self.begin_run()?;
        for item in items {
            self.append(run, item)?;
        }
        self.finish_run(run)?;
        Ok(run)
    }
}

/// Keeps runs as vectors. Opening a run hands its items over, so a run can
/// be read once.
#[derive(Debug)]
pub struct MemoryRunStore<T> {
    runs: HashMap<RunId, Vec<T>>,
    lens: HashMap<RunId, usize>,
    next: usize,
}

impl<T> Default for MemoryRunStore<T> {
    fn default() -> Self {
        MemoryRunStore {
            runs: HashMap::new(),
            lens: HashMap::new(),
            next: 0,
        }
    }
}

impl<T> MemoryRunStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh(&mut self) -> RunId {
        self.next += 1;
        RunId(self.next - 1)
    }
}

impl<T: 'static> RunStore<T> for MemoryRunStore<T> {
    fn begin_run(&mut self) -> anyhow::Result<RunId> {
        let run = self.fresh();
        self.runs.insert(run, Vec::new());
        self.lens.insert(run, 0);
        Ok(run)
    }

    fn append(&mut self, run: RunId, item: T) -> anyhow::Result<()> {
        match self.runs.get_mut(&run) {
            Some(items) => {
                items.push(item);
                *self.lens.entry(run).or_default() += 1;
                Ok(())
            }
            None => bail!(PipelineError::UnknownRun(run.0)),
        }
    }

    fn finish_run(&mut self, run: RunId) -> anyhow::Result<()> {
        if !self.runs.contains_key(&run) {
            bail!(PipelineError::UnknownRun(run.0));
        }
        Ok(())
    }

    fn open(&mut self, run: RunId) -> anyhow::Result<Box<dyn Run<T>>> {
        match self.runs.get_mut(&run) {
            Some(items) => Ok(Box::new(VecRun::new(std::mem::take(items)))),
            None => bail!(PipelineError::UnknownRun(run.0)),
        }
    }

    fn run_len(&self, run: RunId) -> Option<usize> {
        self.lens.get(&run).copied()
    }

    fn remove(&mut self, run: RunId) -> anyhow::Result<()> {
        self.lens.remove(&run);
        match self.runs.remove(&run) {
            Some(_) => Ok(()),
            None => bail!(PipelineError::UnknownRun(run.0)),
        }
    }

    fn per_run_memory(&self) -> usize {
        std::mem::size_of::<VecRun<T>>()
    }

    fn write_run(&mut self, items: Vec<T>) -> anyhow::Result<RunId> {
        let run = self.fresh();
        self.lens.insert(run, items.len());
        self.runs.insert(run, items);
        Ok(run)
    }
}

const READ_BUFFER: usize = 8 * 1024;

/// Spills runs into a private temporary directory, one newline-delimited
/// JSON file per run. The directory goes away with the store.
pub struct TempDirRunStore<T> {
    dir: TempDir,
    writers: HashMap<RunId, BufWriter<File>>,
    lens: HashMap<RunId, usize>,
    next: usize,
    _marker: PhantomData<T>,
}

impl<T> TempDirRunStore<T> {
    pub fn new() -> anyhow::Result<Self> {
        let dir = tempfile::Builder::new().prefix("extpipe-runs").tempdir()?;
        Ok(TempDirRunStore {
            dir,
            writers: HashMap::new(),
            lens: HashMap::new(),
            next: 0,
            _marker: PhantomData,
        })
    }

    fn path(&self, run: RunId) -> PathBuf {
        self.dir.path().join(format!("run{}.jsonl", run.0))
    }

    /// Files currently on disk.
    pub fn ls(&self) -> anyhow::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.dir.path())? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }
}

impl<T> RunStore<T> for TempDirRunStore<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    fn begin_run(&mut self) -> anyhow::Result<RunId> {
        let run = RunId(self.next);
        self.next += 1;
        let file = File::create(self.path(run))?;
        self.writers.insert(run, BufWriter::new(file));
        self.lens.insert(run, 0);
        trace!(run = run.0, "begin spilled run");
        Ok(run)
    }

    fn append(&mut self, run: RunId, item: T) -> anyhow::Result<()> {
        let w = match self.writers.get_mut(&run) {
            Some(w) => w,
            None => bail!(PipelineError::UnknownRun(run.0)),
        };
        serde_json::to_writer(&mut *w, &item)?;
        w.write_all(b"\n")?;
        *self.lens.entry(run).or_default() += 1;
        Ok(())
    }

    fn finish_run(&mut self, run: RunId) -> anyhow::Result<()> {
        match self.writers.remove(&run) {
            Some(mut w) => {
                w.flush()?;
                Ok(())
            }
            None => bail!(PipelineError::UnknownRun(run.0)),
        }
    }

    fn open(&mut self, run: RunId) -> anyhow::Result<Box<dyn Run<T>>> {
        let remaining = match self.lens.get(&run) {
            Some(n) => *n,
            None => bail!(PipelineError::UnknownRun(run.0)),
        };
        let file = File::open(self.path(run))?;
        Ok(Box::new(FileRun {
            lines: BufReader::with_capacity(READ_BUFFER, file).lines(),
            remaining,
            _marker: PhantomData,
        }))
    }

    fn run_len(&self, run: RunId) -> Option<usize> {
        self.lens.get(&run).copied()
    }

    fn remove(&mut self, run: RunId) -> anyhow::Result<()> {
        if self.lens.remove(&run).is_none() {
            bail!(PipelineError::UnknownRun(run.0));
        }
        self.writers.remove(&run);
        fs::remove_file(self.path(run))?;
        Ok(())
    }

    fn per_run_memory(&self) -> usize {
        READ_BUFFER + std::mem::size_of::<FileRun<T>>()
    }
}

struct FileRun<T> {
    lines: Lines<BufReader<File>>,
    remaining: usize,
    _marker: PhantomData<T>,
}

impl<T: DeserializeOwned> Run<T> for FileRun<T> {
    fn has_more(&mut self) -> bool {
        self.remaining > 0
    }

    fn read_next(&mut self) -> anyhow::Result<T> {
        let line = match self.lines.next() {
            Some(line) => line?,
            None => bail!("spilled run ended early"),
        };
        self.remaining -= 1;
        Ok(serde_json::from_str(&line)?)
    }
}
