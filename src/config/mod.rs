use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

/// Tunables for a pipeline run. Every field has a default, so a partial
/// JSON document is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Bytes the framework keeps for itself per phase before any node sees
    /// memory.
    pub phase_overhead: usize,
    /// Budget used by `Pipeline::run_default`.
    pub default_memory: usize,
    pub sort: SortConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            phase_overhead: 1024,
            default_memory: 64 * 1024 * 1024,
            sort: SortConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SortConfig {
    /// Upper bound on the number of runs merged at once, whatever the
    /// memory allowance would permit.
    pub max_fanout: usize,
    /// Number of pieces a full run buffer is split into when a worker pool
    /// is available. 1 sorts on the calling thread.
    pub parallel_chunks: usize,
    /// Buffers shorter than this are always sorted on the calling thread.
    pub parallel_threshold: usize,
}

impl Default for SortConfig {
    fn default() -> Self {
        SortConfig {
            max_fanout: 64,
            parallel_chunks: 1,
            parallel_threshold: 4096,
        }
    }
}

impl PipelineConfig {
    /// Reads the configuration at `path`. If there is no file yet the
    /// defaults are written there and returned.
    pub fn load<P>(path: P) -> anyhow::Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => Ok(serde_json::from_str(contents.as_str())?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let config = PipelineConfig::default();
                config.write(path)?;
                Ok(config)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn tmp_path(path: &Path) -> PathBuf {
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        path.with_file_name(name)
    }

    pub fn write<P>(&self, path: P) -> anyhow::Result<()>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let tmp_path = Self::tmp_path(path);
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .create(true)
            .open(&tmp_path)?;
        let encoded = serde_json::to_string_pretty(self)?;
        file.write_all(encoded.as_bytes())?;
        file.sync_all()?;

        fs::rename(tmp_path, path)?;
        Ok(())
    }
}
