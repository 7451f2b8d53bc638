use std::{any::Any, collections::HashMap, sync::Arc};

use crate::{config::PipelineConfig, pool::JobPool};

/// Handed to every node's `propagate` hook. Values forwarded here stay
/// visible for the rest of the run, including later phases.
pub struct PhaseContext {
    values: HashMap<String, Box<dyn Any>>,
    config: PipelineConfig,
    pool: Option<Arc<JobPool>>,
    phase: usize,
}

impl PhaseContext {
    pub fn new(config: PipelineConfig, pool: Option<Arc<JobPool>>) -> Self {
        PhaseContext {
            values: HashMap::new(),
            config,
            pool,
            phase: 0,
        }
    }

    pub fn forward<V: Any>(&mut self, key: &str, value: V) {
        self.values.insert(key.to_owned(), Box::new(value));
    }

    /// Returns the value forwarded under `key`, if there is one of type `V`.
    pub fn fetch<V: Any>(&self, key: &str) -> Option<&V> {
        self.values.get(key)?.downcast_ref()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn pool(&self) -> Option<Arc<JobPool>> {
        self.pool.clone()
    }

    /// Execution slot of the phase currently being prepared.
    pub fn phase(&self) -> usize {
        self.phase
    }

    pub(crate) fn set_phase(&mut self, phase: usize) {
        self.phase = phase;
    }
}
