use std::collections::HashMap;
use std::sync::Arc;

use super::{CommandWorker, WorkerClient};
use crate::config::PipelineConfig;
use crate::errors::WorkerError;

/// Named workers available to a run.
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    workers: HashMap<String, Arc<dyn WorkerClient>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a `CommandWorker` for every `[workers.<name>]` entry.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let mut registry = Self::new();
        for (name, spec) in &config.workers {
            registry.register(name, Arc::new(CommandWorker::from_spec(name, spec)));
        }
        registry
    }

    /// Add or replace a worker.
    pub fn register(&mut self, name: &str, worker: Arc<dyn WorkerClient>) {
        self.workers.insert(name.to_string(), worker);
    }

    pub fn with(mut self, name: &str, worker: Arc<dyn WorkerClient>) -> Self {
        self.register(name, worker);
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn WorkerClient>, WorkerError> {
        self.workers
            .get(name)
            .cloned()
            .ok_or_else(|| WorkerError::UnknownWorker(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.workers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Wrap every worker with `wrap`, e.g. to record invocations.
    pub fn map(self, wrap: impl Fn(Arc<dyn WorkerClient>) -> Arc<dyn WorkerClient>) -> Self {
        Self {
            workers: self
                .workers
                .into_iter()
                .map(|(name, worker)| (name, wrap(worker)))
                .collect(),
        }
    }
}
