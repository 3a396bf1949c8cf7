use std::collections::HashMap;
use std::sync::Arc;

use chainscan_common::config::Config;

use super::{ShellStage, Stage};

/// Name to executor lookup.
#[derive(Default, Clone)]
pub struct StageRegistry {
    stages: HashMap<String, Arc<dyn Stage>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One [`ShellStage`] per configured stage, enabled or not.
    pub fn from_config(cfg: &Config) -> Self {
        let mut registry = Self::new();
        for stage in &cfg.stages {
            registry.register(ShellStage::new(stage.name.clone(), stage.binary.clone()));
        }
        registry
    }

    /// Registers `stage` under its own name, replacing any previous entry.
    pub fn register<S>(&mut self, stage: S)
    where
        S: Stage + 'static,
    {
        self.register_arc(Arc::new(stage));
    }

    pub fn register_arc(&mut self, stage: Arc<dyn Stage>) {
        self.stages.insert(stage.name().to_string(), stage);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Stage>> {
        self.stages.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stages.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
