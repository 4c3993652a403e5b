use std::collections::HashMap;
use std::sync::Arc;

use crate::plugin::{Builder, Runner};

/// Registry of the builders and runners this daemon can dispatch to, keyed
/// by their string ids.
///
/// Compositions name their builder and runner explicitly, so lookup is by
/// exact id. Registration replaces an earlier entry with the same id.
#[derive(Default)]
pub struct PluginRegistry {
    builders: HashMap<String, Arc<dyn Builder>>,
    runners: HashMap<String, Arc<dyn Runner>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_builder(&mut self, builder: Arc<dyn Builder>) {
        self.builders.insert(builder.id().to_string(), builder);
    }

    pub fn register_runner(&mut self, runner: Arc<dyn Runner>) {
        self.runners.insert(runner.id().to_string(), runner);
    }

    pub fn builder(&self, id: &str) -> Option<Arc<dyn Builder>> {
        self.builders.get(id).cloned()
    }

    pub fn runner(&self, id: &str) -> Option<Arc<dyn Runner>> {
        self.runners.get(id).cloned()
    }

    pub fn builder_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.builders.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    pub fn runner_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.runners.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }
}
