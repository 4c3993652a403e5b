use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ConfigError, ConfigResult};

/// Free-form configuration mapping, as carried by env config sections,
/// manifests and composition `build_config`/`run_config` blocks.
pub type ConfigMap = BTreeMap<String, Value>;

/// An ordered stack of configuration layers.
///
/// Later layers take precedence over earlier ones. Merging happens at the
/// root key level only: a later layer that sets a key replaces the earlier
/// value wholesale, nested maps are never merged.
#[derive(Debug, Clone, Default)]
pub struct CoalescedConfig {
    layers: Vec<ConfigMap>,
}

impl CoalescedConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a layer with higher precedence than all layers added before it.
    pub fn append(mut self, layer: ConfigMap) -> Self {
        self.layers.push(layer);
        self
    }

    /// Flattens the layered view into a single mapping.
    pub fn coalesce(&self) -> ConfigMap {
        let mut merged = ConfigMap::new();
        for layer in &self.layers {
            for (k, v) in layer {
                merged.insert(k.clone(), v.clone());
            }
        }
        merged
    }

    /// Flattens the layers and deserializes the result into the target type
    /// a builder or runner mandates.
    pub fn coalesce_into<T: DeserializeOwned>(&self) -> ConfigResult<T> {
        let merged = self.coalesce();
        serde_json::from_value(Value::Object(merged.into_iter().collect()))
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))
    }
}
