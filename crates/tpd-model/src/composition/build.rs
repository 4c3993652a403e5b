use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Build configuration for a group (or global build defaults).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Build {
    /// Source selection strings sent to the builder. For shell builders this
    /// field maps to build tags / feature switches.
    pub selectors: Vec<String>,

    /// Upstream dependency overrides to apply to this build.
    pub dependencies: Vec<Dependency>,
}

/// An upstream dependency override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    /// Module name/path of the import to be overridden.
    pub module: String,

    /// Override module, when the replacement lives at a different path.
    #[serde(default)]
    pub target: String,

    /// Override version.
    pub version: String,
}

impl Build {
    /// Returns a composite key that identifies this build, suitable for
    /// deduplication.
    ///
    /// Selectors and dependencies are canonicalised by sorting, so their
    /// input order does not affect the key. The `target` field of a
    /// dependency is not part of the key: two groups differing only in
    /// `target` share a build slot. Known limitation, kept for
    /// compatibility with persisted keys.
    pub fn build_key(&self) -> String {
        let mut selectors = self.selectors.clone();
        selectors.sort_unstable();

        let mut dependencies = self.dependencies.clone();
        dependencies.sort_by(|a, b| a.module.cmp(&b.module));

        let mut key = format!("selectors={};", selectors.join(","));
        key.push_str("dependencies=");
        for d in &dependencies {
            key.push_str(&d.module);
            key.push(':');
            key.push_str(&d.version);
            key.push('|');
        }
        key
    }
}

/// Merges dependency defaults into a group's own list, only for modules the
/// group does not override itself. Group entries keep their position; fills
/// are appended.
pub(crate) fn merge_dependencies(own: &[Dependency], defaults: &[Dependency]) -> Vec<Dependency> {
    if own.is_empty() {
        return defaults.to_vec();
    }

    let present: BTreeSet<&str> = own.iter().map(|d| d.module.as_str()).collect();

    let mut ret = own.to_vec();
    for def in defaults {
        if !present.contains(def.module.as_str()) {
            ret.push(Dependency {
                module: def.module.clone(),
                target: String::new(),
                version: def.version.clone(),
            });
        }
    }
    ret
}
