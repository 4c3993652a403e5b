use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Run configuration for a group (or global run defaults).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Run {
    /// Build artifact to use for this run. Empty means the group needs a
    /// build before it can run.
    pub artifact: String,

    /// Test parameters passed down to instances of this group.
    pub test_params: BTreeMap<String, String>,

    /// Profiles to capture and the frequency of capture of each, as a
    /// duration expression (e.g. `5s`). The special kind `cpu` takes no
    /// frequency and profiles the entire run.
    pub profiles: BTreeMap<String, String>,
}

/// Merges `from` into `into`, keeping entries already present in `into`.
pub(crate) fn trickle_map(from: &BTreeMap<String, String>, into: &mut BTreeMap<String, String>) {
    for (k, v) in from {
        into.entry(k.clone()).or_insert_with(|| v.clone());
    }
}
