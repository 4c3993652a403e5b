use serde::{Deserialize, Serialize};
use tpd_config::ConfigMap;

use crate::composition::{Build, Run};

/// A set of test instances sharing build and run configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Group {
    /// Unique ID of this group within the composition.
    pub id: String,

    /// Resources requested for each instance from the cluster runner.
    pub resources: Resources,

    /// Number of instances that belong to this group.
    pub instances: Instances,

    /// Build configuration overrides for this group.
    pub build_config: ConfigMap,

    /// Build settings for this group.
    pub build: Build,

    /// Run settings for this group.
    pub run: Run,

    #[serde(skip)]
    pub(crate) calculated_instance_count: u64,
}

impl Group {
    /// Actual number of instances in this group.
    ///
    /// `validate_for_run` must be called for this value to be available.
    pub fn calculated_instance_count(&self) -> u64 {
        self.calculated_instance_count
    }

    /// Deduplication key for this group's build.
    pub fn build_key(&self) -> String {
        self.build.build_key()
    }
}

/// Instance count specification: an exact count or a proportion of the
/// composition's total, mutually exclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Instances {
    /// Exact number of instances belonging to the group.
    pub count: u64,

    /// Number of instances as a proportion of the total instance count.
    pub percentage: f64,
}

impl Instances {
    /// True iff exactly one of count or percentage is set to a positive
    /// value.
    pub(crate) fn is_valid(&self) -> bool {
        (self.count == 0 || self.percentage == 0.0) && (self.count as f64 + self.percentage > 0.0)
    }
}

/// Per-instance resource request, expressed in the runner's units.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Resources {
    pub memory: String,
    pub cpu: String,
}
