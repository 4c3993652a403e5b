use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tpd_config::ConfigMap;

/// A test plan's self-description: the builders and runners it supports and
/// the test cases it exposes. Produced by the plan, consumed verbatim here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TestPlanManifest {
    /// Canonical name of the plan. Overrides whatever plan string the
    /// composition carries.
    pub name: String,

    /// Builders supported by this plan, each with default configuration
    /// applied when the composition leaves a key unset.
    pub builders: BTreeMap<String, ConfigMap>,

    /// Runners supported by this plan, keyed like `builders`.
    pub runners: BTreeMap<String, ConfigMap>,

    /// Test cases exposed by this plan.
    pub test_cases: Vec<TestCase>,
}

impl TestPlanManifest {
    /// Looks up a test case by name, returning its position and definition.
    pub fn test_case_by_name(&self, name: &str) -> Option<(usize, &TestCase)> {
        self.test_cases
            .iter()
            .enumerate()
            .find(|(_, tc)| tc.name == name)
    }
}

/// A single test case of a plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TestCase {
    pub name: String,

    /// Inclusive bounds on the total instance count a run may request.
    pub instances: InstanceConstraints,

    /// Parameters the case accepts, keyed by name.
    pub parameters: BTreeMap<String, Parameter>,
}

/// Inclusive range of allowed total instance counts.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConstraints {
    pub minimum: u64,
    pub maximum: u64,
}

/// Declaration of a test case parameter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Parameter {
    #[serde(rename = "type")]
    pub param_type: String,
    pub description: String,
    pub unit: String,

    /// Default value, in whatever JSON shape the plan declares. Strings are
    /// passed to instances verbatim; anything else is re-encoded as JSON
    /// text.
    pub default: Value,
}
