//! The declarative composition document submitted with every build or run
//! job: global settings, instance groups, validation and the preparation
//! passes that fold manifest and global defaults down into each group.

mod build;
mod group;
mod run;

pub use build::{Build, Dependency};
pub use group::{Group, Instances, Resources};
pub use run::Run;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tpd_config::ConfigMap;

use crate::error::{ModelError, ModelResult};
use crate::manifest::TestPlanManifest;
use build::merge_dependencies;
use run::trickle_map;

/// A user-submitted test job: metadata, global parameters and the groups of
/// instances that participate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Composition {
    /// Optional metadata about this composition.
    pub metadata: Metadata,

    /// General parameters for this composition.
    pub global: Global,

    /// The instance groups that participate in this composition.
    pub groups: Vec<Group>,
}

/// Optional metadata about a composition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub name: String,
    pub author: String,
}

/// Global parameters of a composition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Global {
    /// The test plan to run.
    pub plan: String,

    /// The test case to run. Required for runs, ignored for builds.
    pub case: String,

    /// Total number of instances participating in this composition; the sum
    /// of all instances in all groups.
    pub total_instances: u64,

    /// The builder to use.
    pub builder: String,

    /// Build configuration for this job, coalesced over the environment
    /// configuration for the builder.
    pub build_config: ConfigMap,

    /// Global build defaults that trickle down to all groups, such as
    /// selectors or dependencies. Groups can override these in their local
    /// build definition.
    pub build: Option<Build>,

    /// The runner to use. Required for runs, ignored for builds.
    pub runner: String,

    /// Run configuration for this job, coalesced over the environment
    /// configuration for the runner.
    pub run_config: ConfigMap,

    /// Global run defaults that trickle down to all groups, such as test
    /// parameters or build artifacts. Groups can override these in their
    /// local run definition.
    pub run: Option<Run>,

    /// Disables metrics batching for this job.
    pub disable_metrics: bool,
}

impl Composition {
    /// Validates that this composition is correct for a build. `case`,
    /// `total_instances` and `runner` may be absent.
    pub fn validate_for_build(&self) -> ModelResult<()> {
        self.validate_structure(false)
    }

    /// Validates that this composition is correct for a run, and computes
    /// each group's instance count. The sum of computed counts must equal
    /// `global.total_instances` exactly.
    pub fn validate_for_run(&mut self) -> ModelResult<()> {
        self.validate_structure(true)?;

        let total = self.global.total_instances;
        let mut cum = 0u64;
        for g in &mut self.groups {
            g.calculated_instance_count = g.instances.count;
            if g.calculated_instance_count == 0 {
                g.calculated_instance_count = (g.instances.percentage * total as f64).round() as u64;
            }
            cum += g.calculated_instance_count;
        }

        if total != cum {
            return Err(ModelError::InstanceCountMismatch {
                total,
                calculated: cum,
            });
        }
        Ok(())
    }

    fn validate_structure(&self, for_run: bool) -> ModelResult<()> {
        if self.global.plan.is_empty() {
            return Err(ModelError::MissingField("global.plan"));
        }
        if self.global.builder.is_empty() {
            return Err(ModelError::MissingField("global.builder"));
        }
        if for_run {
            if self.global.case.is_empty() {
                return Err(ModelError::MissingField("global.case"));
            }
            if self.global.runner.is_empty() {
                return Err(ModelError::MissingField("global.runner"));
            }
            if self.global.total_instances == 0 {
                return Err(ModelError::MissingField("global.total_instances"));
            }
        }
        if self.groups.is_empty() {
            return Err(ModelError::NoGroups);
        }

        let mut seen = std::collections::BTreeSet::new();
        for g in &self.groups {
            if !seen.insert(g.id.as_str()) {
                return Err(ModelError::DuplicateGroupId(g.id.clone()));
            }
            if !g.instances.is_valid() {
                return Err(ModelError::InvalidInstances {
                    group: g.id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Verifies that this composition is compatible with the provided
    /// manifest for the purposes of a build, and applies any
    /// manifest-mandated defaults for the builder configuration.
    ///
    /// The receiver is not modified; a prepared copy is returned.
    pub fn prepare_for_build(&self, manifest: &TestPlanManifest) -> ModelResult<Composition> {
        let mut c = self.clone();

        // The manifest is authoritative for the plan name; the submitted
        // value may be a client-local path.
        c.global.plan = manifest.name.clone();

        if manifest.builders.is_empty() {
            return Err(ModelError::NoBuildersSupported);
        }
        if !manifest.builders.contains_key(&c.global.builder) {
            return Err(ModelError::UnsupportedBuilder {
                builder: c.global.builder.clone(),
                supported: manifest.builders.keys().cloned().collect(),
            });
        }

        // Manifest-mandated build configuration fills gaps; the composition
        // wins on conflicting keys.
        if let Some(bcfg) = manifest.builders.get(&c.global.builder) {
            for (k, v) in bcfg {
                c.global
                    .build_config
                    .entry(k.clone())
                    .or_insert_with(|| v.clone());
            }
        }

        // Trickle global build defaults to groups, if any.
        if let Some(def) = c.global.build.clone() {
            for grp in &mut c.groups {
                grp.build.dependencies =
                    merge_dependencies(&grp.build.dependencies, &def.dependencies);
                if grp.build.selectors.is_empty() {
                    grp.build.selectors = def.selectors.clone();
                }
            }
        }

        // Trickle global build config to groups. Only root keys are merged;
        // nested values are adopted whole.
        if !c.global.build_config.is_empty() {
            let global_cfg = c.global.build_config.clone();
            for grp in &mut c.groups {
                for (k, v) in &global_cfg {
                    grp.build_config
                        .entry(k.clone())
                        .or_insert_with(|| v.clone());
                }
            }
        }

        Ok(c)
    }

    /// Verifies that this composition is compatible with the provided
    /// manifest for the purposes of a run, verifies the instance count is
    /// within the test case bounds, applies any manifest-mandated defaults
    /// for the runner configuration, and applies default run parameters.
    ///
    /// The receiver is not modified; a prepared copy is returned.
    pub fn prepare_for_run(&self, manifest: &TestPlanManifest) -> ModelResult<Composition> {
        let mut c = self.clone();

        c.global.plan = manifest.name.clone();

        let (_, tcase) = manifest.test_case_by_name(&c.global.case).ok_or_else(|| {
            ModelError::TestCaseNotFound {
                case: c.global.case.clone(),
                plan: manifest.name.clone(),
            }
        })?;

        if manifest.runners.is_empty() {
            return Err(ModelError::NoRunnersSupported);
        }
        if !manifest.runners.contains_key(&c.global.runner) {
            return Err(ModelError::UnsupportedRunner {
                runner: c.global.runner.clone(),
                supported: manifest.runners.keys().cloned().collect(),
            });
        }

        if let Some(rcfg) = manifest.runners.get(&c.global.runner) {
            for (k, v) in rcfg {
                c.global
                    .run_config
                    .entry(k.clone())
                    .or_insert_with(|| v.clone());
            }
        }

        let total = c.global.total_instances;
        if total < tcase.instances.minimum || total > tcase.instances.maximum {
            return Err(ModelError::InstanceCountOutOfRange {
                total,
                minimum: tcase.instances.minimum,
                maximum: tcase.instances.maximum,
                case: tcase.name.clone(),
            });
        }

        // Trickle global run defaults to groups, if any.
        if let Some(def) = c.global.run.clone() {
            for grp in &mut c.groups {
                // A global artifact applies to all groups that do not set
                // one explicitly.
                if grp.run.artifact.is_empty() {
                    grp.run.artifact = def.artifact.clone();
                }
                trickle_map(&def.test_params, &mut grp.run.test_params);
                trickle_map(&def.profiles, &mut grp.run.profiles);
            }
        }

        // Apply test case parameter defaults to every group that does not
        // set the parameter. String defaults pass through verbatim; other
        // JSON values are encoded as their textual form.
        let mut defaults = std::collections::BTreeMap::new();
        for (name, param) in &tcase.parameters {
            let text = match &param.default {
                Value::String(s) => s.clone(),
                v => serde_json::to_string(v).map_err(|e| ModelError::InvalidParameterDefault {
                    name: name.clone(),
                    reason: e.to_string(),
                })?,
            };
            defaults.insert(name.clone(), text);
        }
        for grp in &mut c.groups {
            trickle_map(&defaults, &mut grp.run.test_params);
        }

        Ok(c)
    }

    /// Clones this composition, retaining only the groups at the given
    /// indices, in the order given.
    pub fn pick_groups(&self, indices: &[usize]) -> ModelResult<Composition> {
        for &i in indices {
            if i >= self.groups.len() {
                return Err(ModelError::InvalidGroupIndex(i));
            }
        }

        let mut c = self.clone();
        c.groups = indices.iter().map(|&i| self.groups[i].clone()).collect();
        Ok(c)
    }
}
