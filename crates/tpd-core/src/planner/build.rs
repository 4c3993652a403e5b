use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use tpd_config::CoalescedConfig;
use tpd_model::{BuildRequest, UnpackedSources};

use crate::error::{EngineError, EngineResult};
use crate::output::OutputWriter;
use crate::plugin::{BuildInput, BuildOutput, DependencyTarget};
use crate::supervisor::Engine;

impl Engine {
    /// Executes the builds a composition calls for.
    ///
    /// Groups are deduplicated by build key; one build fiber runs per unique
    /// key, all joined through a fail-fast barrier that cancels the
    /// remaining fibers on the first error. The returned slice has one entry
    /// per original group, in composition order.
    pub(crate) async fn do_build(
        &self,
        cancel: &CancellationToken,
        input: &BuildRequest,
        ow: &Arc<OutputWriter>,
    ) -> EngineResult<Vec<BuildOutput>> {
        let comp = input.composition.prepare_for_build(&input.manifest)?;
        comp.validate_for_build()?;

        let plan = comp.global.plan.clone();
        let builder_id = comp.global.builder.clone();

        let builder = self
            .registry()
            .builder(&builder_id)
            .ok_or_else(|| EngineError::UnknownBuilder(builder_id.clone()))?;

        if let Some(hc) = builder.healthchecker() {
            self.run_healthcheck(hc, cancel, ow, "builder").await?;
        }

        // Precedence, lowest to highest: builder defaults (applied by the
        // builder itself), env config for this builder, composition global
        // build config.
        let cfg = CoalescedConfig::new()
            .append(
                self.env()
                    .builders
                    .get(&builder_id)
                    .cloned()
                    .unwrap_or_default(),
            )
            .append(comp.global.build_config.clone());
        let config = builder.decode_config(cfg.coalesce())?;

        // Partition group positions by build key; two groups share a build
        // iff their keys match.
        let mut uniq: Vec<(String, Vec<usize>)> = Vec::new();
        for (idx, g) in comp.groups.iter().enumerate() {
            let key = g.build_key();
            match uniq.iter_mut().find(|(k, _)| *k == key) {
                Some((_, idxs)) => idxs.push(idx),
                None => uniq.push((key, vec![idx])),
            }
        }

        let sources = duplicate_sources(&input.sources, uniq.len(), cancel).await?;

        let child = cancel.child_token();
        let mut fibers: JoinSet<EngineResult<(Vec<usize>, BuildOutput)>> = JoinSet::new();

        for ((_, idxs), src) in uniq.into_iter().zip(sources) {
            // All groups in a class are identical for the sake of building;
            // the first one is the representative.
            let grp = comp.groups[idxs[0]].clone();
            let group_ids: Vec<String> =
                idxs.iter().map(|&i| comp.groups[i].id.clone()).collect();

            let dependencies: BTreeMap<String, DependencyTarget> = grp
                .build
                .dependencies
                .iter()
                .map(|d| {
                    (
                        d.module.clone(),
                        DependencyTarget {
                            target: d.target.clone(),
                            version: d.version.clone(),
                        },
                    )
                })
                .collect();

            let build_input = BuildInput {
                build_id: short_build_id(),
                env: self.env().clone(),
                test_plan: plan.clone(),
                selectors: grp.build.selectors.clone(),
                dependencies,
                build_config: Arc::clone(&config),
                sources: src,
            };

            let builder = Arc::clone(&builder);
            let cancel = child.clone();
            let ow = Arc::clone(ow);
            let plan = plan.clone();
            fibers.spawn(async move {
                ow.info(format!(
                    "performing build for groups {group_ids:?}; plan {plan}; builder {}",
                    builder.id()
                ));

                let mut out = match builder.build(&cancel, &build_input, &ow).await {
                    Ok(out) => out,
                    Err(e) => {
                        ow.info(format!("build failed for groups {group_ids:?}: {e}"));
                        return Err(e);
                    }
                };
                out.builder_id = builder.id().to_string();

                ow.info(format!(
                    "build succeeded for groups {group_ids:?}; artifact {}",
                    out.artifact_path
                ));
                Ok((idxs, out))
            });
        }

        // Writes to the output slice are disjoint by index across classes,
        // so results are placed as fibers finish. The first error cancels
        // the siblings and wins.
        let mut outputs: Vec<Option<BuildOutput>> = vec![None; comp.groups.len()];
        let mut first_err: Option<EngineError> = None;
        while let Some(joined) = fibers.join_next().await {
            match joined {
                Ok(Ok((idxs, out))) => {
                    for idx in idxs {
                        outputs[idx] = Some(out.clone());
                    }
                }
                Ok(Err(e)) => {
                    child.cancel();
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
                Err(e) => {
                    child.cancel();
                    if first_err.is_none() {
                        first_err = Some(EngineError::Internal(format!("build fiber failed: {e}")));
                    }
                }
            }
        }
        if let Some(e) = first_err {
            return Err(e);
        }

        outputs
            .into_iter()
            .map(|o| o.ok_or_else(|| EngineError::Internal("missing build output for group".into())))
            .collect()
    }
}

/// Short opaque id for a single build job.
fn short_build_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[id.len() - 12..].to_string()
}

/// Provides each unique build with a source tree it can mutate freely.
///
/// With a single unique build the original tree is reused as-is. Otherwise
/// the tree is copied once per build, suffixing the base directory with the
/// build ordinal and re-pointing the inner directories.
async fn duplicate_sources(
    sources: &UnpackedSources,
    count: usize,
    cancel: &CancellationToken,
) -> EngineResult<Vec<UnpackedSources>> {
    if count <= 1 {
        return Ok(vec![sources.clone()]);
    }

    let base = sources.base_dir.to_string_lossy();
    let base = base.trim_end_matches('/').to_string();

    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let dst = PathBuf::from(format!("{base}-{i}"));
        copy_tree(sources.base_dir.clone(), dst.clone(), cancel.clone())
            .await
            .map_err(|e| match e {
                EngineError::Canceled => EngineError::Canceled,
                other => EngineError::Io(format!(
                    "failed to create unique source directories for multiple build jobs: {other}"
                )),
            })?;
        out.push(repoint(sources, &dst));
    }
    Ok(out)
}

fn repoint(sources: &UnpackedSources, dst: &Path) -> UnpackedSources {
    let rebase = |p: &Path| dst.join(p.file_name().unwrap_or_default());
    UnpackedSources {
        base_dir: dst.to_path_buf(),
        plan_dir: rebase(&sources.plan_dir),
        sdk_dir: sources.sdk_dir.as_deref().map(rebase),
        extra_dir: sources.extra_dir.as_deref().map(rebase),
    }
}

async fn copy_tree(src: PathBuf, dst: PathBuf, cancel: CancellationToken) -> EngineResult<()> {
    tokio::task::spawn_blocking(move || -> EngineResult<()> {
        for entry in WalkDir::new(&src) {
            if cancel.is_cancelled() {
                return Err(EngineError::Canceled);
            }
            let entry = entry.map_err(|e| EngineError::Io(e.to_string()))?;
            let rel = entry
                .path()
                .strip_prefix(&src)
                .map_err(|e| EngineError::Internal(e.to_string()))?;
            let target = dst.join(rel);
            if entry.file_type().is_dir() {
                std::fs::create_dir_all(&target)?;
            } else {
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::copy(entry.path(), &target)?;
            }
        }
        Ok(())
    })
    .await
    .map_err(|e| EngineError::Internal(format!("source copy task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use tpd_model::BuildRequest;

    use crate::error::EngineError;
    use crate::output::OutputWriter;
    use crate::testutil::{
        composition, group, mock_manifest, mock_registry, sources_in, test_engine, MockBuilder,
        MockRunner,
    };

    fn sink(dir: &std::path::Path) -> Arc<OutputWriter> {
        Arc::new(OutputWriter::create(dir, "test").expect("sink"))
    }

    #[tokio::test]
    async fn fan_out_builds_once_per_unique_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let builder = Arc::new(MockBuilder::default());
        let runner = Arc::new(MockRunner::default());
        let engine = test_engine(dir.path(), mock_registry(builder.clone(), runner));

        // Four groups, two equivalence classes: {a, c} and {b, d}.
        let request = BuildRequest {
            composition: composition(vec![
                group("a", 1, &["net"], ""),
                group("b", 1, &["storage"], ""),
                group("c", 1, &["net"], ""),
                group("d", 1, &["storage"], ""),
            ]),
            manifest: mock_manifest(),
            sources: sources_in(dir.path()),
        };

        let cancel = CancellationToken::new();
        let ow = sink(dir.path());
        let outputs = engine
            .do_build(&cancel, &request, &ow)
            .await
            .expect("build");

        assert_eq!(builder.builds(), 2);
        assert_eq!(outputs.len(), 4);

        // Same artifact within a class, different across classes, and every
        // output is stamped with the builder id.
        assert_eq!(outputs[0].artifact_path, outputs[2].artifact_path);
        assert_eq!(outputs[1].artifact_path, outputs[3].artifact_path);
        assert_ne!(outputs[0].artifact_path, outputs[1].artifact_path);
        assert!(outputs.iter().all(|o| o.builder_id == "mock:builder"));
    }

    #[tokio::test]
    async fn sources_are_duplicated_per_unique_build() {
        let dir = tempfile::tempdir().expect("tempdir");
        let builder = Arc::new(MockBuilder::default());
        let runner = Arc::new(MockRunner::default());
        let engine = test_engine(dir.path(), mock_registry(builder, runner));

        let sources = sources_in(dir.path());
        let request = BuildRequest {
            composition: composition(vec![
                group("a", 1, &["net"], ""),
                group("b", 1, &["storage"], ""),
            ]),
            manifest: mock_manifest(),
            sources: sources.clone(),
        };

        let cancel = CancellationToken::new();
        let ow = sink(dir.path());
        engine
            .do_build(&cancel, &request, &ow)
            .await
            .expect("build");

        for i in 0..2 {
            let copy = format!("{}-{i}", sources.base_dir.display());
            let copied_file = std::path::Path::new(&copy).join("plan").join("main.sh");
            assert!(
                copied_file.exists(),
                "expected duplicated source file at {}",
                copied_file.display()
            );
        }
    }

    #[tokio::test]
    async fn single_unique_build_reuses_the_original_tree() {
        let dir = tempfile::tempdir().expect("tempdir");
        let builder = Arc::new(MockBuilder::default());
        let runner = Arc::new(MockRunner::default());
        let engine = test_engine(dir.path(), mock_registry(builder.clone(), runner));

        let sources = sources_in(dir.path());
        let request = BuildRequest {
            composition: composition(vec![group("a", 1, &[], ""), group("b", 1, &[], "")]),
            manifest: mock_manifest(),
            sources: sources.clone(),
        };

        let cancel = CancellationToken::new();
        let ow = sink(dir.path());
        let outputs = engine
            .do_build(&cancel, &request, &ow)
            .await
            .expect("build");

        assert_eq!(builder.builds(), 1);
        assert_eq!(outputs[0].artifact_path, outputs[1].artifact_path);

        let copy = format!("{}-0", sources.base_dir.display());
        assert!(!std::path::Path::new(&copy).exists());
    }

    #[tokio::test]
    async fn first_failure_cancels_sibling_builds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let builder = Arc::new(MockBuilder::default());
        let runner = Arc::new(MockRunner::default());
        let engine = test_engine(dir.path(), mock_registry(builder, runner));

        // One class fails immediately; the other parks until it observes
        // cancellation from the barrier.
        let request = BuildRequest {
            composition: composition(vec![
                group("failing", 1, &["fail"], ""),
                group("parked", 1, &["park"], ""),
            ]),
            manifest: mock_manifest(),
            sources: sources_in(dir.path()),
        };

        let cancel = CancellationToken::new();
        let ow = sink(dir.path());
        let err = engine
            .do_build(&cancel, &request, &ow)
            .await
            .expect_err("build must fail");

        assert!(matches!(err, EngineError::BuilderFailed { .. }), "got {err}");
    }

    #[tokio::test]
    async fn unknown_builder_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let builder = Arc::new(MockBuilder::default());
        let runner = Arc::new(MockRunner::default());
        let engine = test_engine(dir.path(), mock_registry(builder, runner));

        let mut comp = composition(vec![group("a", 1, &[], "")]);
        comp.global.builder = "mock:unregistered".into();
        let mut manifest = mock_manifest();
        manifest
            .builders
            .insert("mock:unregistered".into(), Default::default());

        let request = BuildRequest {
            composition: comp,
            manifest,
            sources: sources_in(dir.path()),
        };

        let cancel = CancellationToken::new();
        let ow = sink(dir.path());
        let err = engine
            .do_build(&cancel, &request, &ow)
            .await
            .expect_err("unknown builder");
        assert!(matches!(err, EngineError::UnknownBuilder(_)));
    }

    #[tokio::test]
    async fn ill_typed_build_config_is_rejected_before_fan_out() {
        let dir = tempfile::tempdir().expect("tempdir");
        let builder = Arc::new(MockBuilder::default());
        let runner = Arc::new(MockRunner::default());
        let engine = test_engine(dir.path(), mock_registry(builder.clone(), runner));

        let mut comp = composition(vec![group("a", 1, &[], "")]);
        comp.global
            .build_config
            .insert("image".into(), serde_json::json!(42));

        let request = BuildRequest {
            composition: comp,
            manifest: mock_manifest(),
            sources: sources_in(dir.path()),
        };

        let cancel = CancellationToken::new();
        let ow = sink(dir.path());
        let err = engine
            .do_build(&cancel, &request, &ow)
            .await
            .expect_err("invalid config");
        assert!(matches!(
            err,
            EngineError::Config(tpd_config::ConfigError::InvalidConfig(_))
        ));
        assert_eq!(builder.builds(), 0);
    }
}
