//! End-to-end walk over the build plan.
//!
//! For every image in dependency order and every stage in fixed order the
//! conveyor chains `signature = sha256(deps, previous signature)`, reuses a
//! stored layer when one carries that signature, and otherwise prepares and
//! commits a new layer. Empty stages are skipped without touching the chain.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, Instrument};
use uuid::Uuid;

use crate::backend::ImageBackend;
use crate::config::Dappfile;
use crate::digest::sha256_hash;
use crate::error::{DimgError, Result};
use crate::git::url::slug;
use crate::image::{BuiltImage, ImageSpec, SIGNATURE_LABEL};
use crate::initialization::{DimgPlan, InitializationPhase};
use crate::lock::BuildLock;
use crate::obs;
use crate::stage::{base_layer, BuildContext, DimgResult, StageName};

/// Bucket size applied to accumulated patch bytes in `gitPostSetupPatch`.
pub const DEFAULT_PATCH_SIZE_STEP: u64 = 1024 * 1024;

/// Tool-level settings of one conveyor run.
#[derive(Debug, Clone)]
pub struct ConveyorOptions {
    pub project_name: String,
    pub project_dir: PathBuf,
    /// Persistent cache: remote clones, `build_dir` mounts and the lock.
    pub build_dir: PathBuf,
    /// Parent of the per-run temp root; the system temp dir when unset.
    pub tmp_dir: Option<PathBuf>,
    /// Images to build; empty means all shippable images.
    pub dimg_names: Vec<String>,
    pub patch_size_step: u64,
}

impl ConveyorOptions {
    /// Defaults for a project rooted at `project_dir`: the project name is
    /// the directory name and the build dir is `<project_dir>/.dimg_build`.
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        let project_dir = project_dir.into();
        let project_name = project_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "dimg".to_string());
        Self {
            project_name,
            build_dir: project_dir.join(".dimg_build"),
            project_dir,
            tmp_dir: None,
            dimg_names: Vec::new(),
            patch_size_step: DEFAULT_PATCH_SIZE_STEP,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// A stored layer already carried the signature.
    Cached,
    Built,
    /// Empty stage; not part of the signature chain.
    Skipped,
    /// Would be built (plan only).
    Pending,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: StageName,
    pub signature: Option<String>,
    pub status: StageStatus,
    pub image: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimgReport {
    pub name: String,
    pub is_artifact: bool,
    /// Signature of the last non-empty stage.
    pub signature: String,
    pub image: String,
    pub stages: Vec<StageReport>,
}

impl DimgReport {
    pub fn stage(&self, name: StageName) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == name)
    }

    pub fn signature_of(&self, name: StageName) -> Option<&str> {
        self.stage(name).and_then(|s| s.signature.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildReport {
    pub run_id: Uuid,
    pub dimgs: Vec<DimgReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BuildReport {
    /// Report of a shippable image by name.
    pub fn dimg(&self, name: &str) -> Option<&DimgReport> {
        self.dimgs.iter().find(|d| !d.is_artifact && d.name == name)
    }

    pub fn artifact(&self, name: &str) -> Option<&DimgReport> {
        self.dimgs.iter().find(|d| d.is_artifact && d.name == name)
    }

    pub fn count(&self, status: StageStatus) -> usize {
        self.dimgs
            .iter()
            .flat_map(|d| d.stages.iter())
            .filter(|s| s.status == status)
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Build,
    Plan,
}

pub struct Conveyor {
    dappfile: Dappfile,
    options: ConveyorOptions,
    backend: Arc<dyn ImageBackend>,
}

impl Conveyor {
    pub fn new(dappfile: Dappfile, options: ConveyorOptions, backend: Arc<dyn ImageBackend>) -> Self {
        Self {
            dappfile,
            options,
            backend,
        }
    }

    pub fn options(&self) -> &ConveyorOptions {
        &self.options
    }

    /// Build every missing layer of the selected images.
    pub async fn build(&self) -> Result<BuildReport> {
        self.run(Mode::Build).await
    }

    /// Compute signatures and cache status without committing anything.
    /// Layers that would be built are projected so later signatures match
    /// what `build` would produce.
    pub async fn plan(&self) -> Result<BuildReport> {
        self.run(Mode::Plan).await
    }

    async fn run(&self, mode: Mode) -> Result<BuildReport> {
        let run_id = Uuid::new_v4();
        let span = obs::build_span(&run_id.to_string());
        self.run_locked(run_id, mode).instrument(span).await
    }

    async fn run_locked(&self, run_id: Uuid, mode: Mode) -> Result<BuildReport> {
        let started_at = Utc::now();
        let clock = Instant::now();

        if self.options.patch_size_step == 0 {
            return Err(DimgError::Configuration(
                "patch size step must be greater than zero".to_string(),
            ));
        }

        let build_dir = self.options.build_dir.clone();
        let _lock = tokio::task::spawn_blocking(move || BuildLock::acquire(&build_dir))
            .await
            .map_err(|e| DimgError::InternalInvariant(format!("build lock task failed: {e}")))??;

        let plans = InitializationPhase::new(
            &self.dappfile,
            &self.options.project_dir,
            &self.options.build_dir,
            &self.options.dimg_names,
        )
        .run()?;
        obs::emit_build_started(&run_id.to_string(), plans.len());

        let tmp_root = self.tmp_root()?;
        let mut results: HashMap<String, DimgResult> = HashMap::new();
        let mut dimgs = Vec::with_capacity(plans.len());
        for plan in &plans {
            let span = obs::dimg_span(&plan.name, plan.is_artifact);
            let (report, image) = self
                .walk_dimg(plan, tmp_root.path(), &results, mode)
                .instrument(span)
                .await?;
            results.insert(
                plan.key(),
                DimgResult {
                    signature: report.signature.clone(),
                    image,
                },
            );
            dimgs.push(report);
        }

        let report = BuildReport {
            run_id,
            dimgs,
            started_at,
            finished_at: Utc::now(),
        };
        obs::emit_build_finished(
            &run_id.to_string(),
            clock.elapsed().as_millis() as u64,
            report.count(StageStatus::Built),
            report.count(StageStatus::Cached),
        );
        Ok(report)
    }

    fn tmp_root(&self) -> Result<tempfile::TempDir> {
        let builder = {
            let mut b = tempfile::Builder::new();
            b.prefix("dimg-");
            b
        };
        match &self.options.tmp_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                Ok(builder.tempdir_in(dir)?)
            }
            None => Ok(builder.tempdir()?),
        }
    }

    async fn walk_dimg(
        &self,
        plan: &DimgPlan,
        tmp_root: &Path,
        results: &HashMap<String, DimgResult>,
        mode: Mode,
    ) -> Result<(DimgReport, BuiltImage)> {
        let kind = if plan.is_artifact { "artifact" } else { "dimg" };
        let work_dir = tmp_root.join(format!("{kind}-{}", slug(&plan.name)));
        let ctx = BuildContext::new(
            plan.name.clone(),
            &self.options.build_dir,
            work_dir,
            self.options.patch_size_step,
            results,
        );

        let mut prev = base_layer(&plan.from, &ctx)?;
        let mut prev_signature = String::new();
        let mut stages = Vec::with_capacity(plan.stages.len());

        for stage in &plan.stages {
            let started_at = Utc::now();
            let clock = Instant::now();
            let name = stage.name();

            if stage.is_empty(&ctx, &prev)? {
                obs::emit_stage_skipped(&plan.name, name);
                stages.push(StageReport {
                    stage: name,
                    signature: None,
                    status: StageStatus::Skipped,
                    image: None,
                    started_at,
                    finished_at: Utc::now(),
                });
                continue;
            }

            let deps = stage.get_dependencies(&ctx, &prev)?;
            let signature = sha256_hash(&[deps.as_str(), prev_signature.as_str()]);
            debug!(stage = %name, signature = %signature, "computed stage signature");

            let (image, status) = match self.backend.lookup(&signature).await? {
                Some(image) => {
                    obs::emit_stage_cached(&plan.name, name, &signature);
                    (image, StageStatus::Cached)
                }
                None => {
                    let mut spec = ImageSpec::new();
                    stage.prepare_image(&ctx, &prev, &mut spec)?;
                    spec.add_label(SIGNATURE_LABEL, signature.clone());
                    match mode {
                        Mode::Plan => {
                            let projected = prev.child(self.backend.image_name(&signature), &spec);
                            (projected, StageStatus::Pending)
                        }
                        Mode::Build => {
                            let image = self.backend.commit(&prev, &spec, &signature).await?;
                            obs::emit_stage_built(
                                &plan.name,
                                name,
                                &signature,
                                clock.elapsed().as_millis() as u64,
                            );
                            (image, StageStatus::Built)
                        }
                    }
                }
            };

            stages.push(StageReport {
                stage: name,
                signature: Some(signature.clone()),
                status,
                image: Some(image.name.clone()),
                started_at,
                finished_at: Utc::now(),
            });
            prev = image;
            prev_signature = signature;
        }

        info!(dimg = %plan.name, image = %prev.name, "image ready");
        Ok((
            DimgReport {
                name: plan.name.clone(),
                is_artifact: plan.is_artifact,
                signature: prev_signature,
                image: prev.name.clone(),
                stages,
            },
            prev,
        ))
    }
}
