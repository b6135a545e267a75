//! Stage pipeline units.
//!
//! Each image is built as a fixed sequence of stages. A stage contributes
//! dependency material to the signature chain and, when its layer has to be
//! built, fills in an [`ImageSpec`]. Stages never execute anything.

pub mod artifact_import;
pub mod docker_instructions;
pub mod from;
pub mod git_archive;
pub mod git_patch;
pub mod user;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{Mount, MountSource};
use crate::error::{DimgError, Result};
use crate::git::url::slug;
use crate::git_artifact::GitArtifact;
use crate::image::{BuiltImage, ImageSpec};

pub use artifact_import::ArtifactImportStage;
pub use docker_instructions::DockerInstructionsStage;
pub use from::{base_layer, FromStage};
pub use git_archive::GitArchiveStage;
pub use git_patch::{GitLatestPatchStage, GitPostSetupPatchStage};
pub use user::{UserStage, UserWithGitPatchStage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StageName {
    From,
    BeforeInstall,
    BeforeInstallArtifactImport,
    GitArchive,
    Install,
    AfterInstallArtifactImport,
    BeforeSetup,
    BeforeSetupArtifactImport,
    Setup,
    AfterSetupArtifactImport,
    GitPostSetupPatch,
    GitLatestPatch,
    DockerInstructions,
}

impl StageName {
    /// Build order of a shippable image.
    pub const ALL: [StageName; 13] = [
        StageName::From,
        StageName::BeforeInstall,
        StageName::BeforeInstallArtifactImport,
        StageName::GitArchive,
        StageName::Install,
        StageName::AfterInstallArtifactImport,
        StageName::BeforeSetup,
        StageName::BeforeSetupArtifactImport,
        StageName::Setup,
        StageName::AfterSetupArtifactImport,
        StageName::GitPostSetupPatch,
        StageName::GitLatestPatch,
        StageName::DockerInstructions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::From => "from",
            StageName::BeforeInstall => "beforeInstall",
            StageName::BeforeInstallArtifactImport => "beforeInstallArtifactImport",
            StageName::GitArchive => "gitArchive",
            StageName::Install => "install",
            StageName::AfterInstallArtifactImport => "afterInstallArtifactImport",
            StageName::BeforeSetup => "beforeSetup",
            StageName::BeforeSetupArtifactImport => "beforeSetupArtifactImport",
            StageName::Setup => "setup",
            StageName::AfterSetupArtifactImport => "afterSetupArtifactImport",
            StageName::GitPostSetupPatch => "gitPostSetupPatch",
            StageName::GitLatestPatch => "gitLatestPatch",
            StageName::DockerInstructions => "dockerInstructions",
        }
    }

    /// Stages an artifact image never has.
    pub fn is_shippable_only(&self) -> bool {
        matches!(
            self,
            StageName::GitPostSetupPatch | StageName::GitLatestPatch | StageName::DockerInstructions
        )
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stages driven by a [`crate::builder::Builder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserStageName {
    BeforeInstall,
    Install,
    BeforeSetup,
    Setup,
}

impl UserStageName {
    pub fn stage_name(&self) -> StageName {
        match self {
            UserStageName::BeforeInstall => StageName::BeforeInstall,
            UserStageName::Install => StageName::Install,
            UserStageName::BeforeSetup => StageName::BeforeSetup,
            UserStageName::Setup => StageName::Setup,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.stage_name().as_str()
    }
}

/// Final signature and layer of an image already walked in this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimgResult {
    pub signature: String,
    pub image: BuiltImage,
}

/// Key under which image results are recorded.
pub fn result_key(is_artifact: bool, name: &str) -> String {
    if is_artifact {
        format!("artifact/{name}")
    } else {
        format!("dimg/{name}")
    }
}

/// Everything a stage may read while computing dependencies or preparing
/// its layer.
#[derive(Debug)]
pub struct BuildContext<'a> {
    dimg: String,
    build_dir: &'a Path,
    work_dir: PathBuf,
    patch_size_step: u64,
    results: &'a HashMap<String, DimgResult>,
}

impl<'a> BuildContext<'a> {
    /// `work_dir` is this image's scratch directory; it is created on first
    /// use.
    pub fn new(
        dimg: impl Into<String>,
        build_dir: &'a Path,
        work_dir: PathBuf,
        patch_size_step: u64,
        results: &'a HashMap<String, DimgResult>,
    ) -> Self {
        Self {
            dimg: dimg.into(),
            build_dir,
            work_dir,
            patch_size_step,
            results,
        }
    }

    pub fn dimg(&self) -> &str {
        &self.dimg
    }

    pub fn build_dir(&self) -> &Path {
        self.build_dir
    }

    pub fn work_dir(&self) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.work_dir)?;
        Ok(self.work_dir.clone())
    }

    pub fn patch_size_step(&self) -> u64 {
        self.patch_size_step
    }

    /// Result of an image that must already have been walked.
    pub fn result(&self, is_artifact: bool, name: &str) -> Result<&DimgResult> {
        let key = result_key(is_artifact, name);
        self.results.get(&key).ok_or_else(|| {
            DimgError::InternalInvariant(format!(
                "image '{}' needs {key}, which was not built before it",
                self.dimg
            ))
        })
    }
}

/// State every stage carries: the image's mounts and bound git artifacts.
#[derive(Debug, Clone, Default)]
pub struct BaseStage {
    mounts: Vec<Mount>,
    git_artifacts: Vec<Arc<GitArtifact>>,
}

impl BaseStage {
    pub fn new(mounts: Vec<Mount>) -> Self {
        Self {
            mounts,
            git_artifacts: Vec::new(),
        }
    }

    pub fn mounts(&self) -> &[Mount] {
        &self.mounts
    }

    pub fn git_artifacts(&self) -> &[Arc<GitArtifact>] {
        &self.git_artifacts
    }

    fn prepare_mounts(&self, ctx: &BuildContext<'_>, spec: &mut ImageSpec) -> Result<()> {
        for mount in &self.mounts {
            let host = match &mount.from {
                MountSource::TmpDir => ctx.work_dir()?.join("mount").join(slug(&mount.to)),
                MountSource::BuildDir => ctx.build_dir().join("mount").join(slug(&mount.to)),
                MountSource::Path(path) => path.clone(),
            };
            if !matches!(mount.from, MountSource::Path(_)) {
                std::fs::create_dir_all(&host)?;
            }
            spec.add_volume(host, mount.to.clone(), false);
        }
        Ok(())
    }
}

pub trait Stage: Send + Sync + fmt::Debug {
    fn name(&self) -> StageName;

    fn base(&self) -> &BaseStage;

    fn base_mut(&mut self) -> &mut BaseStage;

    /// Empty stages are skipped and do not extend the signature chain.
    fn is_empty(&self, _ctx: &BuildContext<'_>, _prev: &BuiltImage) -> Result<bool> {
        Ok(false)
    }

    /// Material folded into this stage's signature. Must be a pure function
    /// of configuration, git state and `prev`.
    fn get_dependencies(&self, ctx: &BuildContext<'_>, prev: &BuiltImage) -> Result<String>;

    /// Describe this stage's layer on top of `prev`.
    fn prepare_image(&self, ctx: &BuildContext<'_>, _prev: &BuiltImage, spec: &mut ImageSpec) -> Result<()> {
        self.base().prepare_mounts(ctx, spec)
    }

    fn set_git_artifacts(&mut self, artifacts: Vec<Arc<GitArtifact>>) {
        self.base_mut().git_artifacts = artifacts;
    }

    fn git_artifacts(&self) -> &[Arc<GitArtifact>] {
        self.base().git_artifacts()
    }
}
