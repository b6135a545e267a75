//! Turns the resolved configuration into an ordered build plan.
//!
//! Requested images are expanded into their dependency trees and flattened
//! into one global order (dependencies first, each image once). For every
//! image the git artifacts are resolved and the fixed-order stage list is
//! built with those artifacts bound to every stage.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use tracing::{debug, warn};

use crate::builder::{self, Builder};
use crate::config::{ArtifactImport, BaseImage, Dappfile, DimgConfig};
use crate::error::{DimgError, Result};
use crate::git::{GitRepo, LocalGitRepo, RemoteRepoCache};
use crate::git_artifact::GitArtifact;
use crate::obs;
use crate::stage::{
    result_key, ArtifactImportStage, DockerInstructionsStage, FromStage, GitArchiveStage,
    GitLatestPatchStage, GitPostSetupPatchStage, Stage, StageName, UserStage, UserStageName,
    UserWithGitPatchStage,
};

/// One image of the build plan.
#[derive(Debug)]
pub struct DimgPlan {
    pub name: String,
    pub is_artifact: bool,
    pub from: BaseImage,
    pub stages: Vec<Box<dyn Stage>>,
    pub git_artifacts: Vec<Arc<GitArtifact>>,
}

impl DimgPlan {
    /// Key under which this image's result is recorded.
    pub fn key(&self) -> String {
        result_key(self.is_artifact, &self.name)
    }

    pub fn stage_names(&self) -> Vec<StageName> {
        self.stages.iter().map(|s| s.name()).collect()
    }
}

pub struct InitializationPhase<'a> {
    dappfile: &'a Dappfile,
    project_dir: &'a Path,
    build_dir: &'a Path,
    requested: &'a [String],
    remotes: RemoteRepoCache,
    own: OnceLock<Arc<LocalGitRepo>>,
}

impl<'a> InitializationPhase<'a> {
    pub fn new(
        dappfile: &'a Dappfile,
        project_dir: &'a Path,
        build_dir: &'a Path,
        requested: &'a [String],
    ) -> Self {
        Self {
            dappfile,
            project_dir,
            build_dir,
            requested,
            remotes: RemoteRepoCache::new(),
            own: OnceLock::new(),
        }
    }

    /// Build the plan for every selected image and its dependencies.
    pub fn run(&self) -> Result<Vec<DimgPlan>> {
        let mut seen = HashSet::new();
        let mut plans = Vec::new();
        for root in self.select_dimgs() {
            for config in self.dappfile.dimg_tree(root)? {
                if !seen.insert(config.dedup_key()?) {
                    continue;
                }
                plans.push(self.plan_dimg(config)?);
            }
        }
        Ok(plans)
    }

    fn select_dimgs(&self) -> Vec<DimgConfig<'a>> {
        if self.requested.is_empty() {
            return self.dappfile.dimgs.iter().map(DimgConfig::Dimg).collect();
        }
        let mut selected = Vec::new();
        for name in self.requested {
            match self.dappfile.dimg(name) {
                Some(dimg) => selected.push(DimgConfig::Dimg(dimg)),
                None => warn!(dimg = %name, "requested dimg is not defined, skipping"),
            }
        }
        selected
    }

    fn plan_dimg(&self, config: DimgConfig<'_>) -> Result<DimgPlan> {
        let git_artifacts = self.resolve_git_artifacts(config)?;
        let mut stages = build_stages(config)?;
        for stage in stages.iter_mut() {
            stage.set_git_artifacts(git_artifacts.clone());
        }
        debug!(
            dimg = %config.name(),
            stages = stages.len(),
            git_artifacts = git_artifacts.len(),
            "planned dimg"
        );

        Ok(DimgPlan {
            name: config.name().to_string(),
            is_artifact: config.is_artifact(),
            from: config.base().from.clone(),
            stages,
            git_artifacts,
        })
    }

    fn own_repo(&self) -> Result<Arc<LocalGitRepo>> {
        if let Some(repo) = self.own.get() {
            return Ok(Arc::clone(repo));
        }
        let repo = Arc::new(LocalGitRepo::open(self.project_dir)?);
        Ok(Arc::clone(self.own.get_or_init(|| repo)))
    }

    fn resolve_git_artifacts(&self, config: DimgConfig<'_>) -> Result<Vec<Arc<GitArtifact>>> {
        let git = &config.base().git;
        let mut candidates = Vec::new();

        for local in &git.local {
            let repo: Arc<dyn GitRepo> = self.own_repo()?;
            candidates.push(GitArtifact::local(repo, local));
        }
        for remote in &git.remote {
            let repo: Arc<dyn GitRepo> =
                self.remotes
                    .get_or_clone(&remote.name, &remote.url, self.build_dir)?;
            candidates.push(GitArtifact::remote(repo, remote));
        }

        let mut artifacts = Vec::new();
        for artifact in candidates {
            let commit = artifact.latest_commit()?;
            if artifact.is_empty()? {
                debug!(dimg = %config.name(), artifact = %artifact.name(), "git artifact matches no paths, dropping");
                continue;
            }
            obs::emit_git_commit_resolved(
                config.name(),
                artifact.name(),
                &artifact.repo().describe(),
                &commit,
            );
            artifacts.push(Arc::new(artifact));
        }
        Ok(artifacts)
    }
}

fn imports_for(imports: &[ArtifactImport], stage: StageName) -> Vec<ArtifactImport> {
    imports
        .iter()
        .filter(|i| i.stage() == Some(stage))
        .cloned()
        .collect()
}

/// Fixed-order stage list of one image. Stages with nothing declared are
/// left out.
fn build_stages(config: DimgConfig<'_>) -> Result<Vec<Box<dyn Stage>>> {
    let base = config.base();
    let mounts = base.mounts.clone();
    let has_git = !base.git.local.is_empty() || !base.git.remote.is_empty();
    let builder: Option<Arc<dyn Builder>> = base.builder.as_ref().map(builder::from_config);

    if let Some(import) = base.imports.iter().find(|i| i.stage().is_none()) {
        return Err(DimgError::Configuration(format!(
            "import of artifact '{}' into '{}' declares neither before nor after",
            import.artifact,
            config.name()
        )));
    }

    let mut stages: Vec<Box<dyn Stage>> = vec![Box::new(FromStage::new(
        base.from.clone(),
        base.from_cache_version.clone(),
        mounts.clone(),
    ))];

    let user = |stages: &mut Vec<Box<dyn Stage>>, name: UserStageName, with_git: bool| {
        if let Some(builder) = &builder {
            if builder.is_empty(name) {
                return;
            }
            let builder = Arc::clone(builder);
            if with_git {
                stages.push(Box::new(UserWithGitPatchStage::new(name, builder, mounts.clone())));
            } else {
                stages.push(Box::new(UserStage::new(name, builder, mounts.clone())));
            }
        }
    };
    let import = |stages: &mut Vec<Box<dyn Stage>>, name: StageName| {
        let imports = imports_for(&base.imports, name);
        if !imports.is_empty() {
            stages.push(Box::new(ArtifactImportStage::new(name, imports, mounts.clone())));
        }
    };

    user(&mut stages, UserStageName::BeforeInstall, false);
    import(&mut stages, StageName::BeforeInstallArtifactImport);
    if has_git {
        stages.push(Box::new(GitArchiveStage::new(mounts.clone())));
    }
    user(&mut stages, UserStageName::Install, true);
    import(&mut stages, StageName::AfterInstallArtifactImport);
    user(&mut stages, UserStageName::BeforeSetup, true);
    import(&mut stages, StageName::BeforeSetupArtifactImport);
    user(&mut stages, UserStageName::Setup, true);
    import(&mut stages, StageName::AfterSetupArtifactImport);

    if !config.is_artifact() {
        if has_git {
            stages.push(Box::new(GitPostSetupPatchStage::new(mounts.clone())));
            stages.push(Box::new(GitLatestPatchStage::new(mounts.clone())));
        }
        if let Some(docker) = config.docker() {
            stages.push(Box::new(DockerInstructionsStage::new(docker.clone(), mounts.clone())));
        }
    }

    Ok(stages)
}
