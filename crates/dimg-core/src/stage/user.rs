//! User stages: `beforeInstall`, `install`, `beforeSetup` and `setup`.

use std::sync::Arc;

use crate::builder::Builder;
use crate::config::Mount;
use crate::digest::sha256_hash;
use crate::error::Result;
use crate::image::{BuiltImage, ImageSpec};
use crate::stage::{BaseStage, BuildContext, Stage, StageName, UserStageName};

/// Runs the builder's declarations for one stage.
#[derive(Debug, Clone)]
pub struct UserStage {
    base: BaseStage,
    stage: UserStageName,
    builder: Arc<dyn Builder>,
}

impl UserStage {
    pub fn new(stage: UserStageName, builder: Arc<dyn Builder>, mounts: Vec<Mount>) -> Self {
        Self {
            base: BaseStage::new(mounts),
            stage,
            builder,
        }
    }

    fn apply_builder(&self, ctx: &BuildContext<'_>, spec: &mut ImageSpec) -> Result<()> {
        self.builder.apply(self.stage, spec, &ctx.work_dir()?)
    }
}

impl Stage for UserStage {
    fn name(&self) -> StageName {
        self.stage.stage_name()
    }

    fn base(&self) -> &BaseStage {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseStage {
        &mut self.base
    }

    fn is_empty(&self, _ctx: &BuildContext<'_>, _prev: &BuiltImage) -> Result<bool> {
        Ok(self.builder.is_empty(self.stage))
    }

    fn get_dependencies(&self, _ctx: &BuildContext<'_>, _prev: &BuiltImage) -> Result<String> {
        self.builder.checksum(self.stage)
    }

    fn prepare_image(&self, ctx: &BuildContext<'_>, _prev: &BuiltImage, spec: &mut ImageSpec) -> Result<()> {
        self.base.prepare_mounts(ctx, spec)?;
        self.apply_builder(ctx, spec)
    }
}

/// User stage that also re-runs when watched git paths change, and brings
/// git artifacts up to date before running.
#[derive(Debug, Clone)]
pub struct UserWithGitPatchStage {
    inner: UserStage,
}

impl UserWithGitPatchStage {
    pub fn new(stage: UserStageName, builder: Arc<dyn Builder>, mounts: Vec<Mount>) -> Self {
        Self {
            inner: UserStage::new(stage, builder, mounts),
        }
    }
}

impl Stage for UserWithGitPatchStage {
    fn name(&self) -> StageName {
        self.inner.name()
    }

    fn base(&self) -> &BaseStage {
        &self.inner.base
    }

    fn base_mut(&mut self) -> &mut BaseStage {
        &mut self.inner.base
    }

    fn is_empty(&self, ctx: &BuildContext<'_>, prev: &BuiltImage) -> Result<bool> {
        self.inner.is_empty(ctx, prev)
    }

    fn get_dependencies(&self, ctx: &BuildContext<'_>, prev: &BuiltImage) -> Result<String> {
        let mut parts = vec![self.inner.get_dependencies(ctx, prev)?];
        for artifact in self.git_artifacts() {
            parts.push(artifact.stage_dependencies_checksum(self.name())?);
        }
        Ok(sha256_hash(&parts))
    }

    fn prepare_image(&self, ctx: &BuildContext<'_>, prev: &BuiltImage, spec: &mut ImageSpec) -> Result<()> {
        self.inner.base.prepare_mounts(ctx, spec)?;
        let work_dir = ctx.work_dir()?;
        for artifact in self.git_artifacts() {
            artifact.prepare_patch(&work_dir, prev, spec)?;
        }
        self.inner.apply_builder(ctx, spec)
    }
}
