//! Patch stages bringing git artifacts up to their latest commit.
//!
//! `gitPostSetupPatch` absorbs large accumulated changes so that the user
//! stages before it stay cached; its signature moves only when the total
//! patch size crosses a bucket boundary. `gitLatestPatch` applies whatever
//! is left on every build.

use crate::config::Mount;
use crate::digest::sha256_hash;
use crate::error::{DimgError, Result};
use crate::git_artifact::GitArtifact;
use crate::image::{BuiltImage, ImageSpec};
use crate::stage::{BaseStage, BuildContext, Stage, StageName};

/// True when `artifact` has something to apply on top of `prev`.
fn has_pending_changes(artifact: &GitArtifact, prev: &BuiltImage) -> Result<bool> {
    match artifact.usable_synced_commit(prev)? {
        Some(synced) => Ok(artifact.patch_digest(&synced)?.is_some()),
        None => Ok(true),
    }
}

fn is_patch_empty(base: &BaseStage, prev: &BuiltImage) -> Result<bool> {
    for artifact in base.git_artifacts() {
        if has_pending_changes(artifact, prev)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn prepare_patches(base: &BaseStage, ctx: &BuildContext<'_>, prev: &BuiltImage, spec: &mut ImageSpec) -> Result<()> {
    base.prepare_mounts(ctx, spec)?;
    let work_dir = ctx.work_dir()?;
    for artifact in base.git_artifacts() {
        artifact.prepare_patch(&work_dir, prev, spec)?;
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct GitPostSetupPatchStage {
    base: BaseStage,
}

impl GitPostSetupPatchStage {
    pub fn new(mounts: Vec<Mount>) -> Self {
        Self {
            base: BaseStage::new(mounts),
        }
    }

    /// Total filtered patch size since each artifact's synced commit. Synced
    /// commits missing from history contribute nothing.
    pub fn accumulated_patch_size(&self, prev: &BuiltImage) -> Result<u64> {
        let mut total = 0u64;
        for artifact in self.git_artifacts() {
            if let Some(synced) = artifact.usable_synced_commit(prev)? {
                total += artifact.patch_byte_size(&synced)?;
            }
        }
        Ok(total)
    }
}

impl Stage for GitPostSetupPatchStage {
    fn name(&self) -> StageName {
        StageName::GitPostSetupPatch
    }

    fn base(&self) -> &BaseStage {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseStage {
        &mut self.base
    }

    fn is_empty(&self, _ctx: &BuildContext<'_>, prev: &BuiltImage) -> Result<bool> {
        is_patch_empty(&self.base, prev)
    }

    fn get_dependencies(&self, ctx: &BuildContext<'_>, prev: &BuiltImage) -> Result<String> {
        let step = ctx.patch_size_step();
        if step == 0 {
            return Err(DimgError::Configuration(
                "patch size step must be greater than zero".to_string(),
            ));
        }
        let bucket = self.accumulated_patch_size(prev)? / step;
        Ok(sha256_hash(&[bucket.to_string()]))
    }

    fn prepare_image(&self, ctx: &BuildContext<'_>, prev: &BuiltImage, spec: &mut ImageSpec) -> Result<()> {
        prepare_patches(&self.base, ctx, prev, spec)
    }
}

#[derive(Debug, Clone)]
pub struct GitLatestPatchStage {
    base: BaseStage,
}

impl GitLatestPatchStage {
    pub fn new(mounts: Vec<Mount>) -> Self {
        Self {
            base: BaseStage::new(mounts),
        }
    }
}

impl Stage for GitLatestPatchStage {
    fn name(&self) -> StageName {
        StageName::GitLatestPatch
    }

    fn base(&self) -> &BaseStage {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseStage {
        &mut self.base
    }

    fn is_empty(&self, _ctx: &BuildContext<'_>, prev: &BuiltImage) -> Result<bool> {
        is_patch_empty(&self.base, prev)
    }

    fn get_dependencies(&self, _ctx: &BuildContext<'_>, prev: &BuiltImage) -> Result<String> {
        let mut parts = Vec::new();
        for artifact in self.git_artifacts() {
            let part = match artifact.usable_synced_commit(prev)? {
                Some(synced) => artifact.patch_digest(&synced)?.unwrap_or(synced),
                None => artifact.tree_checksum(None)?,
            };
            parts.push(part);
        }
        Ok(sha256_hash(&parts))
    }

    fn prepare_image(&self, ctx: &BuildContext<'_>, prev: &BuiltImage, spec: &mut ImageSpec) -> Result<()> {
        prepare_patches(&self.base, ctx, prev, spec)
    }
}
