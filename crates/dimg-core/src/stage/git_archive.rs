//! `gitArchive`: first full sync of every git artifact.

use crate::config::Mount;
use crate::digest::sha256_hash;
use crate::error::Result;
use crate::image::{BuiltImage, ImageSpec};
use crate::stage::{BaseStage, BuildContext, Stage, StageName};

#[derive(Debug, Clone)]
pub struct GitArchiveStage {
    base: BaseStage,
}

impl GitArchiveStage {
    pub fn new(mounts: Vec<Mount>) -> Self {
        Self {
            base: BaseStage::new(mounts),
        }
    }
}

impl Stage for GitArchiveStage {
    fn name(&self) -> StageName {
        StageName::GitArchive
    }

    fn base(&self) -> &BaseStage {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseStage {
        &mut self.base
    }

    fn is_empty(&self, _ctx: &BuildContext<'_>, _prev: &BuiltImage) -> Result<bool> {
        Ok(self.git_artifacts().is_empty())
    }

    /// Artifact parameters only; newer commits reach the image as patches.
    fn get_dependencies(&self, _ctx: &BuildContext<'_>, _prev: &BuiltImage) -> Result<String> {
        let params: Vec<String> = self.git_artifacts().iter().map(|a| a.paramshash()).collect();
        Ok(sha256_hash(&params))
    }

    fn prepare_image(&self, ctx: &BuildContext<'_>, _prev: &BuiltImage, spec: &mut ImageSpec) -> Result<()> {
        self.base.prepare_mounts(ctx, spec)?;
        let work_dir = ctx.work_dir()?;
        for artifact in self.git_artifacts() {
            artifact.prepare_archive(&work_dir, spec)?;
        }
        Ok(())
    }
}
