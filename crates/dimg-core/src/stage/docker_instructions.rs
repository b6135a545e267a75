//! `dockerInstructions`: image metadata applied to the final layer.

use crate::config::{DockerInstructions, Mount};
use crate::digest::canonical_json_of;
use crate::error::Result;
use crate::image::{BuiltImage, ImageSpec};
use crate::stage::{BaseStage, BuildContext, Stage, StageName};

#[derive(Debug, Clone)]
pub struct DockerInstructionsStage {
    base: BaseStage,
    instructions: DockerInstructions,
}

impl DockerInstructionsStage {
    pub fn new(instructions: DockerInstructions, mounts: Vec<Mount>) -> Self {
        Self {
            base: BaseStage::new(mounts),
            instructions,
        }
    }
}

impl Stage for DockerInstructionsStage {
    fn name(&self) -> StageName {
        StageName::DockerInstructions
    }

    fn base(&self) -> &BaseStage {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseStage {
        &mut self.base
    }

    fn get_dependencies(&self, _ctx: &BuildContext<'_>, _prev: &BuiltImage) -> Result<String> {
        canonical_json_of(&self.instructions)
    }

    fn prepare_image(&self, ctx: &BuildContext<'_>, _prev: &BuiltImage, spec: &mut ImageSpec) -> Result<()> {
        self.base.prepare_mounts(ctx, spec)?;
        spec.add_change_options(self.instructions.change_options());
        Ok(())
    }
}
