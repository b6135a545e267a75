//! `from`: the base layer of an image.

use crate::config::{BaseImage, Mount, MountSource};
use crate::digest::sha256_hash;
use crate::error::Result;
use crate::image::BuiltImage;
use crate::stage::{BaseStage, BuildContext, Stage, StageName};

#[derive(Debug, Clone)]
pub struct FromStage {
    base: BaseStage,
    from: BaseImage,
    from_cache_version: String,
}

impl FromStage {
    pub fn new(from: BaseImage, from_cache_version: String, mounts: Vec<Mount>) -> Self {
        Self {
            base: BaseStage::new(mounts),
            from,
            from_cache_version,
        }
    }

    pub fn from(&self) -> &BaseImage {
        &self.from
    }
}

/// Layer an image starts from: an external image, or the last layer of
/// another image of this project.
pub fn base_layer(from: &BaseImage, ctx: &BuildContext<'_>) -> Result<BuiltImage> {
    match from {
        BaseImage::Image(name) => Ok(BuiltImage::external(name.clone())),
        BaseImage::Dimg(name) => Ok(ctx.result(false, name)?.image.clone()),
        BaseImage::Artifact(name) => Ok(ctx.result(true, name)?.image.clone()),
    }
}

fn mount_descriptor(mount: &Mount) -> String {
    let from = match &mount.from {
        MountSource::TmpDir => "tmp_dir".to_string(),
        MountSource::BuildDir => "build_dir".to_string(),
        MountSource::Path(path) => path.to_string_lossy().into_owned(),
    };
    format!("{from}:{}", mount.to)
}

impl Stage for FromStage {
    fn name(&self) -> StageName {
        StageName::From
    }

    fn base(&self) -> &BaseStage {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseStage {
        &mut self.base
    }

    fn get_dependencies(&self, ctx: &BuildContext<'_>, _prev: &BuiltImage) -> Result<String> {
        let from = match &self.from {
            BaseImage::Image(name) => name.clone(),
            BaseImage::Dimg(name) => ctx.result(false, name)?.signature.clone(),
            BaseImage::Artifact(name) => ctx.result(true, name)?.signature.clone(),
        };
        let mut parts = vec![from, self.from_cache_version.clone()];
        let mut mounts: Vec<String> = self.base.mounts().iter().map(mount_descriptor).collect();
        mounts.sort();
        parts.extend(mounts);
        Ok(sha256_hash(&parts))
    }
}
