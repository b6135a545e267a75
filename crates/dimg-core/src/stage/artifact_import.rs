//! Import stages copying files out of artifact images.

use crate::config::{ArtifactImport, Mount};
use crate::digest::{canonical_json_of, sha256_hash};
use crate::error::Result;
use crate::image::{BuiltImage, ImageImport, ImageSpec};
use crate::stage::{BaseStage, BuildContext, Stage, StageName};

#[derive(Debug, Clone)]
pub struct ArtifactImportStage {
    base: BaseStage,
    name: StageName,
    imports: Vec<ArtifactImport>,
}

impl ArtifactImportStage {
    pub fn new(name: StageName, imports: Vec<ArtifactImport>, mounts: Vec<Mount>) -> Self {
        Self {
            base: BaseStage::new(mounts),
            name,
            imports,
        }
    }

    pub fn imports(&self) -> &[ArtifactImport] {
        &self.imports
    }
}

impl Stage for ArtifactImportStage {
    fn name(&self) -> StageName {
        self.name
    }

    fn base(&self) -> &BaseStage {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseStage {
        &mut self.base
    }

    fn is_empty(&self, _ctx: &BuildContext<'_>, _prev: &BuiltImage) -> Result<bool> {
        Ok(self.imports.is_empty())
    }

    fn get_dependencies(&self, ctx: &BuildContext<'_>, _prev: &BuiltImage) -> Result<String> {
        let mut parts = Vec::with_capacity(self.imports.len() * 2);
        for import in &self.imports {
            parts.push(ctx.result(true, &import.artifact)?.signature.clone());
            parts.push(canonical_json_of(import)?);
        }
        Ok(sha256_hash(&parts))
    }

    fn prepare_image(&self, ctx: &BuildContext<'_>, _prev: &BuiltImage, spec: &mut ImageSpec) -> Result<()> {
        self.base.prepare_mounts(ctx, spec)?;
        for import in &self.imports {
            let source = ctx.result(true, &import.artifact)?;
            spec.add_import(ImageImport {
                image: source.image.name.clone(),
                add: import.add.clone(),
                to: import.destination().to_string(),
                include_paths: import.include_paths.clone(),
                exclude_paths: import.exclude_paths.clone(),
                owner: import.owner.clone(),
                group: import.group.clone(),
            });
        }
        Ok(())
    }
}
