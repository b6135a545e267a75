//! Dependency ordering of image definitions.
//!
//! An image depends on its base (when the base is another image of the
//! project) and on every artifact it imports from. `Dappfile::dimg_tree`
//! flattens those references dependencies-first; cycles are fatal.

use crate::config::{BaseImage, Dappfile, Dimg, DimgArtifact, DimgBase, DockerInstructions};
use crate::digest::{canonical_json_of, sha256_hash};
use crate::error::{DimgError, Result};

/// Borrowed view over either kind of image definition.
#[derive(Debug, Clone, Copy)]
pub enum DimgConfig<'a> {
    Dimg(&'a Dimg),
    Artifact(&'a DimgArtifact),
}

impl<'a> DimgConfig<'a> {
    pub fn base(&self) -> &'a DimgBase {
        match self {
            DimgConfig::Dimg(d) => &d.base,
            DimgConfig::Artifact(a) => &a.base,
        }
    }

    pub fn name(&self) -> &'a str {
        &self.base().name
    }

    pub fn is_artifact(&self) -> bool {
        matches!(self, DimgConfig::Artifact(_))
    }

    /// Docker instructions; artifacts never carry any.
    pub fn docker(&self) -> Option<&'a DockerInstructions> {
        match self {
            DimgConfig::Dimg(d) => d.docker.as_ref(),
            DimgConfig::Artifact(_) => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            DimgConfig::Dimg(_) => "dimg",
            DimgConfig::Artifact(_) => "artifact",
        }
    }

    /// Stable identity used to deduplicate scheduled images: kind, name and
    /// a digest of the full definition.
    pub fn dedup_key(&self) -> Result<String> {
        let content = match self {
            DimgConfig::Dimg(d) => canonical_json_of(d)?,
            DimgConfig::Artifact(a) => canonical_json_of(a)?,
        };
        Ok(format!(
            "{}:{}:{}",
            self.kind(),
            self.name(),
            sha256_hash(&[content])
        ))
    }

    fn label(&self) -> String {
        format!("{}/{}", self.kind(), self.name())
    }
}

impl Dappfile {
    /// Every image `root` needs, dependencies first, ending with `root`.
    pub fn dimg_tree<'a>(&'a self, root: DimgConfig<'a>) -> Result<Vec<DimgConfig<'a>>> {
        let mut order = Vec::new();
        let mut visiting = Vec::new();
        self.visit(root, &mut visiting, &mut order)?;
        Ok(order)
    }

    fn visit<'a>(
        &'a self,
        node: DimgConfig<'a>,
        visiting: &mut Vec<String>,
        order: &mut Vec<DimgConfig<'a>>,
    ) -> Result<()> {
        let label = node.label();
        if let Some(pos) = visiting.iter().position(|l| *l == label) {
            let mut dimgs: Vec<String> = visiting[pos..].to_vec();
            dimgs.push(label);
            return Err(DimgError::DependencyCycle { dimgs });
        }
        if order.iter().any(|seen| seen.label() == label) {
            return Ok(());
        }

        visiting.push(label);

        let base = node.base();
        match &base.from {
            BaseImage::Image(_) => {}
            BaseImage::Dimg(name) => {
                let parent = self.dimg(name).ok_or_else(|| {
                    DimgError::Configuration(format!(
                        "image '{}' is based on unknown dimg '{}'",
                        base.name, name
                    ))
                })?;
                self.visit(DimgConfig::Dimg(parent), visiting, order)?;
            }
            BaseImage::Artifact(name) => {
                let parent = self.artifact(name).ok_or_else(|| {
                    DimgError::Configuration(format!(
                        "image '{}' is based on unknown artifact '{}'",
                        base.name, name
                    ))
                })?;
                self.visit(DimgConfig::Artifact(parent), visiting, order)?;
            }
        }

        for import in &base.imports {
            let artifact = self.artifact(&import.artifact).ok_or_else(|| {
                DimgError::Configuration(format!(
                    "image '{}' imports from unknown artifact '{}'",
                    base.name, import.artifact
                ))
            })?;
            self.visit(DimgConfig::Artifact(artifact), visiting, order)?;
        }

        visiting.pop();
        order.push(node);
        Ok(())
    }
}
