//! Image stores that materialise stage layers.

pub mod docker;
pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::image::{BuiltImage, ImageSpec};

pub use docker::DockerBackend;
pub use memory::MemoryBackend;

/// Repository name of stage layers for `project`.
pub fn stage_repository(project: &str) -> String {
    format!("dimgstage-{}", crate::git::url::slug(project))
}

/// Lookup and creation of stage layers, keyed by signature.
#[async_trait]
pub trait ImageBackend: Send + Sync {
    /// Name the layer for `signature` has (or would have) in this store.
    fn image_name(&self, signature: &str) -> String;

    /// Existing layer built for `signature`, if any.
    async fn lookup(&self, signature: &str) -> Result<Option<BuiltImage>>;

    /// Build `spec` on top of `parent` and store it under `signature`. The
    /// new layer inherits the parent's labels.
    async fn commit(&self, parent: &BuiltImage, spec: &ImageSpec, signature: &str) -> Result<BuiltImage>;
}
